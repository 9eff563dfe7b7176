//! Command translation and reply classification tables.
//!
//! Inbound server commands arrive as free text ("STOP", "corta
//! combustivel", "DYD#") or as the structured OUTPUT pair. Outbound
//! lines use the microcontroller's `CMD:<verb>` vocabulary.

/// Keyword table, evaluated in order; the first rule containing a
/// matching keyword wins. Rules with keywords that are substrings of
/// other rules' keywords ("START" vs "RESTART", "BLOCK" vs "UNBLOCK")
/// come later, so every keyword maps to its own verb.
const TEXT_RULES: &[(&[&str], &str)] = &[
    (&["RESET", "REINICIAR", "REBOOT", "RESTART"], "CMD:REINICIAR"),
    (
        &["RESUME", "RESTORE", "DESBLOQUEAR", "UNBLOCK", "START", "HFYD"],
        "CMD:DESBLOQUEAR",
    ),
    (
        &["STOP", "CUT", "BLOQUEAR", "BLOCK", "KILL", "DYD"],
        "CMD:BLOQUEAR",
    ),
    (
        &["WHERE", "LOCATE", "POSICAO", "POSITION", "GPS"],
        "CMD:POSICAO",
    ),
    (&["STATUS", "ESTADO", "INFO"], "CMD:STATUS"),
    (&["INTERVAL", "INTERVALO"], "CMD:INTERVALO"),
];

/// Translate a textual command into the outbound serial line
/// (case-insensitive substring match, first matching rule wins).
/// Unrecognized commands pass through as `CMD:<original text>`.
///
/// # Examples
///
/// ```
/// use rastro_bridge::translate_text;
///
/// assert_eq!(translate_text("STOP"), "CMD:BLOQUEAR");
/// assert_eq!(translate_text("please unblock"), "CMD:DESBLOQUEAR");
/// assert_eq!(translate_text("FOO,1"), "CMD:FOO,1");
/// ```
#[must_use]
pub fn translate_text(text: &str) -> String {
    let upper = text.to_uppercase();
    for (keywords, line) in TEXT_RULES {
        if keywords.iter().any(|keyword| upper.contains(keyword)) {
            return (*line).to_string();
        }
    }
    format!("CMD:{}", text.trim())
}

/// Translate the structured OUTPUT pair: output 1 switches the engine
/// relay, anything else passes through as a custom line.
///
/// # Examples
///
/// ```
/// use rastro_bridge::translate_output;
///
/// assert_eq!(translate_output(1, 1), "ENGINE_STOP");
/// assert_eq!(translate_output(1, 0), "ENGINE_RESUME");
/// assert_eq!(translate_output(2, 1), "CUSTOM,OUTPUT=2,STATE=1");
/// ```
#[must_use]
pub fn translate_output(output: u8, state: u8) -> String {
    match (output, state) {
        (1, 1) => "ENGINE_STOP".to_string(),
        (1, 0) => "ENGINE_RESUME".to_string(),
        (output, state) => format!("CUSTOM,OUTPUT={output},STATE={state}"),
    }
}

/// Reply classes the microcontroller protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ack,
    Error,
    Status,
    Log,
    Other,
}

impl ReplyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyKind::Ack => "ACK",
            ReplyKind::Error => "ERROR",
            ReplyKind::Status => "STATUS",
            ReplyKind::Log => "LOG",
            ReplyKind::Other => "OTHER",
        }
    }
}

/// Classify a trimmed reply line by its prefix (case-insensitive).
///
/// # Examples
///
/// ```
/// use rastro_bridge::{ReplyKind, classify_reply};
///
/// assert_eq!(classify_reply("ACK:BLOQUEAR"), ReplyKind::Ack);
/// assert_eq!(classify_reply("err 3"), ReplyKind::Error);
/// assert_eq!(classify_reply("hello"), ReplyKind::Other);
/// ```
#[must_use]
pub fn classify_reply(line: &str) -> ReplyKind {
    let upper = line.to_uppercase();
    if upper.starts_with("ACK") {
        ReplyKind::Ack
    } else if upper.starts_with("ERROR") || upper.starts_with("ERR") {
        ReplyKind::Error
    } else if upper.starts_with("STATUS") {
        ReplyKind::Status
    } else if upper.starts_with("LOG") {
        ReplyKind::Log
    } else {
        ReplyKind::Other
    }
}
