//! Line-oriented command transports.
//!
//! The bridge does not assume USB specifically; any byte stream with
//! line-termination semantics can carry the command protocol. The
//! trait uses native `async fn` methods (RPITIT) — implementations are
//! selected by generics, not trait objects.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use rastro_core::{Error, Result};

/// A byte transport carrying newline-terminated command lines.
pub trait CommandLink: Send {
    /// Open the transport. Idempotent when already open.
    async fn open(&mut self) -> Result<()>;

    /// Close the transport and release the handle.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write one line; the implementation appends the `\n` terminator.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read the next reply line, trimmed of `\r\n`. Returns `Ok(None)`
    /// when the peer closed the stream.
    async fn read_line(&mut self) -> Result<Option<String>>;

    /// Human-readable transport description for logs.
    fn description(&self) -> String;
}

/// USB/serial implementation over tokio-serial.
///
/// Reads go through `Lines::next_line`, which is cancel-safe — the
/// bridge polls it inside a `select!` and must not lose partial lines
/// when a directive wins the race.
pub struct SerialLink {
    path: String,
    baud_rate: u32,
    port: Option<Lines<BufReader<SerialStream>>>,
}

impl SerialLink {
    /// Common microcontroller baud rate.
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Describe a port to open later; nothing is touched until
    /// [`open`](CommandLink::open).
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_bridge::{CommandLink, SerialLink};
    ///
    /// let link = SerialLink::new("/dev/ttyUSB0", SerialLink::DEFAULT_BAUD);
    /// assert!(!link.is_open());
    /// assert_eq!(link.description(), "/dev/ttyUSB0 @ 115200 baud");
    /// ```
    #[must_use]
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        SerialLink {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }

    /// Enumerate serial ports visible on this host.
    ///
    /// # Errors
    /// Returns `Error::Bridge` when the platform enumeration fails.
    pub fn available_ports() -> Result<Vec<String>> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| Error::Bridge(format!("failed to list serial ports: {e}")))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

impl CommandLink for SerialLink {
    async fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|e| Error::Bridge(format!("failed to open {}: {e}", self.path)))?;

        info!(path = %self.path, baud = self.baud_rate, "serial link open");
        self.port = Some(BufReader::new(stream).lines());
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial link closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::BridgeNotOpen)?;
        let writer = port.get_mut().get_mut();

        let mut result = writer.write_all(line.as_bytes()).await;
        if result.is_ok() {
            result = writer.write_all(b"\n").await;
        }
        if result.is_ok() {
            result = writer.flush().await;
        }

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path = %self.path, "serial write failed: {e}");
                self.port = None;
                Err(Error::Bridge(format!("serial write failed: {e}")))
            }
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let port = self.port.as_mut().ok_or(Error::BridgeNotOpen)?;
        match port.next_line().await {
            Ok(Some(line)) => Ok(Some(line.trim_end_matches('\r').to_string())),
            Ok(None) => {
                self.port = None;
                Ok(None)
            }
            Err(e) => {
                self.port = None;
                Err(Error::Bridge(format!("serial read failed: {e}")))
            }
        }
    }

    fn description(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

/// Enum dispatch over the shipped link implementations.
///
/// `async fn` trait methods return opaque futures, so [`CommandLink`]
/// is not object-safe; code that must pick a transport at runtime (the
/// gateway, the CLI) wraps it in this enum instead of a `dyn` box.
/// Monomorphized delegation keeps the dispatch zero-cost.
pub enum AnyLink {
    Serial(SerialLink),
    Mock(crate::mock::MockLink),
}

impl CommandLink for AnyLink {
    async fn open(&mut self) -> Result<()> {
        match self {
            AnyLink::Serial(link) => link.open().await,
            AnyLink::Mock(link) => link.open().await,
        }
    }

    async fn close(&mut self) {
        match self {
            AnyLink::Serial(link) => link.close().await,
            AnyLink::Mock(link) => link.close().await,
        }
    }

    fn is_open(&self) -> bool {
        match self {
            AnyLink::Serial(link) => link.is_open(),
            AnyLink::Mock(link) => link.is_open(),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            AnyLink::Serial(link) => link.write_line(line).await,
            AnyLink::Mock(link) => link.write_line(line).await,
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        match self {
            AnyLink::Serial(link) => link.read_line().await,
            AnyLink::Mock(link) => link.read_line().await,
        }
    }

    fn description(&self) -> String {
        match self {
            AnyLink::Serial(link) => link.description(),
            AnyLink::Mock(link) => link.description(),
        }
    }
}

impl From<SerialLink> for AnyLink {
    fn from(link: SerialLink) -> Self {
        AnyLink::Serial(link)
    }
}

impl From<crate::mock::MockLink> for AnyLink {
    fn from(link: crate::mock::MockLink) -> Self {
        AnyLink::Mock(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_before_open_fails() {
        let mut link = SerialLink::new("/dev/null-not-a-port", SerialLink::DEFAULT_BAUD);
        assert!(!link.is_open());
        assert!(matches!(
            link.write_line("CMD:STATUS").await,
            Err(Error::BridgeNotOpen)
        ));
    }

    #[tokio::test]
    async fn open_missing_device_reports_bridge_error() {
        let mut link = SerialLink::new("/dev/does-not-exist-12345", 9600);
        assert!(matches!(link.open().await, Err(Error::Bridge(_))));
        assert!(!link.is_open());
    }

    #[test]
    fn description_names_path_and_baud() {
        let link = SerialLink::new("/dev/ttyUSB0", 115_200);
        assert_eq!(link.description(), "/dev/ttyUSB0 @ 115200 baud");
    }
}
