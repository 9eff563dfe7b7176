//! Serial command bridge.
//!
//! Translates commands decoded from the GT06 link into a
//! newline-terminated text protocol on a locally attached
//! microcontroller, and surfaces the microcontroller's replies as
//! events. The transport is abstracted behind [`CommandLink`]; the
//! production implementation is [`SerialLink`] (USB serial via
//! tokio-serial), tests use [`MockLink`].

#![allow(async_fn_in_trait)]

pub mod bridge;
pub mod link;
pub mod mapping;
pub mod mock;

pub use bridge::{Bridge, BridgeDirective, BridgeHandle, BridgeStats};
pub use link::{AnyLink, CommandLink, SerialLink};
pub use mapping::{ReplyKind, classify_reply, translate_output, translate_text};
pub use mock::{MockLink, MockLinkHandle};
