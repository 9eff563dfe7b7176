//! Channel-backed command link for tests and serial-less hosts.
//!
//! [`MockLink`] stands in for the microcontroller: everything the
//! bridge writes shows up on the [`MockLinkHandle`], and replies pushed
//! through the handle are read back by the bridge. Failures (open,
//! write, disconnect) are scriptable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

use crate::link::CommandLink;
use rastro_core::{Error, Result};

/// Test double for the serial transport.
pub struct MockLink {
    open: bool,
    fail_opens: Arc<AtomicU32>,
    fail_writes: Arc<AtomicU32>,
    written_tx: mpsc::UnboundedSender<String>,
    replies_rx: mpsc::UnboundedReceiver<String>,
}

/// Controller side of a [`MockLink`].
pub struct MockLinkHandle {
    fail_opens: Arc<AtomicU32>,
    fail_writes: Arc<AtomicU32>,
    written_rx: mpsc::UnboundedReceiver<String>,
    replies_tx: mpsc::UnboundedSender<String>,
}

impl MockLink {
    /// Create a link and its controlling handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_bridge::{CommandLink, MockLink};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let (mut link, mut handle) = MockLink::pair();
    /// link.open().await.unwrap();
    /// link.write_line("CMD:STATUS").await.unwrap();
    ///
    /// assert_eq!(handle.written().await.unwrap(), "CMD:STATUS");
    ///
    /// handle.push_reply("ACK:STATUS");
    /// assert_eq!(link.read_line().await.unwrap().unwrap(), "ACK:STATUS");
    /// # }
    /// ```
    #[must_use]
    pub fn pair() -> (MockLink, MockLinkHandle) {
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let fail_opens = Arc::new(AtomicU32::new(0));
        let fail_writes = Arc::new(AtomicU32::new(0));

        (
            MockLink {
                open: false,
                fail_opens: fail_opens.clone(),
                fail_writes: fail_writes.clone(),
                written_tx,
                replies_rx,
            },
            MockLinkHandle {
                fail_opens,
                fail_writes,
                written_rx,
                replies_tx,
            },
        )
    }
}

impl CommandLink for MockLink {
    async fn open(&mut self) -> Result<()> {
        if self.fail_opens.load(Ordering::SeqCst) > 0 {
            self.fail_opens.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Bridge("mock open failure".to_string()));
        }
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.open {
            return Err(Error::BridgeNotOpen);
        }
        if self.fail_writes.load(Ordering::SeqCst) > 0 {
            self.fail_writes.fetch_sub(1, Ordering::SeqCst);
            self.open = false;
            return Err(Error::Bridge("mock write failure".to_string()));
        }
        self.written_tx
            .send(line.to_string())
            .map_err(|_| Error::Bridge("mock handle dropped".to_string()))
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        match self.replies_rx.recv().await {
            Some(line) => Ok(Some(line)),
            None => {
                self.open = false;
                Ok(None)
            }
        }
    }

    fn description(&self) -> String {
        "mock link".to_string()
    }
}

impl MockLinkHandle {
    /// Next line the bridge wrote, `\n` already stripped by the link.
    pub async fn written(&mut self) -> Option<String> {
        self.written_rx.recv().await
    }

    /// Non-blocking variant of [`written`](Self::written).
    pub fn try_written(&mut self) -> Option<String> {
        self.written_rx.try_recv().ok()
    }

    /// Queue a reply line for the bridge to read.
    pub fn push_reply(&self, line: impl Into<String>) {
        let _ = self.replies_tx.send(line.into());
    }

    /// Make the next `open()` call fail.
    pub fn fail_next_open(&self) {
        self.fail_opens.fetch_add(1, Ordering::SeqCst);
    }

    /// Make the next `write_line()` call fail and drop the link.
    pub fn fail_next_write(&self) {
        self.fail_writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_through_the_pair() {
        let (mut link, mut handle) = MockLink::pair();
        link.open().await.unwrap();
        assert!(link.is_open());

        link.write_line("CMD:STATUS").await.unwrap();
        assert_eq!(handle.written().await.unwrap(), "CMD:STATUS");

        handle.push_reply("ACK:STATUS");
        assert_eq!(link.read_line().await.unwrap().unwrap(), "ACK:STATUS");
    }

    #[tokio::test]
    async fn scripted_open_failure() {
        let (mut link, handle) = MockLink::pair();
        handle.fail_next_open();

        assert!(link.open().await.is_err());
        assert!(!link.is_open());

        // Only the next call fails.
        link.open().await.unwrap();
        assert!(link.is_open());
    }

    #[tokio::test]
    async fn scripted_write_failure_drops_the_link() {
        let (mut link, handle) = MockLink::pair();
        link.open().await.unwrap();
        handle.fail_next_write();

        assert!(link.write_line("CMD:BLOQUEAR").await.is_err());
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn dropped_handle_reads_as_closed() {
        let (mut link, handle) = MockLink::pair();
        link.open().await.unwrap();
        drop(handle);

        assert_eq!(link.read_line().await.unwrap(), None);
        assert!(!link.is_open());
    }
}
