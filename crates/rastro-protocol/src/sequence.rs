//! Outbound frame sequence numbers.

/// Session-local serial counter.
///
/// Starts at 1, advances on every outbound frame and wraps
/// `65535 -> 1`; the value 0 is never produced. Each TCP session owns
/// exactly one counter, accessed only from the task that owns the
/// socket, which makes serial assignment a total order on outbound
/// frames.
///
/// # Example
/// ```
/// use rastro_protocol::SerialCounter;
///
/// let mut serials = SerialCounter::new();
/// assert_eq!(serials.advance(), 1);
/// assert_eq!(serials.advance(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SerialCounter {
    next: u16,
}

impl SerialCounter {
    #[must_use]
    pub fn new() -> Self {
        SerialCounter { next: 1 }
    }

    /// Take the current serial and move to the next one.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_protocol::SerialCounter;
    ///
    /// let mut serials = SerialCounter::new();
    /// assert_eq!(serials.advance(), 1);
    /// assert_eq!(serials.peek(), 2);
    /// ```
    pub fn advance(&mut self) -> u16 {
        let serial = self.next;
        self.next = if serial == u16::MAX { 1 } else { serial + 1 };
        serial
    }

    /// The serial the next `advance()` will return.
    #[must_use]
    pub fn peek(&self) -> u16 {
        self.next
    }
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}
