/// Default receive buffer capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 65_535;

/// A snapshot of the buffer state, as reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BufferStatus {
    /// How many bytes are currently buffered.
    pub length: usize,

    /// The fixed capacity.
    pub capacity: usize,

    /// Whether the most recent append lost bytes.
    pub overflow: bool,
}

/// A fixed-capacity byte accumulator with overflow detection.
///
/// This is not a ring buffer or a queue: the consumers are pollers which want
/// "everything since my last read, then clear". A hard capacity bounds memory,
/// and loss is signalled via the overflow flag instead of ever blocking the
/// producer.
///
/// The flag reflects only the outcome of the most recent append, not the
/// buffer's history between drains. That undercounts cumulative loss, but it
/// is the contract clients rely on, so it stays.
///
/// The struct does no locking of its own. The session mutates it only while
/// holding its read lock.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Box<[u8]>,
    fill: usize,
    overflow: bool,
}

impl ReceiveBuffer {
    /// A buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            fill: 0,
            overflow: false,
        }
    }

    /// Append bytes, truncating at capacity.
    ///
    /// Returns how many bytes were stored. Bytes past the remaining capacity
    /// are discarded, never queued, and set the overflow flag; an append which
    /// fits clears it.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let remaining = self.data.len() - self.fill;

        if remaining == 0 {
            self.overflow = true;
            return 0;
        }

        let stored = bytes.len().min(remaining);
        self.data[self.fill..self.fill + stored].copy_from_slice(&bytes[..stored]);
        self.fill += stored;
        self.overflow = bytes.len() > remaining;

        stored
    }

    /// Destructive read: return up to `max_bytes` buffered bytes and the
    /// overflow flag, then clear everything.
    ///
    /// With `max_bytes` smaller than the fill, the unreturned remainder is
    /// discarded too: this is a full-clear drain, not a partial consume.
    /// `None` means "everything".
    pub fn drain(&mut self, max_bytes: Option<usize>) -> (Vec<u8>, bool) {
        let take = max_bytes.unwrap_or(self.data.len()).min(self.fill);

        let bytes = self.data[..take].to_vec();
        let overflow = self.overflow;

        self.clear();

        (bytes, overflow)
    }

    /// Discard all buffered bytes and clear the overflow flag.
    pub fn clear(&mut self) {
        self.fill = 0;
        self.overflow = false;
    }

    /// Non-destructive snapshot of fill, capacity and overflow.
    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            length: self.fill,
            capacity: self.data.len(),
            overflow: self.overflow,
        }
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
