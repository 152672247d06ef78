use tracing::warn;

/// Tracks how much of a transport's cumulative body has been consumed.
///
/// Transports that only expose "the whole body so far" are diffed here so
/// each byte range reaches the line buffer exactly once. Transports that
/// deliver true chunks skip the tracker entirely.
#[derive(Debug, Default, Clone)]
pub struct OffsetTracker {
    processed: usize,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes of the cumulative body already handed out.
    pub fn processed_offset(&self) -> usize {
        self.processed
    }

    /// Returns the part of `cumulative` not yet handed out and marks it
    /// consumed.
    ///
    /// A buffer shorter than the processed offset, or one whose offset falls
    /// inside a multi-byte character, is not a growth of the previous buffer;
    /// it is discarded and the offset left unchanged.
    pub fn advance<'a>(&mut self, cumulative: &'a str) -> &'a str {
        if cumulative.len() < self.processed {
            warn!(
                processed = self.processed,
                received = cumulative.len(),
                "cumulative buffer shrank; discarding notification"
            );
            return "";
        }
        if !cumulative.is_char_boundary(self.processed) {
            warn!(
                processed = self.processed,
                "cumulative buffer diverged from consumed prefix; discarding notification"
            );
            return "";
        }
        let slice = &cumulative[self.processed..];
        self.processed = cumulative.len();
        slice
    }
}
