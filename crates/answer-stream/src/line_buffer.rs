/// Accumulates raw text and yields complete `\n`-terminated lines.
///
/// The trailing fragment after the last newline is retained across calls, so
/// a line split over several chunks is returned exactly once, in full, when
/// its terminating newline arrives.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    remainder: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line completed by it, in order.
    ///
    /// Returned lines do not include the `\n`. A `\r` before the newline is
    /// left in place; frame classification trims it.
    pub fn consume(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.remainder.push_str(chunk);
        let Some(last_newline) = self.remainder.rfind('\n') else {
            return Vec::new();
        };

        let tail = self.remainder.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.remainder, tail);
        complete[..last_newline]
            .split('\n')
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Takes the retained fragment as a final line, if it is non-empty.
    ///
    /// Used when the transport signals completion and no further newline
    /// will arrive.
    pub fn flush(&mut self) -> Option<String> {
        if self.remainder.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.remainder))
    }

    /// The not-yet-terminated fragment carried to the next call.
    pub fn remainder(&self) -> &str {
        &self.remainder
    }
}
