/// Decodes a byte stream into a growing `String` without ever splitting a
/// multi-byte character across two snapshots.
///
/// Bytes of an incomplete trailing character are held back until the rest
/// arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Accumulator {
    text: String,
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    /// Appends `bytes`; returns whether the decoded text grew.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let before = self.text.len();
        self.pending.extend_from_slice(bytes);
        self.decode_pending();
        self.text.len() != before
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Decodes whatever is still held back and returns the complete text.
    pub fn finish(&mut self) -> String {
        if !self.pending.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
        std::mem::take(&mut self.text)
    }

    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_split_character() {
        let bytes = "chào".as_bytes();
        let mut acc = Utf8Accumulator::default();
        // "ch" + first byte of 'à'
        assert!(acc.push(&bytes[..3]));
        assert_eq!(acc.as_str(), "ch");
        assert!(acc.push(&bytes[3..4]));
        assert_eq!(acc.as_str(), "chà");
        acc.push(&bytes[4..]);
        assert_eq!(acc.finish(), "chào");
    }

    #[test]
    fn incomplete_lead_byte_does_not_grow_text() {
        let bytes = "à".as_bytes();
        let mut acc = Utf8Accumulator::default();
        assert!(!acc.push(&bytes[..1]));
        assert!(acc.push(&bytes[1..]));
        assert_eq!(acc.as_str(), "à");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut acc = Utf8Accumulator::default();
        acc.push(b"a\xffb");
        assert_eq!(acc.as_str(), "a\u{FFFD}b");
    }

    #[test]
    fn finish_flushes_truncated_tail() {
        let mut acc = Utf8Accumulator::default();
        acc.push(b"ok\xc3");
        assert_eq!(acc.finish(), "ok\u{FFFD}");
    }
}
