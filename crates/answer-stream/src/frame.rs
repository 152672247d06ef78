/// Prefix that marks a data line in the event stream.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that marks the logical end of the event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Classification of one line of the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A `data: ` line carrying a payload.
    Data,
    /// The `[DONE]` sentinel.
    Terminal,
    /// Blank lines, comments and any unrecognized field.
    Ignorable,
}

/// One classified line of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: FrameKind,
    /// Text following the `data: ` prefix; empty for ignorable lines.
    pub raw_payload: &'a str,
}

impl<'a> Frame<'a> {
    fn ignorable() -> Self {
        Self {
            kind: FrameKind::Ignorable,
            raw_payload: "",
        }
    }
}

/// Classifies a single line.
///
/// Standard SSE fields such as `event:`, `id:`, `retry:` and `:` comments
/// are not used by the backend and classify as [`FrameKind::Ignorable`].
pub fn classify(line: &str) -> Frame<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Frame::ignorable();
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::ignorable();
    };
    let kind = if payload == DONE_SENTINEL {
        FrameKind::Terminal
    } else {
        FrameKind::Data
    };
    Frame {
        kind,
        raw_payload: payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_strips_prefix() {
        let frame = classify("data: {\"text\":\"hi\"}\r");
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.raw_payload, "{\"text\":\"hi\"}");
    }

    #[test]
    fn sentinel_is_terminal() {
        assert_eq!(classify("data: [DONE]").kind, FrameKind::Terminal);
        assert_eq!(classify("  data: [DONE]  ").kind, FrameKind::Terminal);
    }

    #[test]
    fn blank_and_unrecognized_lines_are_ignorable() {
        for line in [
            "",
            "   ",
            "\r",
            ": keep-alive",
            "event: message",
            "id: 42",
            "retry: 3000",
            "DATA: {\"text\":\"x\"}",
            "data:{\"text\":\"x\"}",
            "garbage",
        ] {
            assert_eq!(classify(line).kind, FrameKind::Ignorable, "{line:?}");
        }
    }

    #[test]
    fn sentinel_must_match_exactly() {
        let frame = classify("data: [DONE] extra");
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.raw_payload, "[DONE] extra");
    }
}
