use serde::Deserialize;
use tracing::debug;

/// Decoded payload of one data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `text`: a token to append to the answer.
    IncrementalToken(String),
    /// `full_text`: the authoritative answer so far.
    CumulativeText(String),
    /// `error`: a backend-reported failure.
    ErrorMessage(String),
    /// Truncated, invalid, or carrying none of the known fields.
    Unparseable,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    full_text: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Interprets the payload of a data frame.
///
/// Never fails: anything that cannot be decoded is returned as
/// [`Message::Unparseable`] and logged at debug level.
pub fn interpret(raw_payload: &str) -> Message {
    let payload = raw_payload.trim();
    if !(payload.starts_with('{') && payload.ends_with('}')) {
        debug!(payload_len = payload.len(), "skipping incomplete payload");
        return Message::Unparseable;
    }

    let raw: RawPayload = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(error = %err, payload_len = payload.len(), "skipping undecodable payload");
            return Message::Unparseable;
        }
    };

    if let Some(error) = raw.error.filter(|v| !v.is_null()) {
        return Message::ErrorMessage(error_text(&error));
    }
    // full_text wins over text when both are present.
    if let Some(full_text) = raw.full_text {
        return Message::CumulativeText(unescape(&full_text));
    }
    if let Some(text) = raw.text {
        return Message::IncrementalToken(unescape(&text));
    }
    Message::Unparseable
}

fn error_text(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Converts escape sequences left literally in payload text (`\n`, `\t`,
/// `\"`, `\'`, `\\`) into the characters they stand for.
///
/// Unknown escapes are kept verbatim.
pub fn unescape(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
