// Self-delimiting JSON frame codec

use crate::protocol::{Frame, FrameCodec, ProtocolError};

/// Encodes each record as one JSON object and decodes by scanning brace
/// depth, so several back-to-back records in one read all come out and a
/// single malformed record is dropped without losing the ones after it.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for JsonCodec {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(frame)?)
    }

    fn decode(&self, buf: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for span in split_objects(buf) {
            match serde_json::from_slice::<Frame>(span) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    tracing::warn!("dropping malformed frame: {}", e);
                }
            }
        }

        frames
    }
}

/// Split a buffer into complete top-level `{...}` spans.
///
/// Brace depth is tracked outside string literals only; braces inside a
/// JSON string (or escaped quotes) do not count. Bytes before the first
/// opening brace and any unclosed tail are ignored.
fn split_objects(buf: &[u8]) -> Vec<&[u8]> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        spans.push(&buf[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    spans
}
