// Length-prefixed positional frame codec
//
// Layout per record, all ASCII:
//
//   <total-length>:<action-tag><status-tag><error-block><payload-block>
//
// total-length counts every byte after the first colon. The action tag is
// `a` plus a single-digit index into ACTION_NAMES, or the unknown sentinel
// `a?`. The status tag is `ok`, `er`, or `--` (absent). The error block is
// the literal `0` (absent) or `<len>:<text>`. The payload block is the
// literal `0` (absent) or a JSON blob.
//
// The length arithmetic assumes the JSON payload's own colons never land
// where they can defeat a prefix; that has not been proven for adversarial
// input, which is why the JSON codec is the default.

use crate::protocol::{Action, Frame, FrameCodec, ProtocolError, Status};

const TAG_UNKNOWN: &[u8; 2] = b"a?";
const STATUS_SUCCESS: &[u8; 2] = b"ok";
const STATUS_ERROR: &[u8; 2] = b"er";
const STATUS_ABSENT: &[u8; 2] = b"--";

/// Name an unknown action tag decodes to.
const UNKNOWN_ACTION: &str = "unknown";

#[derive(Debug, Default, Clone)]
pub struct CompactCodec;

impl CompactCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for CompactCodec {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();

        match Action::parse(&frame.action) {
            Some(action) => {
                body.push(b'a');
                body.push(b'0' + action.index() as u8);
            }
            None => body.extend_from_slice(TAG_UNKNOWN),
        }

        body.extend_from_slice(match frame.status {
            Some(Status::Success) => STATUS_SUCCESS,
            Some(Status::Error) => STATUS_ERROR,
            None => STATUS_ABSENT,
        });

        match &frame.error {
            Some(text) => {
                body.extend_from_slice(format!("{}:", text.len()).as_bytes());
                body.extend_from_slice(text.as_bytes());
            }
            None => body.push(b'0'),
        }

        match &frame.data {
            Some(data) => body.extend_from_slice(&serde_json::to_vec(data)?),
            None => body.push(b'0'),
        }

        let mut out = format!("{}:", body.len()).into_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, buf: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut pos = 0;

        while pos < buf.len() {
            let Some((len, body_start)) = read_length_prefix(&buf[pos..]) else {
                // Truncated or unusable prefix: wait for more bytes.
                break;
            };

            let body_start = pos + body_start;
            let Some(body_end) = body_start.checked_add(len) else {
                break;
            };
            let Some(span) = buf.get(body_start..body_end) else {
                // Length prefix names more bytes than we have.
                break;
            };
            pos = body_end;

            match parse_span(span) {
                Some(frame) => frames.push(frame),
                None => {
                    tracing::warn!("dropping malformed compact frame ({} bytes)", span.len());
                }
            }
        }

        frames
    }
}

/// Read a `<digits>:` prefix. Returns (length, offset past the colon), or
/// `None` when the prefix is truncated or not a length at all.
fn read_length_prefix(buf: &[u8]) -> Option<(usize, usize)> {
    let colon = buf.iter().position(|&b| b == b':')?;
    if colon == 0 || !buf[..colon].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let len: usize = std::str::from_utf8(&buf[..colon]).ok()?.parse().ok()?;
    Some((len, colon + 1))
}

fn parse_span(span: &[u8]) -> Option<Frame> {
    // Two tag pairs, then at least one byte each of error and payload.
    if span.len() < 6 {
        return None;
    }

    let action = match &span[0..2] {
        tag if tag == TAG_UNKNOWN => UNKNOWN_ACTION.to_string(),
        [b'a', idx @ b'0'..=b'9'] => {
            Action::from_index((idx - b'0') as usize)?.name().to_string()
        }
        _ => return None,
    };

    let status = match &span[2..4] {
        tag if tag == STATUS_SUCCESS => Some(Status::Success),
        tag if tag == STATUS_ERROR => Some(Status::Error),
        tag if tag == STATUS_ABSENT => None,
        _ => return None,
    };

    let (error, rest) = parse_error_block(&span[4..])?;

    let data = if rest == b"0" {
        None
    } else {
        Some(serde_json::from_slice(rest).ok()?)
    };

    Some(Frame {
        action,
        status,
        error,
        data,
    })
}

/// Parse `0` (absent) or `<len>:<text>`, returning the error and the
/// remaining payload bytes.
fn parse_error_block(buf: &[u8]) -> Option<(Option<String>, &[u8])> {
    let digits = buf.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }

    if buf.get(digits) == Some(&b':') {
        let len: usize = std::str::from_utf8(&buf[..digits]).ok()?.parse().ok()?;
        let text_start = digits + 1;
        let text_end = text_start.checked_add(len)?;
        let text = buf.get(text_start..text_end)?;
        let text = std::str::from_utf8(text).ok()?.to_string();
        Some((Some(text), &buf[text_end..]))
    } else if buf[0] == b'0' {
        // Bare absent marker; only its single byte is consumed.
        Some((None, &buf[1..]))
    } else {
        None
    }
}
