// Rate-limited logging of frames and payloads that fail to decode.
use std::sync::atomic::{AtomicUsize, Ordering};

const DECODE_ERROR_LOG_LIMIT: usize = 20;
const PREVIEW_BYTES: usize = 64;

static DECODE_ERROR_LOGS: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn log_decode_error(
    context: &str,
    user: &str,
    err: &dyn std::error::Error,
    payload: &[u8],
) {
    let count = DECODE_ERROR_LOGS.fetch_add(1, Ordering::Relaxed);
    if count >= DECODE_ERROR_LOG_LIMIT {
        return;
    }
    let (hex, printable) = preview(payload);
    tracing::warn!(
        context,
        user,
        error = %err,
        payload_len = payload.len(),
        preview_hex = %hex,
        preview_printable = %printable,
        "cometload decode error"
    );
}

fn preview(payload: &[u8]) -> (String, String) {
    let preview = &payload[..payload.len().min(PREVIEW_BYTES)];
    let hex = preview
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    let printable = preview
        .iter()
        .map(|b| {
            let c = *b as char;
            if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            }
        })
        .collect::<String>();
    (hex, printable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    #[test]
    fn preview_masks_non_printable_bytes() {
        let (hex, printable) = preview(&[0x00, 0x01, 0xFF, b'A', b' ', b'{']);
        assert_eq!(hex, "00 01 ff 41 20 7b");
        assert_eq!(printable, "...A {");
    }

    #[test]
    fn preview_is_truncated() {
        let data = vec![b'X'; 100];
        let (hex, printable) = preview(&data);
        assert_eq!(printable.len(), PREVIEW_BYTES);
        assert_eq!(hex.split(' ').count(), PREVIEW_BYTES);
    }

    #[test]
    fn log_decode_error_does_not_panic_past_limit() {
        let err = SessionError::Framing(cometload_wire::Error::BadTrailer);
        for _ in 0..(DECODE_ERROR_LOG_LIMIT + 5) {
            log_decode_error("test_context", "test_1", &err, b"not json");
        }
        assert!(DECODE_ERROR_LOGS.load(Ordering::Relaxed) > DECODE_ERROR_LOG_LIMIT);
    }
}
