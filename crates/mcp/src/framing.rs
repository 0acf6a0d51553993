//! LSP-style framing over byte streams.
//!
//! Every message is `Content-Length: <N>\r\n\r\n<N bytes of JSON>`. These
//! helpers are synchronous; callers run them on dedicated threads or via
//! `spawn_blocking`.

use std::io::{BufRead, Write};

use serde_json::Value;

use cerise_domain::error::{Error, Result};

/// Read one framed JSON message. `Ok(None)` signals a clean EOF at a frame
/// boundary.
pub fn read_message(reader: &mut impl BufRead) -> Result<Option<Value>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|e| Error::Transport(format!("framing read failed: {e}")))?;
        if bytes == 0 {
            return match content_length {
                None => Ok(None),
                Some(_) => Err(Error::Transport("EOF inside frame header".into())),
            };
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    Error::Transport(format!("invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(parsed);
            }
        }
    }

    let length =
        content_length.ok_or_else(|| Error::Transport("missing Content-Length header".into()))?;
    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::Transport(format!("EOF while reading body: {e}")))?;
    let value = serde_json::from_slice(&body)
        .map_err(|e| Error::Transport(format!("invalid JSON-RPC payload: {e}")))?;
    Ok(Some(value))
}

/// Write one framed JSON message and flush.
pub fn write_message(writer: &mut impl Write, payload: &Value) -> Result<()> {
    let body = serde_json::to_vec(payload)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())
        .map_err(|e| Error::Transport(format!("framing write failed: {e}")))?;
    writer
        .write_all(&body)
        .map_err(|e| Error::Transport(format!("framing write failed: {e}")))?;
    writer
        .flush()
        .map_err(|e| Error::Transport(format!("framing flush failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn write_then_read_round_trip() {
        let payload = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
        let mut buf = Vec::new();
        write_message(&mut buf, &payload).unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Content-Length: "));
        assert!(text.contains("\r\n\r\n"));

        let mut cursor = Cursor::new(buf);
        let read = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(read, payload);
        assert!(read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn content_length_is_bytes_not_chars() {
        let payload = serde_json::json!({ "text": "héllo 世界" });
        let mut buf = Vec::new();
        write_message(&mut buf, &payload).unwrap();
        let mut cursor = Cursor::new(buf);
        let read = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(read["text"], "héllo 世界");
    }

    #[test]
    fn missing_content_length_is_transport_error() {
        let mut cursor = Cursor::new(b"X-Other: 1\r\n\r\n{}".to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("Content-Length"));
    }

    #[test]
    fn truncated_body_is_transport_error() {
        let mut cursor = Cursor::new(b"Content-Length: 100\r\n\r\n{}".to_vec());
        assert!(read_message(&mut cursor).is_err());
    }

    #[test]
    fn eof_at_boundary_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_message(&mut cursor).unwrap().is_none());
    }
}
