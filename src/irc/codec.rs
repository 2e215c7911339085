/// IRC line codec for the bridge's client connections.
///
/// Inbound, splits on `\n` (tolerating a preceding `\r`), decodes invalid
/// UTF-8 lossily and skips blank lines. Outbound, terminates with `\r\n`
/// and refuses to let a line break inside a parameter start a new command.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, ParseError};

/// Upper bound on a buffered inbound line (IRCv3 tags included).
const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(lf) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let line_bytes = src.split_to(lf);
            src.advance(1);

            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(Message::parse(line)?));
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire: String = item
            .to_wire()
            .chars()
            .map(|c| if matches!(c, '\r' | '\n' | '\0') { ' ' } else { c })
            .collect();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn decode_waits_for_line_end() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(":srv 001 bri");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"dge :Welcome\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["bridge", "Welcome"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_accepts_bare_lf_and_skips_blank_lines() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("\r\n\nPING :a\nPING :b\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().params, vec!["a"]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().params, vec!["b"]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_replaces_invalid_utf8() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b":n!u@h PRIVMSG #c :caf\xe9\r\n"[..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.params[1], "caf\u{fffd}");
    }

    #[test]
    fn decode_rejects_oversized_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong)));
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::join("#openttd"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"JOIN :#openttd\r\n");
    }

    #[test]
    fn encode_neutralises_embedded_line_breaks() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::privmsg("#c", "hi\r\nQUIT :pwned"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"PRIVMSG #c :hi  QUIT :pwned\r\n");
    }
}
