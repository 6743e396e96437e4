/// IRC line codec: frames a TCP byte stream into IRC messages.
///
/// Splits on `\n` (dropping the `\r` that RFC 2812 clients put before it),
/// parses each line into a [`Message`], and serializes outgoing messages
/// with [`Message::encode`].
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{EncodeError, Message, ParseError};

/// Maximum line length (including `\r\n`).
/// RFC 2812 says 512 bytes. Allow more for chatty clients.
const MAX_LINE_LENGTH: usize = 8191;

/// Codec error: a protocol failure in either direction, or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames IRC messages on line boundaries.
#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                // No complete line yet. Check if buffer is getting too large.
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            if pos + 1 > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }

            let mut line_bytes = src.split_to(pos);
            src.advance(1); // skip \n
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            // Blank keep-alive lines carry nothing.
            if line_bytes.iter().all(|b| *b == b' ') {
                continue;
            }

            let line = std::str::from_utf8(&line_bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            return Ok(Some(Message::parse(line)?));
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.encode()?;
        dst.reserve(wire.len());
        dst.put_slice(wire.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    // ── Decoder ──────────────────────────────────────────────────

    #[test]
    fn decode_complete_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("NICK alice\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_partial_line_then_complete() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("NICK al");

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ice\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.params, vec!["alice"]);
    }

    #[test]
    fn decode_two_messages_in_one_read() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("NICK alice\r\nUSER alice 0 * :Alice A\r\n");

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.command, "NICK");

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.command, "USER");
        assert_eq!(second.params, vec!["alice", "0", "*"]);
        assert_eq!(second.trailing.as_deref(), Some("Alice A"));

        assert!(buf.is_empty());
    }

    #[test]
    fn decode_accepts_bare_lf_and_skips_blank_lines() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("\r\n\nPING :tok\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing.as_deref(), Some("tok"));
    }

    #[test]
    fn decode_rejects_oversized_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::LineTooLong));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"NICK \xff\xfe\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Io(_))));
    }

    // ── Encoder ──────────────────────────────────────────────────

    #[test]
    fn encode_writes_crlf_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        let msg = Message::new("001")
            .with_prefix("irc.example")
            .with_params(["alice"])
            .with_trailing("Welcome");
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b":irc.example 001 alice :Welcome\r\n");
    }

    #[test]
    fn encode_failure_writes_nothing() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        let msg = Message::new("PRIVMSG").with_params(["has space"]);
        let err = codec.encode(msg, &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::Encode(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn embedded_cr_is_not_relayed() {
        let mut codec = IrcCodec;
        let mut inbound = BytesMut::from("PRIVMSG bob :hi\r:evil.server 001 bob :pwned\r\n");
        let msg = codec.decode(&mut inbound).unwrap().unwrap();
        assert_eq!(msg.trailing.as_deref(), Some("hi\r:evil.server 001 bob :pwned"));

        let relay = msg.with_prefix("alice!a@host");
        let mut outbound = BytesMut::new();
        let err = codec.encode(relay, &mut outbound).unwrap_err();
        assert!(matches!(err, CodecError::Encode(EncodeError::LineBreak)));
        assert!(outbound.is_empty());
    }

    #[test]
    fn roundtrip_through_codec() {
        let mut codec = IrcCodec;
        let original = Message::new("PRIVMSG")
            .with_prefix("alice!a@host")
            .with_params(["#cove"])
            .with_trailing("Hello everyone!");

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }
}
