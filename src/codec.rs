//! Newline-delimited `{"opcode": ..., "body": ...}` envelopes.
//!
//! Each protocol keeps its own [`Registry`] mapping opcode strings to a
//! decoder for the body; the envelope format itself is shared.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A message that can be wrapped in an envelope.
pub trait Op {
    fn opcode(&self) -> &'static str;

    fn body(&self) -> Result<Value, serde_json::Error>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    opcode: String,
    #[serde(default)]
    body: Value,
}

type Decoder<T> = fn(Value) -> Result<T, serde_json::Error>;

/// Opcode → body decoder table for one protocol.
pub struct Registry<T> {
    decoders: HashMap<&'static str, Decoder<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register `decoder` for `opcode`.
    ///
    /// # Panics
    ///
    /// Panics if `opcode` is already registered.
    pub fn register(&mut self, opcode: &'static str, decoder: Decoder<T>) -> &mut Self {
        let previous = self.decoders.insert(opcode, decoder);
        assert!(previous.is_none(), "opcode {opcode:?} registered twice");
        self
    }

    pub fn knows(&self, opcode: &str) -> bool {
        self.decoders.contains_key(opcode)
    }

    /// Decode one envelope from a single line of text.
    pub fn decode(&self, line: &str) -> Result<T, CodecError> {
        self.decode_bytes(line.as_bytes())
    }

    /// Invalid UTF-8 is reported as a malformed message.
    fn decode_bytes(&self, line: &[u8]) -> Result<T, CodecError> {
        let envelope: Envelope = serde_json::from_slice(line)?;
        let decoder = self
            .decoders
            .get(envelope.opcode.as_str())
            .ok_or(CodecError::UnknownOpcode(envelope.opcode))?;
        Ok(decoder(envelope.body)?)
    }

    /// Read and decode the next envelope, skipping blank lines.
    /// Returns `Ok(None)` at end of stream.
    pub async fn read<R>(&self, reader: &mut R) -> Result<Option<T>, CodecError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(None);
            }
            if !line.trim_ascii().is_empty() {
                return self.decode_bytes(&line).map(Some);
            }
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap `op` in an envelope, without the trailing newline.
pub fn encode<O: Op + ?Sized>(op: &O) -> Result<String, CodecError> {
    let envelope = Envelope {
        opcode: op.opcode().to_string(),
        body: op.body()?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode `op` and write it as one line.
pub async fn write<W, O>(writer: &mut W, op: &O) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    O: Op + ?Sized,
{
    let mut line = encode(op)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Ping {
        Ping { n: u32 },
        Note(String),
    }

    impl Op for Ping {
        fn opcode(&self) -> &'static str {
            match self {
                Ping::Ping { .. } => "ping",
                Ping::Note(_) => "note",
            }
        }

        fn body(&self) -> Result<Value, serde_json::Error> {
            match self {
                Ping::Ping { n } => Ok(serde_json::json!({ "n": n })),
                Ping::Note(text) => serde_json::to_value(text),
            }
        }
    }

    fn registry() -> Registry<Ping> {
        let mut registry = Registry::new();
        registry
            .register("ping", |body| {
                #[derive(Deserialize)]
                struct Body {
                    n: u32,
                }
                serde_json::from_value::<Body>(body).map(|b| Ping::Ping { n: b.n })
            })
            .register("note", |body| serde_json::from_value(body).map(Ping::Note));
        registry
    }

    #[test]
    fn test_encode_envelope() {
        let line = encode(&Ping::Ping { n: 3 }).unwrap();
        assert_eq!(line, r#"{"opcode":"ping","body":{"n":3}}"#);
    }

    #[test]
    fn test_decode_known_opcodes() {
        let registry = registry();
        assert_eq!(
            registry.decode(r#"{"opcode":"note","body":"hello"}"#).unwrap(),
            Ping::Note("hello".to_string())
        );
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let err = registry()
            .decode(r#"{"opcode":"pong","body":{}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownOpcode(op) if op == "pong"));
    }

    #[test]
    fn test_decode_malformed_body() {
        let registry = registry();
        let err = registry
            .decode(r#"{"opcode":"ping","body":{"n":"x"}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        let err = registry.decode("not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = registry();
        registry.register("ping", |body| serde_json::from_value(body).map(Ping::Note));
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines_and_stops_at_eof() {
        let registry = registry();
        let input = b"\n{\"opcode\":\"ping\",\"body\":{\"n\":1}}\n\n" as &[u8];
        let mut reader = tokio::io::BufReader::new(input);
        assert_eq!(
            registry.read(&mut reader).await.unwrap(),
            Some(Ping::Ping { n: 1 })
        );
        assert!(registry.read(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_invalid_utf8_is_malformed() {
        let registry = registry();
        let input = b"{\"opcode\":\"note\",\"body\":\"\xff\"}\n{\"opcode\":\"note\",\"body\":\"ok\"}\n"
            as &[u8];
        let mut reader = tokio::io::BufReader::new(input);
        let err = registry.read(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        // the bad line was consumed whole
        assert_eq!(
            registry.read(&mut reader).await.unwrap(),
            Some(Ping::Note("ok".to_string()))
        );
    }
}
