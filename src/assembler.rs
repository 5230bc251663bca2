//! Turns inbound bytes into settled responses.
//!
//! Bytes are appended to an accumulation buffer and handed to the codec. A
//! streamed rowset is collected chunk by chunk until the terminator chunk,
//! then decoded in one pass.

use crate::codec::{self, Decoded, Frame};
use crate::error::Result;
use crate::protocol::Value;

/// Outcome of a completed response
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
  /// Reply to the pending command
  Value(Value),
  /// Unsolicited pubsub payload
  Push(Value),
}

#[derive(Debug, Default)]
pub struct ResponseAssembler {
  buffer: Vec<u8>,
  chunks: Vec<Vec<u8>>,
}

impl ResponseAssembler {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_bytes(&mut self, bytes: &[u8]) {
    self.buffer.extend_from_slice(bytes);
  }

  /// Try to complete one response from the buffered bytes.
  ///
  /// Returns `Ok(None)` while more bytes are needed. Bytes past the settled
  /// frame stay buffered. On error the buffer and chunk list are discarded.
  pub fn poll(&mut self) -> Result<Option<Settled>> {
    let result = self.poll_inner();
    if result.is_err() {
      self.reset();
    }
    result
  }

  fn poll_inner(&mut self) -> Result<Option<Settled>> {
    loop {
      let (frame, consumed) = match codec::decode(&self.buffer)? {
        Decoded::Incomplete => return Ok(None),
        Decoded::Complete { frame, consumed } => (frame, consumed),
      };
      self.buffer.drain(..consumed);

      match frame {
        Frame::Value(value) => return Ok(Some(Settled::Value(value))),
        Frame::Push(value) => return Ok(Some(Settled::Push(value))),
        Frame::Chunk(chunk) => {
          if codec::is_chunk_terminator(&chunk)? {
            let rowset = codec::decode_rowset_chunks(&self.chunks)?;
            tracing::trace!(
              chunks = self.chunks.len(),
              rows = rowset.number_of_rows(),
              "rowset stream complete"
            );
            self.chunks.clear();
            return Ok(Some(Settled::Value(Value::Rowset(rowset))));
          }
          tracing::trace!(bytes = chunk.len(), "rowset chunk received");
          self.chunks.push(chunk);
        }
      }
    }
  }

  /// Feed bytes and try to settle
  pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<Settled>> {
    self.push_bytes(bytes);
    self.poll()
  }

  pub fn reset(&mut self) {
    self.buffer.clear();
    self.chunks.clear();
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty() && self.chunks.is_empty()
  }

  pub fn pending_chunks(&self) -> usize {
    self.chunks.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;

  #[test]
  fn test_value_split_across_reads() {
    let mut assembler = ResponseAssembler::new();
    assert_eq!(assembler.feed(b"+11 hello").unwrap(), None);
    assert_eq!(
      assembler.feed(b" world").unwrap(),
      Some(Settled::Value(Value::Text("hello world".into())))
    );
    assert!(assembler.is_empty());
  }

  #[test]
  fn test_trailing_bytes_are_kept() {
    let mut assembler = ResponseAssembler::new();
    assert_eq!(
      assembler.feed(b":1 :2 ").unwrap(),
      Some(Settled::Value(Value::Integer(1)))
    );
    assert_eq!(
      assembler.poll().unwrap(),
      Some(Settled::Value(Value::Integer(2)))
    );
    assert_eq!(assembler.poll().unwrap(), None);
  }

  #[test]
  fn test_server_error_resets() {
    let mut assembler = ResponseAssembler::new();
    let err = assembler.feed(b"-5 1 bad").unwrap_err();
    assert!(matches!(err, Error::Server { .. }));
    assert!(assembler.is_empty());
  }

  #[test]
  fn test_terminator_without_chunks() {
    let mut assembler = ResponseAssembler::new();
    match assembler.feed(b"/6 0 0 0 ").unwrap() {
      Some(Settled::Value(Value::Rowset(rowset))) => assert!(rowset.is_empty()),
      other => panic!("Expected rowset, got {:?}", other),
    }
  }
}
