//! SCSP frame codec
//!
//! Every frame starts with a one-byte [`Tag`]. Integer, real and null frames
//! run up to the first space; every other frame carries a decimal length and
//! a space before its payload:
//!
//! ```text
//! :42           integer
//! +5 hello      text
//! _             null
//! =8 2 :1 :2    array of two integers
//! ```
//!
//! Decoding is driven from an accumulation buffer: [`decode`] reports
//! [`Decoded::Incomplete`] until the whole frame has arrived.

use crate::compression::decompress_block;
use crate::error::{Error, Result};
use crate::protocol::{Command, Param, Tag, Value};
use crate::rowset::{ColumnMetadata, Rowset, RowsetMetadata};

/// Longest header (tag, digits and separator) accepted before a space shows up
const MAX_HEADER_LEN: usize = 64;

/// A complete frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
  Value(Value),
  /// Raw bytes of one rowset chunk frame, kept for reassembly
  Chunk(Vec<u8>),
  /// Unsolicited pubsub payload
  Push(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
  Incomplete,
  Complete { frame: Frame, consumed: usize },
}

// ============================================================================
// Encoding
// ============================================================================

fn push_header(buf: &mut Vec<u8>, tag: Tag, len: usize) {
  buf.push(tag as u8);
  buf.extend_from_slice(len.to_string().as_bytes());
  buf.push(b' ');
}

fn push_scalar(buf: &mut Vec<u8>, tag: Tag, text: &str) {
  buf.push(tag as u8);
  buf.extend_from_slice(text.as_bytes());
  buf.push(b' ');
}

fn encode_text(buf: &mut Vec<u8>, text: &str, zero_terminated: bool) {
  if zero_terminated {
    push_header(buf, Tag::ZeroText, text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
  } else {
    push_header(buf, Tag::Text, text.len());
    buf.extend_from_slice(text.as_bytes());
  }
}

fn encode_param(buf: &mut Vec<u8>, param: &Param) {
  match param {
    Param::Null => buf.extend_from_slice(b"_ "),
    Param::Integer(i) => push_scalar(buf, Tag::Integer, &i.to_string()),
    Param::Bool(b) => push_scalar(buf, Tag::Integer, if *b { "1" } else { "0" }),
    Param::Real(f) => push_scalar(buf, Tag::Float, &f.to_string()),
    Param::Text(s) => encode_text(buf, s, true),
    Param::Blob(bytes) => {
      push_header(buf, Tag::Blob, bytes.len());
      buf.extend_from_slice(bytes);
    }
    Param::List(items) => {
      let mut body = format!("{} ", items.len()).into_bytes();
      for item in items {
        encode_param(&mut body, item);
      }
      push_header(buf, Tag::Array, body.len());
      buf.extend_from_slice(&body);
    }
  }
}

/// Encode a command.
///
/// A command without parameters is a single text frame. With parameters it
/// becomes an array of the zero-terminated query followed by each parameter.
pub fn encode(command: &Command) -> Vec<u8> {
  let mut buf = Vec::new();

  if command.params.is_empty() {
    encode_text(&mut buf, &command.query, false);
    return buf;
  }

  let mut body = format!("{} ", command.params.len() + 1).into_bytes();
  encode_text(&mut body, &command.query, true);
  for param in &command.params {
    encode_param(&mut body, param);
  }

  push_header(&mut buf, Tag::Array, body.len());
  buf.extend_from_slice(&body);
  buf
}

// ============================================================================
// Decoding
// ============================================================================

/// Read position over a frame buffer
#[derive(Debug)]
struct Cursor<'a> {
  buf: &'a [u8],
  pos: usize,
  /// Accept payloads shorter than their declared length
  lenient: bool,
}

impl<'a> Cursor<'a> {
  fn new(buf: &'a [u8]) -> Self {
    Self {
      buf,
      pos: 0,
      lenient: false,
    }
  }

  fn lenient(buf: &'a [u8]) -> Self {
    Self {
      buf,
      pos: 0,
      lenient: true,
    }
  }

  fn position(&self) -> usize {
    self.pos
  }

  fn remaining(&self) -> usize {
    self.buf.len() - self.pos
  }

  fn advance(&mut self, n: usize) {
    self.pos = (self.pos + n).min(self.buf.len());
  }

  fn next_byte(&mut self) -> Result<u8> {
    let byte = *self
      .buf
      .get(self.pos)
      .ok_or_else(|| Error::protocol("unexpected end of frame"))?;
    self.advance(1);
    Ok(byte)
  }

  fn take(&mut self, n: usize) -> Result<&'a [u8]> {
    let buf: &'a [u8] = self.buf;
    if n > self.remaining() && !self.lenient {
      return Err(Error::protocol(format!(
        "frame declares {} payload bytes, {} available",
        n,
        self.remaining()
      )));
    }
    let n = n.min(self.remaining());
    let start = self.pos;
    self.advance(n);
    Ok(&buf[start..start + n])
  }

  fn take_until(&mut self, delim: u8) -> Result<&'a [u8]> {
    let buf: &'a [u8] = self.buf;
    let rest = &buf[self.pos..];
    let end = rest
      .iter()
      .position(|&b| b == delim)
      .ok_or_else(|| Error::protocol("missing field separator"))?;
    self.advance(end + 1);
    Ok(&rest[..end])
  }

  /// Next space-terminated field
  fn token(&mut self) -> Result<&'a str> {
    let raw = self.take_until(b' ')?;
    std::str::from_utf8(raw).map_err(|_| Error::protocol("invalid UTF-8 in frame header"))
  }

  fn since(&self, start: usize) -> &'a [u8] {
    let buf: &'a [u8] = self.buf;
    &buf[start..self.pos]
  }
}

fn parse_tag(byte: u8) -> Result<Tag> {
  Tag::try_from(byte)
    .map_err(|b| Error::protocol(format!("unknown frame tag {:?}", b as char)))
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
  text.parse::<T>()
    .map_err(|_| Error::protocol(format!("invalid {}: {:?}", what, text)))
}

/// Total byte length of the frame at the start of `buf`, or `None` while it
/// is still incomplete.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
  let Some(&first) = buf.first() else {
    return Ok(None);
  };
  let tag = parse_tag(first)?;

  let Some(space) = buf.iter().take(MAX_HEADER_LEN).position(|&b| b == b' ') else {
    if buf.len() >= MAX_HEADER_LEN {
      return Err(Error::protocol("frame header too long"));
    }
    return Ok(None);
  };

  if !tag.has_length() {
    return Ok(Some(space + 1));
  }

  let header = std::str::from_utf8(&buf[1..space])
    .map_err(|_| Error::protocol("invalid UTF-8 in frame header"))?;
  let len: usize = parse_number(header, "frame length")?;
  let total = (space + 1)
    .checked_add(len)
    .ok_or_else(|| Error::protocol(format!("frame length {} out of range", len)))?;

  Ok((buf.len() >= total).then_some(total))
}

/// Decode the frame at the start of `buf` if it has fully arrived.
///
/// Error frames decode to [`Error::Server`].
pub fn decode(buf: &[u8]) -> Result<Decoded> {
  let Some(len) = frame_length(buf)? else {
    return Ok(Decoded::Incomplete);
  };

  let mut cursor = Cursor::new(&buf[..len]);
  let frame = parse_frame(&mut cursor)?;
  Ok(Decoded::Complete {
    frame,
    consumed: len,
  })
}

/// Decode a frame the caller already knows is complete, without checking
/// the declared payload length; a short payload is taken as-is.
pub fn decode_complete(buf: &[u8]) -> Result<Frame> {
  let mut cursor = Cursor::lenient(buf);
  parse_frame(&mut cursor)
}

fn parse_frame(cursor: &mut Cursor<'_>) -> Result<Frame> {
  let start = cursor.position();
  let tag = parse_tag(cursor.next_byte()?)?;

  match tag {
    Tag::Integer => {
      let value = parse_number(cursor.token()?, "integer")?;
      Ok(Frame::Value(Value::Integer(value)))
    }
    Tag::Float => {
      let value = parse_number(cursor.token()?, "real")?;
      Ok(Frame::Value(Value::Float(value)))
    }
    Tag::Null => {
      cursor.take_until(b' ')?;
      Ok(Frame::Value(Value::Null))
    }
    _ => {
      let len: usize = parse_number(cursor.token()?, "frame length")?;
      let payload = cursor.take(len)?;
      match tag {
        Tag::RowsetChunk => Ok(Frame::Chunk(cursor.since(start).to_vec())),
        Tag::Compressed => decompress_frame(payload),
        Tag::PubSub => Ok(Frame::Push(parse_push(payload))),
        _ => parse_payload(tag, payload).map(Frame::Value),
      }
    }
  }
}

/// A nested frame inside an array or rowset
fn parse_value(cursor: &mut Cursor<'_>) -> Result<Value> {
  match parse_frame(cursor)? {
    Frame::Value(value) => Ok(value),
    Frame::Chunk(_) => Err(Error::protocol("rowset chunk nested inside another frame")),
    Frame::Push(_) => Err(Error::protocol("pubsub frame nested inside another frame")),
  }
}

fn parse_values(cursor: &mut Cursor<'_>, count: usize) -> Result<Vec<Value>> {
  let mut values = Vec::with_capacity(count.min(cursor.remaining()));
  for _ in 0..count {
    values.push(parse_value(cursor)?);
  }
  Ok(values)
}

fn utf8(payload: &[u8]) -> Result<String> {
  String::from_utf8(payload.to_vec()).map_err(|_| Error::protocol("invalid UTF-8 in text frame"))
}

fn parse_payload(tag: Tag, payload: &[u8]) -> Result<Value> {
  match tag {
    Tag::Text | Tag::Command => utf8(payload).map(Value::Text),
    Tag::ZeroText => {
      let text = payload.strip_suffix(&[0]).unwrap_or(payload);
      utf8(text).map(Value::Text)
    }
    Tag::Blob => Ok(Value::Blob(payload.to_vec())),
    Tag::Json => serde_json::from_slice(payload)
      .map(Value::Json)
      .map_err(|e| Error::protocol(format!("invalid JSON frame: {}", e))),
    Tag::Array => parse_array(payload),
    Tag::Rowset => parse_rowset(payload).map(Value::Rowset),
    Tag::Error => Err(parse_error(payload)),
    other => Err(Error::protocol(format!(
      "unexpected {:?} frame in value position",
      other
    ))),
  }
}

fn parse_array(payload: &[u8]) -> Result<Value> {
  let mut cursor = Cursor::new(payload);
  let count: usize = parse_number(cursor.token()?, "array length")?;
  parse_values(&mut cursor, count).map(Value::Array)
}

/// `<code>[:<extCode>[:<offset>]] <message>`
fn parse_error(payload: &[u8]) -> Error {
  let text = String::from_utf8_lossy(payload);
  let text: &str = &text;
  let (head, message) = text.split_once(' ').unwrap_or((text, ""));

  let mut parts = head.splitn(3, ':');
  let code = parts.next().filter(|s| !s.is_empty()).unwrap_or("0");
  let external_code = parts.next().filter(|s| !s.is_empty()).unwrap_or("0");
  let offset = parts.next().and_then(|s| s.parse().ok()).unwrap_or(-1);

  Error::Server {
    message: message.to_string(),
    code: code.to_string(),
    external_code: external_code.to_string(),
    offset,
  }
}

fn parse_push(payload: &[u8]) -> Value {
  match serde_json::from_slice(payload) {
    Ok(json) => Value::Json(json),
    Err(_) => Value::Text(String::from_utf8_lossy(payload).into_owned()),
  }
}

/// `<compressedLen> <decompressedLen> <innerHeader><compressedBytes>`
fn decompress_frame(payload: &[u8]) -> Result<Frame> {
  let mut cursor = Cursor::new(payload);
  let compressed_len: usize = parse_number(cursor.token()?, "compressed length")?;
  let decompressed_len: usize = parse_number(cursor.token()?, "decompressed length")?;

  let body = &payload[cursor.position()..];
  if compressed_len > body.len() {
    return Err(Error::protocol(format!(
      "compressed frame declares {} bytes, {} available",
      compressed_len,
      body.len()
    )));
  }

  let (header, compressed) = body.split_at(body.len() - compressed_len);
  if header.is_empty() {
    return Err(Error::protocol("compressed frame carries no inner header"));
  }

  let decompressed = decompress_block(compressed, decompressed_len)?;
  let mut inner = Vec::with_capacity(header.len() + decompressed.len());
  inner.extend_from_slice(header);
  inner.extend_from_slice(&decompressed);
  tracing::trace!(
    compressed = compressed_len,
    decompressed = decompressed_len,
    tag = %(header[0] as char),
    "decompressed frame"
  );

  match decode(&inner)? {
    Decoded::Complete { frame, .. } => Ok(frame),
    Decoded::Incomplete => Err(Error::protocol(
      "compressed frame holds an incomplete inner frame",
    )),
  }
}

// ============================================================================
// Rowsets
// ============================================================================

/// `<index>:<version> <rows> <columns>` at the start of a rowset payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowsetHeader {
  pub index: usize,
  pub version: u8,
  pub rows: usize,
  pub columns: usize,
}

impl RowsetHeader {
  fn value_count(&self) -> Result<usize> {
    self.rows
      .checked_mul(self.columns)
      .ok_or_else(|| Error::protocol("rowset dimensions overflow"))
  }

  pub fn is_terminator(&self) -> bool {
    self.index == 0 && self.rows == 0 && self.columns == 0
  }
}

fn parse_rowset_header(cursor: &mut Cursor<'_>) -> Result<RowsetHeader> {
  let first = cursor.token()?;
  let (index, version) = match first.split_once(':') {
    Some((index, version)) => (
      parse_number(index, "rowset index")?,
      parse_number(version, "rowset version")?,
    ),
    None => (parse_number(first, "rowset index")?, 1),
  };
  let rows = parse_number(cursor.token()?, "row count")?;
  let columns = parse_number(cursor.token()?, "column count")?;

  Ok(RowsetHeader {
    index,
    version,
    rows,
    columns,
  })
}

fn text_field(value: Value) -> Result<String> {
  match value {
    Value::Text(s) => Ok(s),
    Value::Null => Ok(String::new()),
    Value::Integer(i) => Ok(i.to_string()),
    Value::Float(f) => Ok(f.to_string()),
    other => Err(Error::protocol(format!(
      "unexpected column metadata value {:?}",
      other
    ))),
  }
}

fn optional_text(value: Value) -> Result<Option<String>> {
  match value {
    Value::Null => Ok(None),
    other => text_field(other).map(Some),
  }
}

fn optional_flag(value: Value) -> Result<Option<bool>> {
  match value {
    Value::Null => Ok(None),
    Value::Integer(i) => Ok(Some(i != 0)),
    Value::Text(s) => parse_number::<i64>(&s, "column flag").map(|i| Some(i != 0)),
    other => Err(Error::protocol(format!("unexpected column flag {:?}", other))),
  }
}

/// Column metadata is sent in passes of `count` fields: all names, then (for
/// version 2) all types, databases, tables, origin names and the three flags.
fn parse_columns(cursor: &mut Cursor<'_>, version: u8, count: usize) -> Result<Vec<ColumnMetadata>> {
  if version != 1 && version != 2 {
    return Err(Error::protocol(format!("unsupported rowset version {}", version)));
  }

  let mut columns = Vec::with_capacity(count.min(cursor.remaining()));
  for _ in 0..count {
    columns.push(ColumnMetadata::named(text_field(parse_value(cursor)?)?));
  }

  if version == 2 {
    for column in columns.iter_mut() {
      column.column_type = optional_text(parse_value(cursor)?)?;
    }
    for column in columns.iter_mut() {
      column.database = optional_text(parse_value(cursor)?)?;
    }
    for column in columns.iter_mut() {
      column.table = optional_text(parse_value(cursor)?)?;
    }
    for column in columns.iter_mut() {
      column.column = optional_text(parse_value(cursor)?)?;
    }
    for column in columns.iter_mut() {
      column.not_null = optional_flag(parse_value(cursor)?)?;
    }
    for column in columns.iter_mut() {
      column.primary_key = optional_flag(parse_value(cursor)?)?;
    }
    for column in columns.iter_mut() {
      column.auto_increment = optional_flag(parse_value(cursor)?)?;
    }
  }

  Ok(columns)
}

fn parse_rowset(payload: &[u8]) -> Result<Rowset> {
  let mut cursor = Cursor::new(payload);
  let header = parse_rowset_header(&mut cursor)?;
  let columns = parse_columns(&mut cursor, header.version, header.columns)?;
  let data = parse_values(&mut cursor, header.value_count()?)?;

  Rowset::new(
    RowsetMetadata {
      version: header.version,
      number_of_rows: header.rows,
      number_of_columns: header.columns,
      columns,
    },
    data,
  )
}

/// Payload of a raw chunk frame (`/<len> <payload>`)
fn chunk_payload(chunk: &[u8]) -> Result<&[u8]> {
  let mut cursor = Cursor::new(chunk);
  if parse_tag(cursor.next_byte()?)? != Tag::RowsetChunk {
    return Err(Error::protocol("expected a rowset chunk frame"));
  }
  let len: usize = parse_number(cursor.token()?, "frame length")?;
  cursor.take(len)
}

pub(crate) fn chunk_header(chunk: &[u8]) -> Result<RowsetHeader> {
  let mut cursor = Cursor::new(chunk_payload(chunk)?);
  parse_rowset_header(&mut cursor)
}

/// Whether a raw chunk frame is the end-of-stream chunk (`/6 0 0 0 `)
pub fn is_chunk_terminator(chunk: &[u8]) -> Result<bool> {
  Ok(chunk_header(chunk)?.is_terminator())
}

/// Reassemble the chunks of a streamed rowset, terminator excluded.
///
/// The first chunk (index 1) carries the column metadata; every chunk adds
/// its rows in arrival order.
pub fn decode_rowset_chunks(chunks: &[Vec<u8>]) -> Result<Rowset> {
  let mut shape: Option<(u8, Vec<ColumnMetadata>)> = None;
  let mut rows = 0usize;
  let mut data = Vec::new();

  for chunk in chunks {
    let mut cursor = Cursor::new(chunk_payload(chunk)?);
    let header = parse_rowset_header(&mut cursor)?;

    let width = match &shape {
      Some((_, columns)) => columns.len(),
      None => {
        if header.index != 1 {
          return Err(Error::protocol(format!(
            "rowset stream starts at chunk {}",
            header.index
          )));
        }
        let columns = parse_columns(&mut cursor, header.version, header.columns)?;
        let width = columns.len();
        shape = Some((header.version, columns));
        width
      }
    };

    if header.columns != width {
      return Err(Error::protocol(format!(
        "chunk {} has {} columns, expected {}",
        header.index, header.columns, width
      )));
    }

    data.extend(parse_values(&mut cursor, header.value_count()?)?);
    rows += header.rows;
  }

  let (version, columns) = shape.unwrap_or((1, Vec::new()));
  Rowset::new(
    RowsetMetadata {
      version,
      number_of_rows: rows,
      number_of_columns: columns.len(),
      columns,
    },
    data,
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![tag];
    buf.extend_from_slice(payload.len().to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(payload);
    buf
  }

  fn value(buf: &[u8]) -> Value {
    match decode(buf).unwrap() {
      Decoded::Complete {
        frame: Frame::Value(v),
        consumed,
      } => {
        assert_eq!(consumed, buf.len());
        v
      }
      other => panic!("Expected value, got {:?}", other),
    }
  }

  #[test]
  fn test_encode_params() {
    let cmd = Command::new("SELECT ?, ?").bind(7).bind("a");
    let body = b"3 !12 SELECT ?, ?\0:7 !2 a\0";
    let mut expected = format!("={} ", body.len()).into_bytes();
    expected.extend_from_slice(body);
    assert_eq!(encode(&cmd), expected);
  }

  #[test]
  fn test_encode_null_bool_blob_real() {
    let cmd = Command::new("X")
      .bind(Param::Null)
      .bind(true)
      .bind(vec![1u8, 2])
      .bind(1.5);
    let encoded = encode(&cmd);
    let mut body = b"5 !2 X\0_ :1 $2 ".to_vec();
    body.extend_from_slice(&[1, 2]);
    body.extend_from_slice(b",1.5 ");
    let mut expected = format!("={} ", body.len()).into_bytes();
    expected.extend_from_slice(&body);
    assert_eq!(encoded, expected);
  }

  #[test]
  fn test_encode_nested_list() {
    let cmd = Command::new("Q").bind(Param::List(vec![Param::Integer(1), Param::Integer(2)]));
    let encoded = encode(&cmd);
    assert!(encoded.ends_with(b"=8 2 :1 :2 "));
  }

  #[test]
  fn test_incomplete_frames() {
    assert_eq!(decode(b"").unwrap(), Decoded::Incomplete);
    assert_eq!(decode(b":12").unwrap(), Decoded::Incomplete);
    assert_eq!(decode(b"+10 hello").unwrap(), Decoded::Incomplete);
    assert_eq!(decode(b"+1").unwrap(), Decoded::Incomplete);
  }

  #[test]
  fn test_unknown_tag() {
    assert!(matches!(decode(b"?3 abc"), Err(Error::Protocol(_))));
  }

  #[test]
  fn test_consumed_stops_at_frame_end() {
    match decode(b"+2 ok:5 ").unwrap() {
      Decoded::Complete { frame, consumed } => {
        assert_eq!(frame, Frame::Value(Value::Text("ok".into())));
        assert_eq!(consumed, 5);
      }
      other => panic!("Expected complete frame, got {:?}", other),
    }
  }

  #[test]
  fn test_zero_text_strips_nul() {
    assert_eq!(value(b"!6 hello\0"), Value::Text("hello".into()));
  }

  #[test]
  fn test_command_text() {
    assert_eq!(value(b"^4 PONG"), Value::Text("PONG".into()));
  }

  #[test]
  fn test_blob_is_opaque() {
    let buf = frame(b'$', &[0xff, 0x00, 0xfe]);
    assert_eq!(value(&buf), Value::Blob(vec![0xff, 0x00, 0xfe]));
  }

  #[test]
  fn test_json_frame() {
    let buf = frame(b'#', br#"{"a":[1,2]}"#);
    assert_eq!(value(&buf), Value::Json(serde_json::json!({"a": [1, 2]})));
  }

  #[test]
  fn test_heterogeneous_array() {
    let mut payload = b"3 :1 _ ".to_vec();
    payload.extend(frame(b'+', b"two"));
    let buf = frame(b'=', &payload);
    assert_eq!(
      value(&buf),
      Value::Array(vec![Value::Integer(1), Value::Null, Value::Text("two".into())])
    );
  }

  #[test]
  fn test_error_in_array_fails() {
    let mut payload = b"1 ".to_vec();
    payload.extend(frame(b'-', b"1 boom"));
    let buf = frame(b'=', &payload);
    assert!(matches!(decode(&buf), Err(Error::Server { .. })));
  }

  #[test]
  fn test_error_defaults() {
    let buf = frame(b'-', b"12 no such table");
    match decode(&buf) {
      Err(Error::Server {
        code,
        external_code,
        offset,
        message,
      }) => {
        assert_eq!(code, "12");
        assert_eq!(external_code, "0");
        assert_eq!(offset, -1);
        assert_eq!(message, "no such table");
      }
      other => panic!("Expected server error, got {:?}", other),
    }
  }

  #[test]
  fn test_rowset_v2() {
    let mut payload = b"0:2 1 2 ".to_vec();
    for f in [
      frame(b'+', b"id"),
      frame(b'+', b"name"),
      frame(b'+', b"INTEGER"),
      frame(b'+', b"TEXT"),
      frame(b'+', b"main"),
      frame(b'+', b"main"),
      frame(b'+', b"users"),
      frame(b'+', b"users"),
      frame(b'+', b"id"),
      frame(b'+', b"name"),
    ] {
      payload.extend(f);
    }
    payload.extend_from_slice(b":1 :0 :1 :0 :1 :0 ");
    payload.extend_from_slice(b":42 ");
    payload.extend(frame(b'+', b"ada"));

    let rowset = value(&frame(b'*', &payload)).into_rowset().unwrap();
    assert_eq!(rowset.version(), 2);
    assert_eq!(rowset.number_of_rows(), 1);
    let id = &rowset.columns()[0];
    assert_eq!(id.column_type.as_deref(), Some("INTEGER"));
    assert_eq!(id.table.as_deref(), Some("users"));
    assert_eq!(id.not_null, Some(true));
    assert_eq!(id.primary_key, Some(true));
    assert_eq!(id.auto_increment, Some(true));
    assert_eq!(rowset.columns()[1].primary_key, Some(false));
    assert_eq!(rowset.get_value(0, 1).unwrap(), &Value::Text("ada".into()));
  }

  #[test]
  fn test_compressed_text() {
    let text = b"abcabcabcabcabcabcabcabcabcabc";
    let compressed = lz4_flex::block::compress(text);
    let header = format!("+{} ", text.len());
    let mut payload = format!("{} {} ", compressed.len(), text.len()).into_bytes();
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(&compressed);
    let buf = frame(b'%', &payload);
    assert_eq!(
      value(&buf),
      Value::Text(String::from_utf8(text.to_vec()).unwrap())
    );
  }

  #[test]
  fn test_compressed_length_mismatch() {
    let text = b"zzzzzzzzzzzzzzzzzzzzzzzz";
    let compressed = lz4_flex::block::compress(text);
    let mut payload = format!("{} {} ", compressed.len(), text.len() + 4).into_bytes();
    payload.extend_from_slice(format!("+{} ", text.len() + 4).as_bytes());
    payload.extend_from_slice(&compressed);
    assert!(matches!(decode(&frame(b'%', &payload)), Err(Error::Protocol(_))));
  }

  #[test]
  fn test_oversized_length_is_protocol_error() {
    let err = decode(b"+18446744073709551615 x").unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
  }

  #[test]
  fn test_oversized_decompressed_length_is_protocol_error() {
    for declared in [usize::MAX, 1usize << 40] {
      let mut payload = format!("1 {} +1 ", declared).into_bytes();
      payload.push(0);
      let err = decode(&frame(b'%', &payload)).unwrap_err();
      assert!(matches!(err, Error::Protocol(_)), "{:?}", err);
    }
  }

  #[test]
  fn test_chunk_frame_is_handed_off() {
    let buf = b"/6 0 0 0 ";
    match decode(buf).unwrap() {
      Decoded::Complete {
        frame: Frame::Chunk(raw),
        consumed,
      } => {
        assert_eq!(raw, buf.to_vec());
        assert_eq!(consumed, 9);
        assert!(is_chunk_terminator(&raw).unwrap());
      }
      other => panic!("Expected chunk, got {:?}", other),
    }
  }

  #[test]
  fn test_push_frame() {
    let buf = frame(b'|', br#"{"channel":"news","payload":"hi"}"#);
    match decode(&buf).unwrap() {
      Decoded::Complete {
        frame: Frame::Push(Value::Json(json)),
        ..
      } => assert_eq!(json["channel"], "news"),
      other => panic!("Expected push, got {:?}", other),
    }
  }
}
