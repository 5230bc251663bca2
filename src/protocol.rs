//! Wire protocol types for SQLite Cloud (SCSP).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rowset::Rowset;

/// Default server port
pub const DEFAULT_PORT: u16 = 8860;

/// Terminal chunk of a streamed rowset
pub const ROWSET_CHUNKS_END: &[u8; 9] = b"/6 0 0 0 ";

/// One-byte frame tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
  Text = b'+',
  ZeroText = b'!',
  Error = b'-',
  Integer = b':',
  Float = b',',
  Rowset = b'*',
  RowsetChunk = b'/',
  Json = b'#',
  Null = b'_',
  Blob = b'$',
  Compressed = b'%',
  Command = b'^',
  Array = b'=',
  PubSub = b'|',
}

impl Tag {
  /// Integer, real and null frames end at the first space and carry no
  /// length header.
  pub fn has_length(self) -> bool {
    !matches!(self, Tag::Integer | Tag::Float | Tag::Null)
  }
}

impl TryFrom<u8> for Tag {
  type Error = u8;
  fn try_from(v: u8) -> Result<Self, u8> {
    match v {
      b'+' => Ok(Self::Text),
      b'!' => Ok(Self::ZeroText),
      b'-' => Ok(Self::Error),
      b':' => Ok(Self::Integer),
      b',' => Ok(Self::Float),
      b'*' => Ok(Self::Rowset),
      b'/' => Ok(Self::RowsetChunk),
      b'#' => Ok(Self::Json),
      b'_' => Ok(Self::Null),
      b'$' => Ok(Self::Blob),
      b'%' => Ok(Self::Compressed),
      b'^' => Ok(Self::Command),
      b'=' => Ok(Self::Array),
      b'|' => Ok(Self::PubSub),
      other => Err(other),
    }
  }
}

/// A decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Integer(i64),
  Float(f64),
  Text(String),
  Blob(Vec<u8>),
  Json(serde_json::Value),
  Array(Vec<Value>),
  Rowset(Rowset),
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Float(f) => Some(*f),
      Value::Integer(i) => Some(*i as f64),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Blob(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[Value]> {
    match self {
      Value::Array(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_rowset(&self) -> Option<&Rowset> {
    match self {
      Value::Rowset(rowset) => Some(rowset),
      _ => None,
    }
  }

  pub fn into_rowset(self) -> Option<Rowset> {
    match self {
      Value::Rowset(rowset) => Some(rowset),
      _ => None,
    }
  }

  /// Convert into JSON. Blobs become arrays of byte values, rowsets an
  /// array of row objects.
  pub fn to_json(&self) -> serde_json::Value {
    use serde_json::Value as Json;
    match self {
      Value::Null => Json::Null,
      Value::Integer(i) => Json::from(*i),
      Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
      Value::Text(s) => Json::String(s.clone()),
      Value::Blob(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
      Value::Json(j) => j.clone(),
      Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
      Value::Rowset(rowset) => rowset.to_json(),
    }
  }

  /// Map a JSON value onto the driver's value model. Booleans become 1/0
  /// integers and objects stay structured JSON.
  pub fn from_json(json: serde_json::Value) -> Self {
    use serde_json::Value as Json;
    match json {
      Json::Null => Value::Null,
      Json::Bool(b) => Value::Integer(i64::from(b)),
      Json::Number(n) => match n.as_i64() {
        Some(i) => Value::Integer(i),
        None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
      },
      Json::String(s) => Value::Text(s),
      Json::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
      object @ Json::Object(_) => Value::Json(object),
    }
  }
}

/// A bound command parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
  Null,
  Integer(i64),
  Real(f64),
  Bool(bool),
  Text(String),
  Blob(Vec<u8>),
  List(Vec<Param>),
}

impl Param {
  pub(crate) fn to_json(&self) -> serde_json::Value {
    use serde_json::Value as Json;
    match self {
      Param::Null => Json::Null,
      Param::Integer(i) => Json::from(*i),
      Param::Real(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
      Param::Bool(b) => Json::from(i64::from(*b)),
      Param::Text(s) => Json::String(s.clone()),
      Param::Blob(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
      Param::List(items) => Json::Array(items.iter().map(Param::to_json).collect()),
    }
  }
}

macro_rules! param_from_int {
  ($($t:ty),*) => {
    $(impl From<$t> for Param {
      fn from(v: $t) -> Self {
        Param::Integer(i64::from(v))
      }
    })*
  };
}

param_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Param {
  fn from(v: f32) -> Self {
    Param::Real(f64::from(v))
  }
}

impl From<f64> for Param {
  fn from(v: f64) -> Self {
    Param::Real(v)
  }
}

impl From<bool> for Param {
  fn from(v: bool) -> Self {
    Param::Bool(v)
  }
}

impl From<&str> for Param {
  fn from(v: &str) -> Self {
    Param::Text(v.to_string())
  }
}

impl From<String> for Param {
  fn from(v: String) -> Self {
    Param::Text(v)
  }
}

impl From<&[u8]> for Param {
  fn from(v: &[u8]) -> Self {
    Param::Blob(v.to_vec())
  }
}

impl From<Vec<u8>> for Param {
  fn from(v: Vec<u8>) -> Self {
    Param::Blob(v)
  }
}

impl From<Vec<Param>> for Param {
  fn from(v: Vec<Param>) -> Self {
    Param::List(v)
  }
}

impl<T: Into<Param>> From<Option<T>> for Param {
  fn from(v: Option<T>) -> Self {
    v.map_or(Param::Null, Into::into)
  }
}

/// Query text plus its ordered parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
  pub query: String,
  pub params: Vec<Param>,
}

impl Command {
  pub fn new(query: impl Into<String>) -> Self {
    Self {
      query: query.into(),
      params: Vec::new(),
    }
  }

  pub fn with_params(query: impl Into<String>, params: Vec<Param>) -> Self {
    Self {
      query: query.into(),
      params,
    }
  }

  /// Append one parameter
  pub fn bind(mut self, param: impl Into<Param>) -> Self {
    self.params.push(param.into());
    self
  }
}

impl From<&str> for Command {
  fn from(query: &str) -> Self {
    Command::new(query)
  }
}

impl From<String> for Command {
  fn from(query: String) -> Self {
    Command::new(query)
  }
}

static CREDENTIALS: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)\b(AUTH\s+(?:APIKEY|TOKEN|USER\s+\S+\s+(?:PASSWORD|HASH)))\s+[^;\s]*")
    .expect("credential pattern is valid")
});

/// Mask credentials in a command before it reaches a log line or an error.
pub fn anonymize_command(command: &str) -> String {
  CREDENTIALS.replace_all(command, "$1 ******").into_owned()
}
