//! Error types for the SQLite Cloud client driver.

use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Connection not established")]
  ConnectionNotEstablished,

  #[error("Connection error: {message}")]
  Connection {
    message: String,
    #[source]
    source: Option<BoxError>,
  },

  #[error("Connection closed")]
  ConnectionClosed,

  #[error("Connection ended by peer")]
  ConnectionEnded,

  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  #[error("Protocol error: {0}")]
  Protocol(String),

  #[error("{message}")]
  Server {
    message: String,
    code: String,
    external_code: String,
    offset: i64,
  },

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serialization(String),

  #[error("Invalid configuration: {0}")]
  Config(String),
}

impl Error {
  /// Wrap a transport failure together with its cause.
  pub fn connection<E>(message: impl Into<String>, source: E) -> Self
  where
    E: Into<BoxError>,
  {
    Self::Connection {
      message: message.into(),
      source: Some(source.into()),
    }
  }

  pub(crate) fn protocol(message: impl Into<String>) -> Self {
    Self::Protocol(message.into())
  }

  /// Error code. Server errors carry the code sent by the server, every
  /// other variant a fixed driver code.
  pub fn code(&self) -> &str {
    match self {
      Error::ConnectionNotEstablished => "ERR_CONNECTION_NOT_ESTABLISHED",
      Error::Connection { .. } | Error::Io(_) => "ERR_CONNECTION_ERROR",
      Error::ConnectionClosed => "ERR_CONNECTION_CLOSED",
      Error::ConnectionEnded => "ERR_CONNECTION_ENDED",
      Error::Timeout(_) => "ERR_CONNECTION_TIMEOUT",
      Error::Protocol(_) => "ERR_PROTOCOL",
      Error::Server { code, .. } => code,
      Error::Serialization(_) => "ERR_SERIALIZATION",
      Error::Config(_) => "ERR_CONFIG",
    }
  }

  pub fn external_code(&self) -> &str {
    match self {
      Error::Server { external_code, .. } => external_code,
      _ => "0",
    }
  }

  /// Byte offset reported by the server, `-1` when absent.
  pub fn offset(&self) -> i64 {
    match self {
      Error::Server { offset, .. } => *offset,
      _ => -1,
    }
  }

  /// Copy of this error for fan-out to several receivers. Wrapped causes
  /// are flattened into the message.
  pub(crate) fn detached(&self) -> Self {
    match self {
      Error::ConnectionNotEstablished => Error::ConnectionNotEstablished,
      Error::ConnectionClosed => Error::ConnectionClosed,
      Error::ConnectionEnded => Error::ConnectionEnded,
      Error::Timeout(limit) => Error::Timeout(*limit),
      Error::Protocol(message) => Error::Protocol(message.clone()),
      Error::Server { message, code, external_code, offset } => Error::Server {
        message: message.clone(),
        code: code.clone(),
        external_code: external_code.clone(),
        offset: *offset,
      },
      Error::Serialization(message) => Error::Serialization(message.clone()),
      Error::Config(message) => Error::Config(message.clone()),
      Error::Connection { message, source } => Error::Connection {
        message: match source {
          Some(cause) => format!("{}: {}", message, cause),
          None => message.clone(),
        },
        source: None,
      },
      Error::Io(e) => Error::Connection {
        message: e.to_string(),
        source: None,
      },
    }
  }

  /// Whether the connection that produced this error can no longer be used.
  pub fn is_fatal(&self) -> bool {
    !matches!(self, Error::Server { .. } | Error::Serialization(_) | Error::Config(_))
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
  fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
    Self::connection("gateway channel failure", e)
  }
}

impl From<native_tls::Error> for Error {
  fn from(e: native_tls::Error) -> Self {
    Self::connection("TLS failure", e)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
