//! Gateway transport: JSON messages over a websocket to a relay that runs
//! SCSP on its own side.
//!
//! Request: `{"id": 1, "sql": "...", "bindings": [...]}`
//! Reply:   `{"id": 1, "data": ..., "metadata": {...}}` or `{"id": 1, "error": {...}}`

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::Transport;
use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::protocol::{Command, Value};
use crate::rowset::{ColumnMetadata, Rowset, RowsetMetadata};

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
  id: u64,
  sql: &'a str,
  bindings: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GatewayReply {
  #[serde(default)]
  id: Option<u64>,
  #[serde(default)]
  data: Option<serde_json::Value>,
  #[serde(default)]
  metadata: Option<GatewayMetadata>,
  #[serde(default)]
  error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayMetadata {
  #[serde(default)]
  version: Option<u8>,
  number_of_rows: Option<usize>,
  number_of_columns: Option<usize>,
  columns: Option<Vec<GatewayColumn>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayColumn {
  name: String,
  #[serde(rename = "type", default)]
  column_type: Option<String>,
  #[serde(default)]
  database: Option<String>,
  #[serde(default)]
  table: Option<String>,
  #[serde(default)]
  column: Option<String>,
  #[serde(default)]
  not_null: Option<i64>,
  #[serde(default)]
  pk: Option<i64>,
  #[serde(default)]
  auto_increment: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayError {
  #[serde(default)]
  detail: Option<String>,
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  code: Option<serde_json::Value>,
  #[serde(default)]
  external_code: Option<serde_json::Value>,
  #[serde(default)]
  offset: Option<i64>,
}

fn code_string(code: Option<serde_json::Value>) -> String {
  match code {
    Some(serde_json::Value::String(s)) => s,
    Some(serde_json::Value::Null) | None => "0".to_string(),
    Some(other) => other.to_string(),
  }
}

impl From<GatewayError> for Error {
  fn from(e: GatewayError) -> Self {
    Error::Server {
      message: e.detail.or(e.message).unwrap_or_default(),
      code: code_string(e.code),
      external_code: code_string(e.external_code),
      offset: e.offset.unwrap_or(-1),
    }
  }
}

impl GatewayMetadata {
  fn into_rowset_metadata(self) -> Option<RowsetMetadata> {
    let columns = self.columns?;
    let columns: Vec<ColumnMetadata> = columns
      .into_iter()
      .map(|c| ColumnMetadata {
        name: c.name,
        column_type: c.column_type,
        database: c.database,
        table: c.table,
        column: c.column,
        not_null: c.not_null.map(|v| v != 0),
        primary_key: c.pk.map(|v| v != 0),
        auto_increment: c.auto_increment.map(|v| v != 0),
      })
      .collect();

    Some(RowsetMetadata {
      version: self.version.unwrap_or(1),
      number_of_rows: self.number_of_rows?,
      number_of_columns: self.number_of_columns?,
      columns,
    })
  }
}

impl GatewayReply {
  /// Map a relay reply onto a value. Rowset-shaped replies carry row count,
  /// column count and column descriptions in `metadata` and an array of
  /// rows in `data`.
  pub(crate) fn into_value(self) -> Result<Value> {
    if let Some(error) = self.error {
      return Err(error.into());
    }

    let rowset_metadata = self.metadata.and_then(GatewayMetadata::into_rowset_metadata);
    match (self.data, rowset_metadata) {
      (Some(serde_json::Value::Array(rows)), Some(metadata)) => {
        let mut data = Vec::with_capacity(metadata.number_of_rows * metadata.number_of_columns);
        for row in rows {
          match row {
            serde_json::Value::Array(cells) => data.extend(cells.into_iter().map(Value::from_json)),
            other => {
              return Err(Error::protocol(format!(
                "gateway rowset row is not an array: {}",
                other
              )))
            }
          }
        }
        Rowset::new(metadata, data).map(Value::Rowset)
      }
      (Some(data), _) => Ok(Value::from_json(data)),
      (None, _) => Ok(Value::Null),
    }
  }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
pub struct GatewayTransport {
  socket: Option<Socket>,
  next_id: u64,
  /// Id of the request awaiting its reply
  pending: Option<u64>,
}

impl GatewayTransport {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Transport for GatewayTransport {
  async fn connect(&mut self, options: &ConnectOptions) -> Result<()> {
    if self.socket.is_some() {
      return Ok(());
    }
    let url = options
      .gateway_url
      .as_deref()
      .ok_or_else(|| Error::Config("gateway transport requires a gateway URL".to_string()))?;

    let mut request = url.into_client_request()?;
    let credentials = format!("Bearer {}", options.to_connection_string());
    let header = HeaderValue::from_str(&credentials)
      .map_err(|e| Error::Config(format!("connection string is not a valid header: {}", e)))?;
    request.headers_mut().insert("Authorization", header);

    tracing::debug!(url, "connecting to gateway");
    let (socket, _) = connect_async(request).await?;
    self.socket = Some(socket);
    Ok(())
  }

  async fn write_command(&mut self, command: &Command) -> Result<()> {
    let socket = self.socket.as_mut().ok_or(Error::ConnectionNotEstablished)?;
    self.next_id += 1;
    let id = self.next_id;

    let request = GatewayRequest {
      id,
      sql: &command.query,
      bindings: command.params.iter().map(|p| p.to_json()).collect(),
    };
    socket
      .send(Message::Text(serde_json::to_string(&request)?.into()))
      .await?;
    self.pending = Some(id);
    Ok(())
  }

  async fn read_reply(&mut self) -> Result<Value> {
    let socket = self.socket.as_mut().ok_or(Error::ConnectionNotEstablished)?;
    let id = self
      .pending
      .take()
      .ok_or_else(|| Error::protocol("no gateway request awaiting a reply"))?;

    while let Some(message) = socket.next().await {
      match message? {
        Message::Text(text) => {
          let reply: GatewayReply = serde_json::from_str(&text)
            .map_err(|e| Error::protocol(format!("malformed gateway reply: {}", e)))?;
          if reply.id.is_some_and(|reply_id| reply_id != id) {
            tracing::trace!(expected = id, got = ?reply.id, "skipping stale gateway reply");
            continue;
          }
          return reply.into_value();
        }
        Message::Close(_) => break,
        _ => {}
      }
    }

    self.socket = None;
    Err(Error::ConnectionEnded)
  }

  async fn close(&mut self) -> Result<()> {
    if let Some(mut socket) = self.socket.take() {
      socket.close(None).await?;
    }
    Ok(())
  }

  fn is_open(&self) -> bool {
    self.socket.is_some()
  }

  fn needs_initialization(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn reply(json: serde_json::Value) -> GatewayReply {
    serde_json::from_value(json).unwrap()
  }

  #[test]
  fn test_rowset_reply() {
    let value = reply(json!({
      "id": 1,
      "data": [[1, "ada"], [2, "grace"]],
      "metadata": {
        "version": 1,
        "numberOfRows": 2,
        "numberOfColumns": 2,
        "columns": [{"name": "id"}, {"name": "name"}]
      }
    }))
    .into_value()
    .unwrap();

    let rowset = value.into_rowset().unwrap();
    assert_eq!(rowset.number_of_rows(), 2);
    assert_eq!(rowset.get_value(1, 1).unwrap(), &Value::Text("grace".into()));
  }

  #[test]
  fn test_scalar_reply() {
    let value = reply(json!({"data": "OK"})).into_value().unwrap();
    assert_eq!(value, Value::Text("OK".into()));
  }

  #[test]
  fn test_error_reply() {
    let err = reply(json!({"error": {"detail": "no such table: t", "code": 1}}))
      .into_value()
      .unwrap_err();
    match err {
      Error::Server { message, code, offset, .. } => {
        assert_eq!(message, "no such table: t");
        assert_eq!(code, "1");
        assert_eq!(offset, -1);
      }
      other => panic!("Expected server error, got {:?}", other),
    }
  }
}
