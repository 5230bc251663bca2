//! Client tests for the SQLite Cloud Rust driver.

use std::time::Duration;

use sqlitecloud::{ConnectOptions, Connection, ConnectionState, Error, TransportKind, DEFAULT_PORT};

#[test]
fn test_connect_options_default() {
  let opts = ConnectOptions::new("localhost", DEFAULT_PORT);
  assert_eq!(opts.host, "localhost");
  assert_eq!(opts.port, 8860);
  assert!(opts.username.is_none());
  assert!(opts.compression);
  assert!(!opts.insecure);
  assert!(opts.timeout.is_none());
  assert_eq!(opts.client_id.len(), 36);
  assert_eq!(opts.transport_kind(), TransportKind::Direct);
}

#[test]
fn test_connect_options_builder_chain() {
  let opts = ConnectOptions::new("db.example.com", 9000)
    .with_api_key("key123")
    .with_database("music")
    .with_timeout(Duration::from_secs(5))
    .with_insecure(true)
    .with_verbose(true);

  assert_eq!(opts.api_key.as_deref(), Some("key123"));
  assert_eq!(opts.database.as_deref(), Some("music"));
  assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
  assert!(opts.insecure);
  assert!(opts.verbose);
}

#[test]
fn test_connection_string_token() {
  let opts =
    ConnectOptions::from_connection_string("sqlitecloud://node.example.com:9000?token=t0k&clientid=abc")
      .unwrap();
  assert_eq!(opts.token.as_deref(), Some("t0k"));
  assert_eq!(opts.client_id, "abc");
}

#[test]
fn test_connection_string_rejects_garbage() {
  let err = ConnectOptions::from_connection_string("not a url").unwrap_err();
  assert!(matches!(err, Error::Config(_)));
  assert_eq!(err.code(), "ERR_CONFIG");
}

#[test]
fn test_error_display() {
  let err = Error::ConnectionNotEstablished;
  assert_eq!(format!("{}", err), "Connection not established");

  let err = Error::Timeout(Duration::from_millis(1));
  assert!(format!("{}", err).contains("timed out"));

  let err = Error::Server {
    message: "no such table: t".to_string(),
    code: "1".to_string(),
    external_code: "0".to_string(),
    offset: -1,
  };
  assert_eq!(format!("{}", err), "no such table: t");
}

#[test]
fn test_error_codes_and_fatality() {
  assert_eq!(Error::ConnectionClosed.code(), "ERR_CONNECTION_CLOSED");
  assert_eq!(Error::ConnectionEnded.code(), "ERR_CONNECTION_ENDED");
  assert_eq!(Error::Timeout(Duration::from_secs(1)).code(), "ERR_CONNECTION_TIMEOUT");
  assert_eq!(Error::ConnectionClosed.offset(), -1);
  assert_eq!(Error::ConnectionClosed.external_code(), "0");

  assert!(Error::Timeout(Duration::from_secs(1)).is_fatal());
  assert!(Error::Protocol("bad".into()).is_fatal());
  assert!(!Error::Config("bad".into()).is_fatal());
}

#[test]
fn test_connection_error_keeps_cause() {
  let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
  let err = Error::connection("Failed to connect to h:1", io);
  assert_eq!(err.code(), "ERR_CONNECTION_ERROR");
  let source = std::error::Error::source(&err).unwrap();
  assert_eq!(source.to_string(), "refused");
}

#[tokio::test]
async fn test_connect_refused() {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);

  let connection = Connection::new(ConnectOptions::new("127.0.0.1", port).with_insecure(true));
  let err = connection.connect().await.unwrap_err();
  assert!(matches!(err, Error::Connection { .. }));
  assert_eq!(connection.state(), ConnectionState::Disconnected);
  assert!(!connection.is_connected());
}

#[tokio::test]
async fn test_send_before_connect() {
  let connection = Connection::new(ConnectOptions::new("127.0.0.1", 1).with_insecure(true));
  let err = connection.send("SELECT 1").await.unwrap_err();
  assert!(matches!(err, Error::ConnectionNotEstablished));
}
