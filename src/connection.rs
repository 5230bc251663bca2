//! Connection engine.
//!
//! A [`Connection`] owns one transport and runs every operation through an
//! [`OperationsQueue`], so at most one command is in flight at a time.
//! Transport failures, protocol errors and timeouts tear the transport down
//! and leave the connection `Closed`; server errors fail only the command
//! that caused them.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::protocol::{anonymize_command, Command, Value};
use crate::queue::OperationsQueue;
use crate::transport::{self, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Ready,
  Busy,
  Closing,
  Closed,
}

/// Build the composite command sent right after the transport opens.
///
/// Clauses are emitted in a fixed order: fast reads on, credentials,
/// capability toggles, linearizable reads back on, database selection.
pub fn initialization_commands(options: &ConnectOptions) -> String {
  let mut commands = String::from("SET CLIENT KEY NONLINEARIZABLE TO 1; ");

  if let Some(api_key) = &options.api_key {
    commands.push_str(&format!("AUTH APIKEY {}; ", api_key));
  } else if let Some(token) = &options.token {
    commands.push_str(&format!("AUTH TOKEN {}; ", token));
  } else if let Some(username) = &options.username {
    let keyword = if options.password_hashed { "HASH" } else { "PASSWORD" };
    commands.push_str(&format!(
      "AUTH USER {} {} {}; ",
      username,
      keyword,
      options.password.as_deref().unwrap_or_default()
    ));
  }

  if options.compression {
    commands.push_str("SET CLIENT KEY COMPRESSION TO 1; ");
  }
  if options.zerotext {
    commands.push_str("SET CLIENT KEY ZEROTEXT TO 1; ");
  }
  if options.noblob {
    commands.push_str("SET CLIENT KEY NOBLOB TO 1; ");
  }
  if let Some(maxdata) = options.maxdata {
    commands.push_str(&format!("SET CLIENT KEY MAXDATA TO {}; ", maxdata));
  }
  if let Some(maxrows) = options.maxrows {
    commands.push_str(&format!("SET CLIENT KEY MAXROWS TO {}; ", maxrows));
  }
  if let Some(maxrowset) = options.maxrowset {
    commands.push_str(&format!("SET CLIENT KEY MAXROWSET TO {}; ", maxrowset));
  }

  if !options.non_linearizable {
    commands.push_str("SET CLIENT KEY NONLINEARIZABLE TO 0; ");
  }

  if let Some(database) = &options.database {
    if options.create {
      commands.push_str(&format!("CREATE DATABASE {} IF NOT EXISTS; ", database));
    }
    commands.push_str(&format!("USE DATABASE {}; ", database));
  }

  commands.truncate(commands.trim_end().len());
  commands
}

struct Shared {
  options: ConnectOptions,
  transport: tokio::sync::Mutex<Box<dyn Transport>>,
  state: parking_lot::Mutex<ConnectionState>,
  /// Flipped to `true` by `close` to abort the operation in flight
  shutdown: watch::Sender<bool>,
  queue: OperationsQueue,
}

/// Handle to one logical database connection. Clones share the connection.
#[derive(Clone)]
pub struct Connection {
  shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("host", &self.shared.options.host)
      .field("port", &self.shared.options.port)
      .field("state", &self.state())
      .finish()
  }
}

impl Connection {
  /// Create a disconnected connection using the transport `options` select
  pub fn new(options: ConnectOptions) -> Self {
    let transport = transport::for_options(&options);
    Self::with_transport(options, transport)
  }

  pub fn with_transport(options: ConnectOptions, transport: Box<dyn Transport>) -> Self {
    let (shutdown, _) = watch::channel(false);
    Self {
      shared: Arc::new(Shared {
        options,
        transport: tokio::sync::Mutex::new(transport),
        state: parking_lot::Mutex::new(ConnectionState::Disconnected),
        shutdown,
        queue: OperationsQueue::new(),
      }),
    }
  }

  /// Create and connect in one step
  pub async fn open(options: ConnectOptions) -> Result<Self> {
    let connection = Self::new(options);
    connection.connect().await?;
    Ok(connection)
  }

  /// Open the transport and run the initialization command.
  ///
  /// Resolves only after the initialization reply has been decoded.
  pub async fn connect(&self) -> Result<()> {
    let shared = Arc::clone(&self.shared);
    self.run(move || async move { shared.connect().await }).await
  }

  /// Send one command and wait for its decoded reply
  pub async fn send(&self, command: impl Into<Command>) -> Result<Value> {
    let command = command.into();
    let shared = Arc::clone(&self.shared);
    self.run(move || async move { shared.execute(command).await }).await
  }

  /// Abort the command in flight, drop queued ones and close the transport
  pub async fn close(&self) -> Result<()> {
    {
      let mut state = self.shared.state.lock();
      if *state == ConnectionState::Closed {
        return Ok(());
      }
      *state = ConnectionState::Closing;
    }
    self.shared.queue.clear();
    self.shared.shutdown.send_replace(true);

    let result = self.shared.transport.lock().await.close().await;
    self.shared.set_state(ConnectionState::Closed);
    tracing::debug!(host = %self.shared.options.host, "connection closed");
    result
  }

  pub fn state(&self) -> ConnectionState {
    *self.shared.state.lock()
  }

  pub fn is_connected(&self) -> bool {
    matches!(self.state(), ConnectionState::Ready | ConnectionState::Busy)
  }

  pub fn options(&self) -> &ConnectOptions {
    &self.shared.options
  }

  /// Queue `operation` and wait for its outcome. A job dropped by `close`
  /// or by a fatal error resolves to `ConnectionClosed`; a job that ended
  /// without reporting (a panic) closes the connection first.
  async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    self.shared.queue.enqueue(move |done| async move {
      let _ = tx.send(operation().await);
      done.complete();
    });
    match rx.await {
      Ok(result) => result,
      Err(_) => {
        self.shared.abandon().await;
        Err(Error::ConnectionClosed)
      }
    }
  }
}

impl Shared {
  fn set_state(&self, state: ConnectionState) {
    *self.state.lock() = state;
  }

  /// Tear down after an operation ended without reporting its outcome
  async fn abandon(&self) {
    {
      let mut state = self.state.lock();
      if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
        return;
      }
      *state = ConnectionState::Closed;
    }
    tracing::warn!(host = %self.options.host, "operation aborted, closing connection");
    self.queue.clear();
    self.shutdown.send_replace(true);
    if let Err(e) = self.transport.lock().await.close().await {
      tracing::debug!(error = %e, "transport close failed");
    }
  }

  fn log_command(&self, command: &str) {
    let masked = anonymize_command(command);
    if self.options.verbose {
      tracing::info!(client = %self.options.client_id, command = %masked, "send");
    } else {
      tracing::debug!(command = %masked, "send");
    }
  }

  /// Resolve to `ConnectionClosed` as soon as `close` is called
  async fn interruptible<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
    let mut shutdown = self.shutdown.subscribe();
    tokio::select! {
      result = operation => result,
      _ = shutdown.wait_for(|closing| *closing) => Err(Error::ConnectionClosed),
    }
  }

  async fn timed<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
    match self.options.timeout {
      Some(limit) => tokio::time::timeout(limit, operation)
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(limit))),
      None => operation.await,
    }
  }

  /// Write `command`, then wait for its reply. The timer starts only once
  /// the write has been flushed.
  async fn exchange(&self, transport: &mut Box<dyn Transport>, command: &Command) -> Result<Value> {
    self
      .interruptible(async {
        transport.write_command(command).await?;
        self.timed(transport.read_reply()).await
      })
      .await
  }

  async fn establish(&self, transport: &mut Box<dyn Transport>) -> Result<()> {
    self
      .interruptible(self.timed(transport.connect(&self.options)))
      .await?;

    if transport.needs_initialization() {
      let init = Command::new(initialization_commands(&self.options));
      self.log_command(&init.query);
      self.exchange(transport, &init).await?;
    }
    Ok(())
  }

  async fn connect(&self) -> Result<()> {
    {
      let mut state = self.state.lock();
      match *state {
        ConnectionState::Ready | ConnectionState::Busy => return Ok(()),
        ConnectionState::Closing | ConnectionState::Closed => return Err(Error::ConnectionClosed),
        ConnectionState::Disconnected | ConnectionState::Connecting => {
          *state = ConnectionState::Connecting
        }
      }
    }

    tracing::debug!(
      host = %self.options.host,
      port = self.options.port,
      transport = ?self.options.transport_kind(),
      "connecting"
    );

    let mut transport = self.transport.lock().await;
    match self.establish(&mut transport).await {
      Ok(()) => {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
          *state = ConnectionState::Ready;
        }
        drop(state);
        if self.options.verbose {
          tracing::info!(client = %self.options.client_id, host = %self.options.host, "connected");
        } else {
          tracing::debug!(host = %self.options.host, "connected");
        }
        Ok(())
      }
      Err(e) => {
        tracing::warn!(error = %e, host = %self.options.host, "connect failed");
        let _ = transport.close().await;
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
          *state = ConnectionState::Disconnected;
        }
        Err(e)
      }
    }
  }

  async fn execute(&self, command: Command) -> Result<Value> {
    {
      let mut state = self.state.lock();
      match *state {
        ConnectionState::Ready => *state = ConnectionState::Busy,
        ConnectionState::Disconnected | ConnectionState::Connecting => {
          return Err(Error::ConnectionNotEstablished)
        }
        ConnectionState::Closing | ConnectionState::Closed => return Err(Error::ConnectionClosed),
        ConnectionState::Busy => return Err(Error::protocol("a command is already in flight")),
      }
    }

    self.log_command(&command.query);
    let mut transport = self.transport.lock().await;
    let result = self.exchange(&mut transport, &command).await;

    match &result {
      Err(e) if e.is_fatal() => {
        tracing::warn!(
          error = %e,
          command = %anonymize_command(&command.query),
          "command failed, closing connection"
        );
        self.set_state(ConnectionState::Closed);
        self.queue.clear();
        if let Err(close_error) = transport.close().await {
          tracing::debug!(error = %close_error, "transport close failed");
        }
      }
      _ => {
        let mut state = self.state.lock();
        if *state == ConnectionState::Busy {
          *state = ConnectionState::Ready;
        }
      }
    }

    if self.options.verbose {
      tracing::info!(client = %self.options.client_id, ok = result.is_ok(), "settled");
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_initialization_order() {
    let options = ConnectOptions::new("h", 8860)
      .with_credentials("admin", "secret")
      .with_database("chinook.sqlite")
      .with_create(true);
    let commands = initialization_commands(&options);

    assert_eq!(
      commands,
      "SET CLIENT KEY NONLINEARIZABLE TO 1; \
       AUTH USER admin PASSWORD secret; \
       SET CLIENT KEY COMPRESSION TO 1; \
       SET CLIENT KEY NONLINEARIZABLE TO 0; \
       CREATE DATABASE chinook.sqlite IF NOT EXISTS; \
       USE DATABASE chinook.sqlite;"
    );
  }

  #[test]
  fn test_initialization_api_key_wins() {
    let options = ConnectOptions::new("h", 8860)
      .with_credentials("admin", "secret")
      .with_api_key("k3y")
      .with_compression(false);
    let commands = initialization_commands(&options);

    assert!(commands.contains("AUTH APIKEY k3y;"));
    assert!(!commands.contains("AUTH USER"));
    assert!(!commands.contains("COMPRESSION"));
  }

  #[test]
  fn test_initialization_limits_and_opt_out() {
    let mut options = ConnectOptions::new("h", 8860)
      .with_token("tok")
      .with_password_hash("u", "abcd");
    options.api_key = None;
    options.token = None;
    options.zerotext = true;
    options.noblob = true;
    options.maxdata = Some(1);
    options.maxrows = Some(2);
    options.maxrowset = Some(3);
    options.non_linearizable = true;
    let commands = initialization_commands(&options);

    assert!(commands.contains("AUTH USER u HASH abcd;"));
    assert!(commands.contains("SET CLIENT KEY ZEROTEXT TO 1;"));
    assert!(commands.contains("SET CLIENT KEY NOBLOB TO 1;"));
    assert!(commands.contains("SET CLIENT KEY MAXDATA TO 1;"));
    assert!(commands.contains("SET CLIENT KEY MAXROWS TO 2;"));
    assert!(commands.contains("SET CLIENT KEY MAXROWSET TO 3;"));
    assert!(!commands.contains("NONLINEARIZABLE TO 0"));
    assert!(!commands.contains("USE DATABASE"));
  }
}
