//! Publish/subscribe over a dedicated listening socket.
//!
//! `LISTEN` runs on the primary connection and returns an authorization
//! command. That command is replayed as the first command on a second
//! socket, which from then on only carries unsolicited push frames.
//! Channel administration goes through the primary connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::assembler::Settled;
use crate::config::TransportKind;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::{Command, Value};
use crate::transport::{DirectTransport, Transport};

/// What a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubEntity {
  /// Change notifications of a table
  Table,
  /// A named channel
  Channel,
}

impl PubSubEntity {
  fn prefix(self) -> &'static str {
    match self {
      PubSubEntity::Table => "TABLE ",
      PubSubEntity::Channel => "",
    }
  }
}

/// Receives every push payload (or listener error) for a subscription
pub type PubSubCallback = Arc<dyn Fn(Result<Value>) + Send + Sync>;

type Callbacks = Arc<parking_lot::Mutex<HashMap<String, PubSubCallback>>>;

struct Listener {
  commands: mpsc::UnboundedSender<Command>,
  task: JoinHandle<()>,
}

impl Listener {
  fn is_running(&self) -> bool {
    !self.task.is_finished() && !self.commands.is_closed()
  }
}

pub struct PubSub {
  connection: Connection,
  listener: tokio::sync::Mutex<Option<Listener>>,
  callbacks: Callbacks,
}

impl PubSub {
  /// Wrap an already connected primary connection
  pub fn new(connection: Connection) -> Self {
    Self {
      connection,
      listener: tokio::sync::Mutex::new(None),
      callbacks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
    }
  }

  pub fn connection(&self) -> &Connection {
    &self.connection
  }

  /// Subscribe to `name` and route its pushes to `callback`.
  ///
  /// The first subscription opens the listening socket; later ones reuse it.
  pub async fn listen<F>(&self, entity: PubSubEntity, name: &str, callback: F) -> Result<()>
  where
    F: Fn(Result<Value>) + Send + Sync + 'static,
  {
    if self.connection.options().transport_kind() == TransportKind::Gateway {
      return Err(Error::Config(
        "pubsub needs a direct connection to the server".to_string(),
      ));
    }

    let reply = self
      .connection
      .send(format!("LISTEN {}{};", entity.prefix(), name))
      .await?;
    let authorization = match reply {
      Value::Text(command) => Command::new(command),
      other => {
        return Err(Error::protocol(format!(
          "LISTEN replied with {:?} instead of an authorization command",
          other
        )))
      }
    };

    self.callbacks.lock().insert(name.to_string(), Arc::new(callback));

    let mut listener = self.listener.lock().await;
    if let Some(running) = listener.as_ref().filter(|l| l.is_running()) {
      return running
        .commands
        .send(authorization)
        .map_err(|_| Error::ConnectionClosed);
    }

    match self.spawn_listener(authorization).await {
      Ok(spawned) => {
        *listener = Some(spawned);
        Ok(())
      }
      Err(e) => {
        self.callbacks.lock().remove(name);
        Err(e)
      }
    }
  }

  async fn spawn_listener(&self, authorization: Command) -> Result<Listener> {
    let mut transport = DirectTransport::new();
    transport.connect(self.connection.options()).await?;
    transport.write_command(&authorization).await?;
    tracing::debug!(host = %self.connection.options().host, "pubsub listener connected");

    let (commands, inbox) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_listener(transport, inbox, Arc::clone(&self.callbacks)));
    Ok(Listener { commands, task })
  }

  /// Stop receiving pushes for `name`
  pub async fn unlisten(&self, entity: PubSubEntity, name: &str) -> Result<Value> {
    let result = self
      .connection
      .send(format!("UNLISTEN {}{};", entity.prefix(), name))
      .await;
    self.callbacks.lock().remove(name);
    result
  }

  /// Create a channel. Unless `fail_if_exists`, an existing channel is not
  /// an error.
  pub async fn create_channel(&self, name: &str, fail_if_exists: bool) -> Result<Value> {
    let mut query = String::from("CREATE CHANNEL ?");
    if !fail_if_exists {
      query.push_str(" IF NOT EXISTS");
    }
    query.push(';');
    self.connection.send(Command::new(query).bind(name)).await
  }

  pub async fn remove_channel(&self, name: &str) -> Result<Value> {
    self
      .connection
      .send(Command::new("REMOVE CHANNEL ?;").bind(name))
      .await
  }

  /// Publish `message` on `channel`
  pub async fn notify_channel(&self, channel: &str, message: &str) -> Result<Value> {
    self
      .connection
      .send(Command::new("NOTIFY ? ?;").bind(channel).bind(message))
      .await
  }

  pub async fn list_channels(&self) -> Result<Value> {
    self.connection.send("LIST CHANNELS;").await
  }

  /// Turn the primary connection into a pubsub-only one and close it.
  /// The listening socket stays open.
  pub async fn set_pubsub_only(&self) -> Result<Value> {
    let result = self.connection.send("PUBSUB ONLY;").await?;
    self.connection.close().await?;
    Ok(result)
  }

  /// Whether the listening socket is up
  pub async fn is_connected(&self) -> bool {
    self
      .listener
      .lock()
      .await
      .as_ref()
      .is_some_and(|l| l.is_running())
  }

  /// Stop the listener and close the primary connection
  pub async fn close(&self) -> Result<()> {
    if let Some(listener) = self.listener.lock().await.take() {
      listener.task.abort();
    }
    self.callbacks.lock().clear();
    self.connection.close().await
  }
}

impl Drop for PubSub {
  fn drop(&mut self) {
    if let Some(listener) = self.listener.get_mut().take() {
      listener.task.abort();
    }
  }
}

/// Name a push payload belongs to, when the payload says so
fn push_target(value: &Value) -> Option<&str> {
  match value {
    Value::Json(serde_json::Value::Object(fields)) => fields.get("channel")?.as_str(),
    _ => None,
  }
}

fn deliver(callbacks: &Callbacks, value: Value) {
  let targets: Vec<PubSubCallback> = {
    let callbacks = callbacks.lock();
    match push_target(&value).and_then(|name| callbacks.get(name)) {
      Some(callback) => vec![Arc::clone(callback)],
      None => callbacks.values().cloned().collect(),
    }
  };

  if let Some((last, rest)) = targets.split_last() {
    for callback in rest {
      callback(Ok(value.clone()));
    }
    last(Ok(value));
  }
}

fn deliver_error(callbacks: &Callbacks, error: &Error) {
  let targets: Vec<PubSubCallback> = callbacks.lock().values().cloned().collect();
  for callback in targets {
    callback(Err(error.detached()));
  }
}

async fn run_listener(
  mut transport: DirectTransport,
  mut inbox: mpsc::UnboundedReceiver<Command>,
  callbacks: Callbacks,
) {
  loop {
    tokio::select! {
      command = inbox.recv() => match command {
        Some(command) => {
          if let Err(e) = transport.write_command(&command).await {
            tracing::warn!(error = %e, "pubsub listener write failed");
            deliver_error(&callbacks, &e);
            break;
          }
        }
        None => break,
      },
      settled = transport.next_settled() => match settled {
        Ok(Settled::Push(value)) => {
          tracing::trace!("pubsub push received");
          deliver(&callbacks, value);
        }
        Ok(Settled::Value(value)) => {
          tracing::trace!(reply = ?value, "pubsub listener acknowledged");
        }
        Err(e) if !e.is_fatal() => deliver_error(&callbacks, &e),
        Err(e) => {
          tracing::warn!(error = %e, "pubsub listener stopped");
          deliver_error(&callbacks, &e);
          break;
        }
      }
    }
  }

  if let Err(e) = transport.close().await {
    tracing::debug!(error = %e, "pubsub listener close failed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn collector() -> (Callbacks, mpsc::UnboundedReceiver<(&'static str, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callbacks: Callbacks = Arc::new(parking_lot::Mutex::new(HashMap::new()));
    for name in ["news", "sports"] {
      let tx = tx.clone();
      let callback: PubSubCallback = Arc::new(move |result: Result<Value>| {
        if let Ok(value) = result {
          let _ = tx.send((name, value));
        }
      });
      callbacks.lock().insert(name.to_string(), callback);
    }
    (callbacks, rx)
  }

  #[test]
  fn test_push_routed_by_channel() {
    let (callbacks, mut rx) = collector();
    deliver(&callbacks, Value::Json(json!({"channel": "sports", "payload": "goal"})));

    let (name, value) = rx.try_recv().unwrap();
    assert_eq!(name, "sports");
    assert_eq!(push_target(&value), Some("sports"));
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_unrouted_push_reaches_everyone() {
    let (callbacks, mut rx) = collector();
    deliver(&callbacks, Value::Text("plain".into()));

    let mut names = vec![rx.try_recv().unwrap().0, rx.try_recv().unwrap().0];
    names.sort();
    assert_eq!(names, vec!["news", "sports"]);
  }

  #[test]
  fn test_entity_prefix() {
    assert_eq!(PubSubEntity::Table.prefix(), "TABLE ");
    assert_eq!(PubSubEntity::Channel.prefix(), "");
  }
}
