//! Transport bindings.
//!
//! [`DirectTransport`] frames bytes itself over an encrypted socket;
//! [`GatewayTransport`] talks to a relay that returns already-decoded
//! results. The connection engine only sees the [`Transport`] trait.

mod direct;
mod gateway;

pub use direct::{AsyncStream, DirectTransport};
pub use gateway::GatewayTransport;

use async_trait::async_trait;

use crate::config::{ConnectOptions, TransportKind};
use crate::error::Result;
use crate::protocol::{Command, Value};

#[async_trait]
pub trait Transport: Send {
  /// Open the underlying socket or channel
  async fn connect(&mut self, options: &ConnectOptions) -> Result<()>;

  /// Write one command; returns once it has been flushed
  async fn write_command(&mut self, command: &Command) -> Result<()>;

  /// Wait for the complete reply to the last written command
  async fn read_reply(&mut self) -> Result<Value>;

  async fn send(&mut self, command: &Command) -> Result<Value> {
    self.write_command(command).await?;
    self.read_reply().await
  }

  async fn close(&mut self) -> Result<()>;

  fn is_open(&self) -> bool;

  /// Whether the engine must send the initialization command after
  /// `connect`. A relay authenticates on its own side.
  fn needs_initialization(&self) -> bool {
    true
  }
}

/// Build the transport selected by `options`
pub fn for_options(options: &ConnectOptions) -> Box<dyn Transport> {
  match options.transport_kind() {
    TransportKind::Direct => Box::new(DirectTransport::new()),
    TransportKind::Gateway => Box::new(GatewayTransport::new()),
  }
}
