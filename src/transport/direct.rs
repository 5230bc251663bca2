//! Direct socket transport: TLS (or plain TCP when `insecure`) carrying SCSP.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::Transport;
use crate::assembler::{ResponseAssembler, Settled};
use crate::codec;
use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::protocol::{Command, Value};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Any duplex byte stream the transport can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

#[derive(Default)]
pub struct DirectTransport {
  stream: Option<Box<dyn AsyncStream>>,
  assembler: ResponseAssembler,
}

impl DirectTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run over an already-open stream
  pub fn from_stream<S: AsyncStream + 'static>(stream: S) -> Self {
    Self {
      stream: Some(Box::new(stream)),
      assembler: ResponseAssembler::new(),
    }
  }

  async fn open(options: &ConnectOptions) -> Result<Box<dyn AsyncStream>> {
    let addr = format!("{}:{}", options.host, options.port);
    let tcp = TcpStream::connect(&addr)
      .await
      .map_err(|e| Error::connection(format!("Failed to connect to {}", addr), e))?;

    tcp
      .set_nodelay(true)
      .map_err(|e| Error::connection("Failed to set TCP_NODELAY", e))?;

    if options.insecure {
      tracing::debug!(%addr, "connected without TLS");
      return Ok(Box::new(tcp));
    }

    let mut builder = native_tls::TlsConnector::builder();
    if let Some(path) = &options.tls_root_certificate {
      let pem = tokio::fs::read(path)
        .await
        .map_err(|e| Error::connection(format!("Failed to read {}", path.display()), e))?;
      builder.add_root_certificate(native_tls::Certificate::from_pem(&pem)?);
    }
    if options.tls_accept_invalid_certs {
      builder.danger_accept_invalid_certs(true);
    }

    let connector = tokio_native_tls::TlsConnector::from(builder.build()?);
    let tls = connector
      .connect(&options.host, tcp)
      .await
      .map_err(|e| Error::connection(format!("TLS handshake with {} failed", addr), e))?;

    tracing::debug!(%addr, "connected over TLS");
    Ok(Box::new(tls))
  }

  /// Read until the next response settles. Bytes past it stay buffered.
  pub(crate) async fn next_settled(&mut self) -> Result<Settled> {
    if let Some(settled) = self.assembler.poll()? {
      return Ok(settled);
    }

    let stream = self.stream.as_mut().ok_or(Error::ConnectionNotEstablished)?;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
      let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| Error::connection("Read failed", e))?;
      if n == 0 {
        return Err(Error::ConnectionEnded);
      }
      tracing::trace!(bytes = n, "received");
      if let Some(settled) = self.assembler.feed(&buf[..n])? {
        return Ok(settled);
      }
    }
  }
}

#[async_trait]
impl Transport for DirectTransport {
  async fn connect(&mut self, options: &ConnectOptions) -> Result<()> {
    if self.stream.is_none() {
      self.stream = Some(Self::open(options).await?);
    }
    self.assembler.reset();
    Ok(())
  }

  async fn write_command(&mut self, command: &Command) -> Result<()> {
    let stream = self.stream.as_mut().ok_or(Error::ConnectionNotEstablished)?;
    let data = codec::encode(command);
    stream
      .write_all(&data)
      .await
      .map_err(|e| Error::connection("Write failed", e))?;
    stream
      .flush()
      .await
      .map_err(|e| Error::connection("Flush failed", e))?;
    Ok(())
  }

  /// Pushes on a command connection are not replies and are skipped.
  async fn read_reply(&mut self) -> Result<Value> {
    let result = loop {
      match self.next_settled().await {
        Ok(Settled::Push(value)) => {
          tracing::debug!(payload = ?value, "ignoring push on command connection");
        }
        Ok(Settled::Value(value)) => break Ok(value),
        Err(e) => break Err(e),
      }
    };
    self.assembler.reset();
    result
  }

  async fn close(&mut self) -> Result<()> {
    self.assembler.reset();
    if let Some(mut stream) = self.stream.take() {
      stream.shutdown().await?;
    }
    Ok(())
  }

  fn is_open(&self) -> bool {
    self.stream.is_some()
  }
}
