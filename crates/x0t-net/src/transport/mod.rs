//! Pluggable transports
//!
//! Three transport flavours share one async surface:
//!
//! ```text
//! Disconnected --connect()--> Connected --close()--> Disconnected
//! ```
//!
//! `send`/`receive` while disconnected fail with [`NetError::NotConnected`].
//! Every failed operation bumps the `errors` counter before the error is
//! returned. Deadline expiry and socket failures also drop the session, so the
//! caller is left in `Disconnected` without a leaked socket.

mod meek;
mod obfs4;
mod snowflake;

pub use meek::{MeekHttpClient, MeekTransport, ReqwestMeekClient, MEEK_REQUEST_ID_LEN};
pub use obfs4::{
    derive_public_key, derive_session_keys, keystream, open_frame, seal_frame, Obfs4Transport,
    FRAME_HEADER_LEN, MAX_HANDSHAKE_RESPONSE, NODE_ID_LEN, OBFS4_NONCE_LEN, PRIVATE_KEY_LEN,
};
pub use snowflake::SnowflakeTransport;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use socket2::SockRef;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;
use x0t_core::config::{TransportConfig, TransportKind};

use crate::error::{NetError, Result};

/// Common surface of every pluggable transport
#[async_trait]
pub trait PluggableTransport: Send {
    /// Transport flavour
    fn kind(&self) -> TransportKind;

    /// True between a successful `connect` and `close`
    fn is_connected(&self) -> bool;

    /// Establish a session with `target:port`
    async fn connect(&mut self, target: &str, port: u16) -> Result<()>;

    /// Send `data`, returning the number of payload bytes accepted
    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Receive up to `max_len` payload bytes; empty when the peer has nothing
    async fn receive(&mut self, max_len: usize) -> Result<Bytes>;

    /// Tear the session down
    async fn close(&mut self) -> Result<()>;

    /// Counter snapshot
    fn stats(&self) -> TransportStats;
}

/// Transport counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Transport flavour
    pub kind: TransportKind,
    /// Session currently established
    pub connected: bool,
    /// Payload bytes accepted by `send`
    pub bytes_sent: u64,
    /// Payload bytes returned by `receive`
    pub bytes_received: u64,
    /// Successful connects
    pub connections: u64,
    /// Failed operations of any kind
    pub errors: u64,
}

/// Per-operation deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect / first HTTP exchange
    pub connect: Duration,
    /// Handshake response wait
    pub handshake: Duration,
    /// Single read
    pub read: Duration,
    /// Write plus flush
    pub write: Duration,
}

impl Timeouts {
    /// Take deadlines from the transport section
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_timeout_ms),
            handshake: Duration::from_millis(config.handshake_timeout_ms),
            read: Duration::from_millis(config.read_timeout_ms),
            write: Duration::from_millis(config.write_timeout_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connections: u64,
    pub errors: u64,
}

impl Counters {
    pub fn snapshot(&self, kind: TransportKind, connected: bool) -> TransportStats {
        TransportStats {
            kind,
            connected,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            connections: self.connections,
            errors: self.errors,
        }
    }
}

pub(crate) fn millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

/// Run an I/O future under a deadline
pub(crate) async fn deadline<F, T>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(NetError::Timeout {
            operation,
            after_ms: millis(limit),
        }),
    }
}

/// Connect a TCP stream with keepalive and no Nagle delay
pub(crate) async fn open_stream(target: &str, port: u16, timeouts: &Timeouts) -> Result<TcpStream> {
    let stream = deadline("connect", timeouts.connect, TcpStream::connect((target, port))).await?;
    stream.set_nodelay(true)?;
    SockRef::from(&stream).set_keepalive(true)?;
    debug!(target, port, peer = ?stream.peer_addr().ok(), "TCP stream open");
    Ok(stream)
}

/// Enum dispatch over the built-in transports
#[derive(Debug)]
pub enum Transport {
    /// OBFS4-style transport
    Obfs4(Obfs4Transport),
    /// Meek-style transport
    Meek(MeekTransport),
    /// Snowflake-style transport
    Snowflake(SnowflakeTransport),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            Transport::Obfs4($inner) => $call,
            Transport::Meek($inner) => $call,
            Transport::Snowflake($inner) => $call,
        }
    };
}

#[async_trait]
impl PluggableTransport for Transport {
    fn kind(&self) -> TransportKind {
        dispatch!(self, t => t.kind())
    }

    fn is_connected(&self) -> bool {
        dispatch!(self, t => t.is_connected())
    }

    async fn connect(&mut self, target: &str, port: u16) -> Result<()> {
        dispatch!(self, t => t.connect(target, port).await)
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        dispatch!(self, t => t.send(data).await)
    }

    async fn receive(&mut self, max_len: usize) -> Result<Bytes> {
        dispatch!(self, t => t.receive(max_len).await)
    }

    async fn close(&mut self) -> Result<()> {
        dispatch!(self, t => t.close().await)
    }

    fn stats(&self) -> TransportStats {
        dispatch!(self, t => t.stats())
    }
}

/// Build the transport selected by `config.kind`
pub fn create_transport(config: &TransportConfig) -> Result<Transport> {
    let transport = match config.kind {
        TransportKind::Obfs4 => Transport::Obfs4(Obfs4Transport::from_config(config)?),
        TransportKind::Meek => Transport::Meek(MeekTransport::from_config(config)?),
        TransportKind::Snowflake => Transport::Snowflake(SnowflakeTransport::from_config(config)),
    };
    debug!(kind = %config.kind, "Created transport");
    Ok(transport)
}
