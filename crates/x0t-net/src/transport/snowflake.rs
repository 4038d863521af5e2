//! Snowflake-style transport
//!
//! Stands in for a WebRTC data channel through a volunteer proxy with a plain
//! TCP stream to the target. The surface matches the other transports so the
//! data path can be exercised end to end.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};
use x0t_core::config::{TransportConfig, TransportKind};

use super::{deadline, open_stream, Counters, PluggableTransport, Timeouts, TransportStats};
use crate::error::{NetError, Result};

/// Snowflake-style transport over a plain stream
#[derive(Debug)]
pub struct SnowflakeTransport {
    broker_url: String,
    buffer_size: usize,
    timeouts: Timeouts,
    stream: Option<TcpStream>,
    counters: Counters,
}

impl SnowflakeTransport {
    /// Build from config
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            broker_url: config.broker_url.clone(),
            buffer_size: config.buffer_size.max(1),
            timeouts: Timeouts::from_config(config),
            stream: None,
            counters: Counters::default(),
        }
    }

    fn fail(&mut self, err: NetError) -> NetError {
        self.counters.errors += 1;
        self.stream = None;
        warn!(error = %err, "Snowflake operation failed");
        err
    }
}

#[async_trait]
impl PluggableTransport for SnowflakeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Snowflake
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    #[instrument(skip(self), fields(transport = "snowflake"))]
    async fn connect(&mut self, target: &str, port: u16) -> Result<()> {
        self.stream = None;
        if !self.broker_url.is_empty() {
            debug!(broker = %self.broker_url, "Broker rendezvous skipped, dialing target directly");
        }
        match open_stream(target, port, &self.timeouts).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.counters.connections += 1;
                info!(target, port, "Snowflake connected");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let write_timeout = self.timeouts.write;
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let written = deadline("write", write_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        match written {
            Ok(()) => {
                self.counters.bytes_sent += data.len() as u64;
                Ok(data.len())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reads at most `min(max_len, buffer_size)` bytes; empty at end of stream.
    async fn receive(&mut self, max_len: usize) -> Result<Bytes> {
        let read_timeout = self.timeouts.read;
        let cap = max_len.min(self.buffer_size);
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let mut buf = BytesMut::zeroed(cap);
        match deadline("read", read_timeout, stream.read(&mut buf)).await {
            Ok(n) => {
                buf.truncate(n);
                self.counters.bytes_received += n as u64;
                Ok(buf.freeze())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Snowflake shutdown");
            }
            info!("Snowflake closed");
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot(TransportKind::Snowflake, self.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_connected() {
        let mut t = SnowflakeTransport::from_config(&TransportConfig::default());
        assert!(matches!(t.send(b"x").await, Err(NetError::NotConnected)));
        assert!(matches!(t.receive(8).await, Err(NetError::NotConnected)));
        t.close().await.unwrap();
        assert!(!t.stats().connected);
    }

    #[tokio::test]
    async fn test_connect_refused_counts_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut t = SnowflakeTransport::from_config(&TransportConfig::default());
        assert!(t.connect("127.0.0.1", port).await.is_err());
        let stats = t.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.connections, 0);
        assert!(!stats.connected);
    }
}
