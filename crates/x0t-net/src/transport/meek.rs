//! Meek-style transport
//!
//! Payloads ride in HTTP requests to a front domain while the `Host` header
//! names the real target. `send` posts a base64 form body, `receive` polls
//! with the session id. The HTTP client sits behind [`MeekHttpClient`] so the
//! exchange can be driven without a network.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::header::{ACCEPT, HOST};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use x0t_core::config::{TransportConfig, TransportKind};

use super::{millis, Counters, PluggableTransport, Timeouts, TransportStats};
use crate::error::{NetError, Result};

/// Random bytes behind the hex session id
pub const MEEK_REQUEST_ID_LEN: usize = 16;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

/// HTTP exchange used by [`MeekTransport`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeekHttpClient: Send + Sync {
    /// POST `data` and `id` as a form to `url` with `Host: host`; returns the status
    async fn post_form(&self, url: &str, host: &str, data: &str, id: &str) -> Result<u16>;

    /// GET `url?id=...` with `Host: host`; returns the status and, on 200, the body
    async fn poll(&self, url: &str, host: &str, id: &str) -> Result<(u16, String)>;
}

/// [`MeekHttpClient`] backed by reqwest with rustls
#[derive(Debug, Clone)]
pub struct ReqwestMeekClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestMeekClient {
    /// Build a client honouring the transport deadlines
    pub fn new(timeouts: &Timeouts) -> Result<Self> {
        let timeout = timeouts.read.max(timeouts.write);
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeouts.connect)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    fn map_err(&self, operation: &'static str, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::Timeout {
                operation,
                after_ms: millis(self.timeout),
            }
        } else {
            NetError::Request(err)
        }
    }
}

#[async_trait]
impl MeekHttpClient for ReqwestMeekClient {
    async fn post_form(&self, url: &str, host: &str, data: &str, id: &str) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .header(HOST, host)
            .header(ACCEPT, "*/*")
            .form(&[("data", data), ("id", id)])
            .send()
            .await
            .map_err(|e| self.map_err("write", e))?;
        Ok(response.status().as_u16())
    }

    async fn poll(&self, url: &str, host: &str, id: &str) -> Result<(u16, String)> {
        let response = self
            .client
            .get(url)
            .header(HOST, host)
            .header(ACCEPT, "*/*")
            .query(&[("id", id)])
            .send()
            .await
            .map_err(|e| self.map_err("read", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Ok((status.as_u16(), String::new()));
        }
        let body = response.text().await.map_err(|e| self.map_err("read", e))?;
        Ok((status.as_u16(), body))
    }
}

#[derive(Debug)]
struct MeekSession {
    host: String,
    request_id: String,
}

/// Meek-style transport
#[derive(Debug)]
pub struct MeekTransport<C = ReqwestMeekClient> {
    client: C,
    url: String,
    session: Option<MeekSession>,
    counters: Counters,
}

impl MeekTransport<ReqwestMeekClient> {
    /// Build with the reqwest client
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let client = ReqwestMeekClient::new(&Timeouts::from_config(config))?;
        Self::with_client(client, config)
    }
}

impl<C: MeekHttpClient> MeekTransport<C> {
    /// Build around an injected HTTP client
    pub fn with_client(client: C, config: &TransportConfig) -> Result<Self> {
        if config.front_domain.is_empty() {
            return Err(NetError::invalid_config("meek requires transport.front_domain"));
        }
        let scheme = if config.meek_insecure_http { "http" } else { "https" };
        let path = if config.meek_path.starts_with('/') {
            config.meek_path.clone()
        } else {
            format!("/{}", config.meek_path)
        };
        Ok(Self {
            client,
            url: format!("{scheme}://{}{path}", config.front_domain),
            session: None,
            counters: Counters::default(),
        })
    }

    /// Endpoint on the front domain
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current session id
    pub fn request_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.request_id.as_str())
    }

    fn fail(&mut self, err: NetError) -> NetError {
        self.counters.errors += 1;
        if matches!(
            err,
            NetError::Io(_) | NetError::Timeout { .. } | NetError::Request(_)
        ) {
            self.session = None;
        }
        warn!(error = %err, "Meek operation failed");
        err
    }
}

#[async_trait]
impl<C: MeekHttpClient> PluggableTransport for MeekTransport<C> {
    fn kind(&self) -> TransportKind {
        TransportKind::Meek
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a logical session; no request is made until the first send or poll.
    #[instrument(skip(self), fields(transport = "meek"))]
    async fn connect(&mut self, target: &str, port: u16) -> Result<()> {
        let mut id = [0u8; MEEK_REQUEST_ID_LEN];
        OsRng.fill_bytes(&mut id);
        self.session = Some(MeekSession {
            host: target.to_string(),
            request_id: hex::encode(id),
        });
        self.counters.connections += 1;
        info!(front = %self.url, target, port, "Meek session opened");
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let Some(session) = self.session.as_ref() else {
            return Err(NetError::NotConnected);
        };

        let encoded = BASE64.encode(data);
        let result = self
            .client
            .post_form(&self.url, &session.host, &encoded, &session.request_id)
            .await;

        match result {
            Ok(200) => {
                self.counters.bytes_sent += data.len() as u64;
                Ok(data.len())
            }
            Ok(status) => Err(self.fail(NetError::Http { status })),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Returns the whole polled body; empty on any non-200 status.
    async fn receive(&mut self, _max_len: usize) -> Result<Bytes> {
        let Some(session) = self.session.as_ref() else {
            return Err(NetError::NotConnected);
        };

        let result = self
            .client
            .poll(&self.url, &session.host, &session.request_id)
            .await;

        match result {
            Ok((200, body)) => match BASE64.decode(body.trim()) {
                Ok(decoded) => {
                    self.counters.bytes_received += decoded.len() as u64;
                    Ok(Bytes::from(decoded))
                }
                Err(e) => Err(self.fail(NetError::Decode(e.to_string()))),
            },
            Ok((status, _)) => {
                debug!(status, "Meek poll returned no data");
                Ok(Bytes::new())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.session.take().is_some() {
            info!("Meek session closed");
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot(TransportKind::Meek, self.is_connected())
    }
}
