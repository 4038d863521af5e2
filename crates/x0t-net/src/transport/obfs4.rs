//! OBFS4-style transport
//!
//! Randomised-length handshake followed by length-prefixed XOR frames:
//!
//! ```text
//! handshake = len:u16be | padding(64..320) | ephemeral_pub:32 | mac:32
//! frame     = len:u16be | nonce:12 | data XOR keystream(key, nonce)
//! ```
//!
//! Key agreement is a hash construction, not ECDH. It makes the stream look
//! random to a passive observer and nothing more.

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};
use x0t_core::config::{TransportConfig, TransportKind};
use zeroize::Zeroizing;

use super::{deadline, open_stream, Counters, PluggableTransport, Timeouts, TransportStats};
use crate::error::{NetError, Result};

/// Generated node id length
pub const NODE_ID_LEN: usize = 20;
/// Generated private key length
pub const PRIVATE_KEY_LEN: usize = 32;
/// Per-frame nonce length
pub const OBFS4_NONCE_LEN: usize = 12;
/// Length prefix plus nonce
pub const FRAME_HEADER_LEN: usize = 2 + OBFS4_NONCE_LEN;
/// Largest handshake response read from the peer
pub const MAX_HANDSHAKE_RESPONSE: usize = 4096;

const PADDING_MIN: usize = 64;
const PADDING_MAX: usize = 320;
const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Public half derived from a private key
pub fn derive_public_key(private_key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(private_key);
    hasher.update(b"public");
    hasher.finalize().into()
}

/// `(send_key, receive_key)` from the private key and the peer's response
///
/// Only the first 32 bytes of the response take part.
pub fn derive_session_keys(private_key: &[u8], response: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut hasher = Sha256::new();
    hasher.update(private_key);
    hasher.update(&response[..response.len().min(32)]);
    let shared: [u8; 32] = hasher.finalize().into();

    let derive = |label: &[u8]| -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(label);
        hasher.finalize().into()
    };
    (derive(b"send"), derive(b"receive"))
}

/// Keystream of `len` bytes
///
/// The first block is `SHA256(key | nonce)`; each further block hashes the
/// whole stream produced so far.
pub fn keystream(key: &[u8], nonce: &[u8], len: usize) -> Vec<u8> {
    let mut first = Sha256::new();
    first.update(key);
    first.update(nonce);
    let block: [u8; 32] = first.finalize().into();

    let mut stream = Vec::with_capacity(len + 32);
    stream.extend_from_slice(&block);
    let mut running = Sha256::new();
    running.update(block);

    while stream.len() < len {
        let next: [u8; 32] = running.clone().finalize().into();
        running.update(next);
        stream.extend_from_slice(&next);
    }
    stream.truncate(len);
    stream
}

fn xor_in_place(data: &mut [u8], key: &[u8], nonce: &[u8]) {
    let stream = keystream(key, nonce, data.len());
    for (byte, k) in data.iter_mut().zip(stream) {
        *byte ^= k;
    }
}

/// Encrypt one frame. Payloads over 65535 bytes are rejected.
pub fn seal_frame(key: &[u8], nonce: &[u8; OBFS4_NONCE_LEN], data: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(data.len()).map_err(|_| NetError::FrameTooLarge {
        len: data.len(),
        max: MAX_FRAME_PAYLOAD,
    })?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + data.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(nonce);
    let start = frame.len();
    frame.extend_from_slice(data);
    xor_in_place(&mut frame[start..], key, nonce);
    Ok(frame)
}

/// Decrypt a frame body
pub fn open_frame(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut plain = ciphertext.to_vec();
    xor_in_place(&mut plain, key, nonce);
    plain
}

struct Obfs4Session {
    stream: TcpStream,
    send_key: Zeroizing<[u8; 32]>,
    receive_key: Zeroizing<[u8; 32]>,
}

/// OBFS4-style transport over TCP
pub struct Obfs4Transport {
    node_id: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
    public_key: [u8; 32],
    timeouts: Timeouts,
    session: Option<Obfs4Session>,
    counters: Counters,
}

impl fmt::Debug for Obfs4Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obfs4Transport")
            .field("node_id", &hex::encode(&self.node_id))
            .field("public_key", &hex::encode(self.public_key))
            .field("connected", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl Obfs4Transport {
    /// Build from config; missing identity material is generated
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let node_id = match &config.node_id {
            Some(hex_id) => decode_key_hex("transport.node_id", hex_id)?,
            None => random_bytes(NODE_ID_LEN),
        };
        let private_key = match &config.private_key {
            Some(hex_key) => decode_key_hex("transport.private_key", hex_key)?,
            None => random_bytes(PRIVATE_KEY_LEN),
        };
        Ok(Self::with_identity(node_id, private_key, Timeouts::from_config(config)))
    }

    /// Build from explicit identity material
    pub fn with_identity(node_id: Vec<u8>, private_key: Vec<u8>, timeouts: Timeouts) -> Self {
        let public_key = derive_public_key(&private_key);
        Self {
            node_id,
            private_key: Zeroizing::new(private_key),
            public_key,
            timeouts,
            session: None,
            counters: Counters::default(),
        }
    }

    /// Node identifier
    pub fn node_id(&self) -> &[u8] {
        &self.node_id
    }

    /// Static public key
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Client handshake message, length prefix included
    pub fn build_handshake(&self) -> Vec<u8> {
        let mut rng = OsRng;
        let mut ephemeral = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(ephemeral.as_mut());
        let ephemeral_public = derive_public_key(ephemeral.as_ref());

        let mut padding = vec![0u8; rng.gen_range(PADDING_MIN..PADDING_MAX)];
        rng.fill_bytes(&mut padding);

        let mut mac = Sha256::new();
        mac.update(&padding);
        mac.update(ephemeral_public);
        mac.update(&self.node_id);
        mac.update(self.private_key.as_slice());
        let mac: [u8; 32] = mac.finalize().into();

        let body_len = padding.len() + ephemeral_public.len() + mac.len();
        let mut handshake = Vec::with_capacity(2 + body_len);
        handshake.extend_from_slice(&(body_len as u16).to_be_bytes());
        handshake.extend_from_slice(&padding);
        handshake.extend_from_slice(&ephemeral_public);
        handshake.extend_from_slice(&mac);
        handshake
    }

    async fn establish(&self, target: &str, port: u16) -> Result<Obfs4Session> {
        let mut stream = open_stream(target, port, &self.timeouts).await?;

        let handshake = self.build_handshake();
        deadline("write", self.timeouts.write, async {
            stream.write_all(&handshake).await?;
            stream.flush().await
        })
        .await?;

        let mut response = vec![0u8; MAX_HANDSHAKE_RESPONSE];
        let n = deadline("handshake", self.timeouts.handshake, stream.read(&mut response)).await?;
        if n == 0 {
            return Err(NetError::handshake("peer closed before responding"));
        }
        response.truncate(n);

        let (send_key, receive_key) = derive_session_keys(&self.private_key, &response);
        debug!(handshake_len = handshake.len(), response_len = n, "OBFS4 handshake complete");
        Ok(Obfs4Session {
            stream,
            send_key: Zeroizing::new(send_key),
            receive_key: Zeroizing::new(receive_key),
        })
    }

    fn fail(&mut self, err: NetError) -> NetError {
        self.counters.errors += 1;
        if matches!(err, NetError::Io(_) | NetError::Timeout { .. }) {
            self.session = None;
        }
        warn!(error = %err, "OBFS4 operation failed");
        err
    }
}

#[async_trait]
impl PluggableTransport for Obfs4Transport {
    fn kind(&self) -> TransportKind {
        TransportKind::Obfs4
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    #[instrument(skip(self), fields(transport = "obfs4"))]
    async fn connect(&mut self, target: &str, port: u16) -> Result<()> {
        self.session = None;
        match self.establish(target, port).await {
            Ok(session) => {
                self.session = Some(session);
                self.counters.connections += 1;
                info!(target, port, "OBFS4 connected");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let write_timeout = self.timeouts.write;
        let Some(session) = self.session.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let mut wire = Vec::with_capacity(data.len() + FRAME_HEADER_LEN);
        for chunk in data.chunks(MAX_FRAME_PAYLOAD) {
            let mut nonce = [0u8; OBFS4_NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            wire.extend_from_slice(&seal_frame(session.send_key.as_ref(), &nonce, chunk)?);
        }

        let stream = &mut session.stream;
        let written = deadline("write", write_timeout, async {
            stream.write_all(&wire).await?;
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

    /// Reads one whole frame; `max_len` does not split frames.
    async fn receive(&mut self, _max_len: usize) -> Result<Bytes> {
        let read_timeout = self.timeouts.read;
        let Some(session) = self.session.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let stream = &mut session.stream;
        let receive_key = session.receive_key.clone();
        let frame = deadline("read", read_timeout, async {
            let mut len = [0u8; 2];
            match stream.read_exact(&mut len).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            }
            let mut rest = vec![0u8; usize::from(u16::from_be_bytes(len)) + OBFS4_NONCE_LEN];
            stream.read_exact(&mut rest).await?;
            Ok(Some(rest))
        })
        .await;

        match frame {
            Ok(Some(rest)) => {
                let (nonce, ciphertext) = rest.split_at(OBFS4_NONCE_LEN);
                let plain = open_frame(receive_key.as_ref(), nonce, ciphertext);
                self.counters.bytes_received += plain.len() as u64;
                Ok(Bytes::from(plain))
            }
            Ok(None) => Ok(Bytes::new()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stream.shutdown().await {
                debug!(error = %e, "OBFS4 shutdown");
            }
            info!("OBFS4 closed");
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot(TransportKind::Obfs4, self.is_connected())
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_key_hex(key: &str, value: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(value).map_err(|e| {
        NetError::Core(x0t_core::Error::config_value(key, e.to_string()))
    })?;
    if bytes.is_empty() {
        return Err(NetError::Core(x0t_core::Error::config_value(key, "must not be empty")));
    }
    Ok(bytes)
}
