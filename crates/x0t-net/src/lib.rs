//! # x0t Net
//!
//! Network-facing half of the x0t stack.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Transports** - OBFS4-, Meek- and Snowflake-style pluggable transports
//!   behind one [`PluggableTransport`] surface, selected through [`Transport`]
//! - **Probes** - [`CensorshipDetector`] classifying DNS, TCP, TLS, HTTP and
//!   throughput interference into a [`BlockingType`](x0t_core::BlockingType)
//!
//! Every network operation carries its own timeout from the core
//! configuration. Transport failures propagate as [`NetError`]; probe failures
//! are folded into [`DetectionResult::error`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use x0t_core::config::TransportConfig;
//! use x0t_net::{create_transport, PluggableTransport};
//!
//! # async fn demo() -> x0t_net::Result<()> {
//! let mut transport = create_transport(&TransportConfig::default())?;
//! transport.connect("bridge.example.net", 443).await?;
//! transport.send(b"hello").await?;
//! let reply = transport.receive(4096).await?;
//! transport.close().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod probe;
pub mod transport;

pub use error::{NetError, Result};
pub use probe::{CensorshipDetector, DetectionResult, ScanSummary};
pub use transport::{create_transport, PluggableTransport, Transport, TransportStats};
