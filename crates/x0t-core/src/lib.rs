//! # x0t Core
//!
//! CPU-bound engine of the x0t censorship-circumvention stack. No network I/O.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Stego codec** - Encrypt, authenticate and disguise payloads as HTTP/ICMP/DNS
//! - **Evasion** - Geneva-style mangling strategies, genetic optimizer, training harness
//! - **Obfuscation** - Layered XOR/padding/fragmentation/shaping/timing/encoding pipeline
//! - **DPI model** - Synthetic detector used as the training fitness oracle
//! - **Configuration** - Profile-based configuration system
//!
//! ## Example
//!
//! ```rust,no_run
//! use x0t_core::{DpiModel, GenevaGeneticOptimizer, MimicProtocol, StegoCodec};
//!
//! let codec = StegoCodec::new(&[0x41; 32])?;
//! let optimizer = GenevaGeneticOptimizer::new(20);
//! let dna = optimizer.get_best_strategy();
//!
//! for packet in codec.encode(b"hello", MimicProtocol::Http, dna) {
//!     let verdict = DpiModel::new().inspect(&packet);
//!     println!("detected={} threat={}", verdict.detected, verdict.threat_level);
//! }
//! # Ok::<(), x0t_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dpi;
pub mod error;
pub mod evasion;
pub mod obfuscation;
pub mod stego;

// Re-exports for convenience
pub use config::{Config, Profile};
pub use dpi::{BlockingType, DpiModel, Inspection};
pub use error::{Error, Result};
pub use evasion::{Action, Dna, GenevaGeneticOptimizer, Trainer, TrainingReport};
pub use obfuscation::Obfuscator;
pub use stego::{MasterKey, MimicProtocol, ProtocolCarrier, StegoCodec};
