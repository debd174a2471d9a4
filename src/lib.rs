//! # Lightbox
//!
//! Resilient image acquisition for a medical image viewer.
//!
//! ## Overview
//!
//! Lightbox turns image identifiers (`wadouri:`, `dicomweb:` or plain web
//! URLs) into decoded pixels. Each load walks an ordered chain of strategies,
//! retries with exponential backoff, trips a per-image circuit breaker on
//! repeated failure and lands in a byte-bounded cache. Study loading and
//! preloading sit on top of the same engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────┐ ┌─────────────────────────────┐
//! │        StudyLoader          │ │          Preloader          │
//! │ • Progress + ETA            │ │ • Window around position    │
//! │ • Partial failure/recovery  │ │ • Low priority, best effort │
//! └─────────────────────────────┘ └─────────────────────────────┘
//!                 │                               │
//!                 └───────────────┬───────────────┘
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AcquisitionEngine                       │
//! │  In-flight join → cache → breaker → admission → retry loop  │
//! └─────────────────────────────────────────────────────────────┘
//!                                 │
//!          ┌──────────────────────┼───────────────────┐
//!          ▼                      ▼                   ▼
//! ┌─────────────────┐ ┌──────────────────────┐ ┌─────────────────┐
//! │   ImageCache    │ │    StrategyChain     │ │   Resilience    │
//! │                 │ │                      │ │                 │
//! │ • Byte budget   │ │ • primary-decoder    │ │ • RetryPolicy   │
//! │ • LRU eviction  │ │ • direct-fetch       │ │ • CircuitBreaker│
//! │ • Hit rate      │ │ • server-transcode   │ │                 │
//! │                 │ │ • generic-image      │ │                 │
//! └─────────────────┘ └──────────────────────┘ └─────────────────┘
//!                                 │
//!                   ┌─────────────┴─────────────┐
//!                   ▼                           ▼
//!          ┌─────────────────┐         ┌─────────────────┐
//!          │    Transport    │         │  ImageDecoder   │
//!          │ • reqwest       │         │ • image crate   │
//!          └─────────────────┘         └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration management
//! - [`engine`]: The acquisition engine and its events
//! - [`error`]: Strategy and acquisition errors, error reports
//! - [`images`]: Decoded image cache and decoder seam
//! - [`models`]: Identifiers, decoded images, study state
//! - [`preload`]: Cache warming around a viewing position
//! - [`resilience`]: Retry policy and circuit breaker
//! - [`strategy`]: The ordered strategy chain
//! - [`study`]: Study loading with progress and recovery
//! - [`transport`]: HTTP transport seam
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lightbox::{AcquisitionEngine, Config, HttpTransport, ImageIdentifier, LoadOptions, RasterDecoder};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let engine = AcquisitionEngine::new(&config, Arc::new(HttpTransport::new()), Arc::new(RasterDecoder));
//!
//! let id: ImageIdentifier = "wadouri:https://pacs.example/wado?objectUID=1.2.3".parse()?;
//! let image = engine.load(&id, LoadOptions::default()).await?;
//! println!("{}x{}", image.width, image.height);
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/lightbox/0.3.1")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::use_self)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::similar_names)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod engine;
pub mod error;
pub mod images;
pub mod models;
pub mod paths;
pub mod preload;
pub mod resilience;
pub mod strategy;
pub mod study;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::Config;
pub use engine::{AcquisitionEngine, AcquisitionEvent, LoadOptions, Priority};
pub use error::{AcquisitionError, ErrorKind, ErrorReport, StrategyError};
pub use images::{CacheStats, ImageCache, ImageDecoder, RasterDecoder};
pub use models::{
    BatchOutcome, DecodedImage, ImageIdentifier, RecoveryOption, Scheme, StudyLoadResult,
    StudyProgress, StudyStatus,
};
pub use preload::{PreloadBatch, Preloader};
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};
pub use strategy::{StrategyChain, StrategyKind};
pub use study::StudyLoader;
pub use transport::{HttpTransport, Transport};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
