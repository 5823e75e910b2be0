//! # Tributary
//!
//! A feed-ingestion engine: polls RSS/Atom/JSON feeds, YouTube channels,
//! Discord channels and plain web pages, and forwards new items to
//! destinations.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → CheckCycle → ParserPipeline → Normalizer → SeenSet → Notifier
//!                               │
//!                            Fetcher (circuit breaker, conditional cache)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Check every destination once
//! tributary check
//!
//! # Poll until interrupted
//! tributary run --tick 30s
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, breaker, conditional cache, fetcher, parser pipeline, notifier.
pub mod app;

/// TOML configuration with `${VAR}` expansion.
///
/// Loads from `~/.config/tributary/config.toml` unless a path is given.
pub mod config;

/// Long-running scheduler loop with graceful shutdown.
pub mod daemon;

/// Command-line interface using clap.
///
/// - `run [--tick 30s]` - Poll until interrupted
/// - `check [--destination N]` - One-shot check
/// - `status` - Cache contents
/// - `parsers` - Parser order
pub mod cli;

/// Per-source memory of delivered item ids.
pub mod dedup;

/// Core domain models.
///
/// - [`Item`](domain::Item): A normalized feed entry
/// - [`Destination`](domain::Destination): Where items from a set of sources go
pub mod domain;

/// HTTP fetching with a per-host circuit breaker and conditional requests.
pub mod fetcher;

/// Turns raw parser output into [`Item`](domain::Item)s.
pub mod normalizer;

/// Item delivery.
pub mod notify;

/// Ordered, pluggable feed parsers.
pub mod parser;

/// Round-robin destination scheduling and per-destination check cycles.
pub mod scheduler;

/// SQLite persistence for seen ids and conditional validators.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::sqlite::SqliteStore): SQLite implementation
pub mod store;
