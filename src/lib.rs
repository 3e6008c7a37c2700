//! # Meshdot - Mesh Telemetry Aggregation
//!
//! Meshdot ingests telemetry from packet-radio mesh networks and maintains a
//! canonical per-device state record (a "dot": name + last-known position +
//! freshness) served to map frontends. Two related wire formats are handled:
//! the Meshtastic protobuf envelope (validated, consumed as normalized
//! fields) and the MeshCore custom binary format (decoded in full).
//!
//! ## Features
//!
//! - **MeshCore Decoding**: Total decoder for the bit-packed, variable-length
//!   MeshCore frame format, including ADVERT identity payloads with graceful
//!   tail-truncation handling.
//! - **State Aggregation**: Merges repeated, partial, out-of-order packet
//!   observations into one record per device under explicit validity and
//!   freshness rules, with a debounce window bounding write amplification.
//! - **Embedded Storage**: Sled-backed key-value store holding dots, message
//!   logs, and rebuildable index sets; bulk reads are pipelined with a
//!   caller-side timeout.
//! - **Derived-Data Caches**: 30-second caches for the all-dots and map
//!   views, invalidated eagerly on every successful write.
//! - **Graceful Degradation**: Decode failures are silent, validation
//!   rejections mean "field absent", and storage failures are logged and
//!   absorbed so one flaky call never stalls ingestion.
//! - **Async Design**: Built with Tokio for high throughput on small hosts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshdot::engine::{AggregationEngine, DeviceUpdate, EngineOptions};
//! use meshdot::storage::DotStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = DotStore::open("./data")?;
//!     let engine = AggregationEngine::new(store, EngineOptions::default());
//!
//!     let update = DeviceUpdate {
//!         latitude: Some(55.751244),
//!         longitude: Some(37.618423),
//!         ..Default::default()
//!     };
//!     engine.merge_device_update("!015ba416", update, Some("POSITION_APP")).await;
//!
//!     let dot = engine.get_aggregated_state("22782998").await;
//!     println!("{:?}", dot);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshcore`] - MeshCore binary frame and ADVERT payload decoding
//! - [`engine`] - device-state aggregation, indices, caches, message logs
//! - [`storage`] - sled-backed key-value persistence layer
//! - [`validation`] - name/packet sanity checks with memoization
//! - [`config`] - configuration management and validation
//! - [`metrics`] - ingestion and engine counters
//!
//! ## Architecture
//!
//! ```text
//! raw bytes ──► Frame Decoder ──► normalized event
//!                                      │
//!                               ┌──────▼──────┐
//!                               │ Aggregation │ ◄── Validators
//!                               │   Engine    │
//!                               └──────┬──────┘
//!                                      │ merge + index + cache invalidation
//!                               ┌──────▼──────┐
//!                               │  Key-Value  │
//!                               │    Store    │
//!                               └─────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod logutil;
pub mod meshcore;
pub mod metrics;
pub mod storage;
pub mod validation;
