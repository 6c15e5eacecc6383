//! chatmirror-runtime: sync orchestration on top of a remote session
//!
//! This crate drives a [`session::Session`] implementation: it ingests
//! live and historical events into the store, downloads media in the
//! background, backfills older history on demand and serves the local
//! send gateway.

pub mod backfill;
pub mod gateway;
pub mod ingest;
pub mod media;
pub mod send;
pub mod session;
pub mod sync;

pub use backfill::{BackfillOptions, BackfillResult, backfill};
pub use gateway::{GatewayClient, SendGateway, send_with_fallback};
pub use ingest::{HistoryBatch, Ingestor};
pub use media::{MediaCoordinator, MediaJob};
pub use send::{SendRequest, SendResponse, SendService};
pub use session::{ConnectOptions, Session};
pub use sync::{Orchestrator, SyncMode, SyncOptions, SyncResult};
