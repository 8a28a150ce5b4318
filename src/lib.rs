//! # session-sync: Debounced, offline-first sync for drinking-session data
//!
//! This crate provides the client-side data layer for a session tracking
//! app backed by a realtime database: typed wire models, multi-path update
//! batches, a debounced queue with bounded retry, and lazy month-indexed
//! caches over loaded history.
//!
//! ## Features
//!
//! - **Debounced batching**: rapid edits coalesce per field path and flush
//!   as one atomic multi-path update after a quiet window
//! - **Bounded retry**: failed flushes retry a fixed number of times, then
//!   the batch is abandoned and surfaced through a hook
//! - **Typed schema**: serde models with validation at the decode boundary
//! - **Monthly caches**: sessions and calendar markings prepared lazily,
//!   one month at a time (`calendar` feature)
//! - **Abandonment journal**: JSONL record of dropped batches for later
//!   recovery (`journal` feature)
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use session_sync::{sink_fn, UpdateQueue};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), session_sync::SyncError> {
//!     // A sink receives each flushed batch; here it just prints.
//!     let sink = sink_fn(|batch: HashMap<String, String>| async move {
//!         println!("flushing {} fields", batch.len());
//!         Ok::<(), std::io::Error>(())
//!     });
//!
//!     let queue = UpdateQueue::new(sink);
//!
//!     // Both edits target the same path; only the last one is sent.
//!     queue.enqueue_one("status/note".to_owned(), "out with friends".to_owned());
//!     queue.enqueue_one("status/note".to_owned(), "heading home".to_owned());
//!
//!     // Drains whatever is still pending, then stops the worker.
//!     queue.shutdown().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`errors`]: Error types for all sync operations
//! - [`model`]: Wire schema: sessions, drinks, preferences, user status
//! - [`paths`]: Slash-separated field paths, routes, and push-style ids
//! - [`stats`]: Unit math, calendar colors, and day markings
//! - [`priority`]: Display-priority scoring for user lists
//! - [`sink`]: The [`UpdateSink`] trait batches are flushed through
//! - [`queue`]: The debounced batching queue
//! - [`store`]: Typed session operations over a sink and queue
//! - [`journal`]: JSONL journal of abandoned batches
//! - [`cache`]: Month-indexed session and marking caches
//!
//! ## Feature Flags
//!
//! - `journal` (default): JSONL abandonment journal, pulls in tokio fs
//! - `calendar` (default): month caches and date handling via chrono

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/session-sync")]

pub mod errors;
pub mod utils;
pub mod model;
pub mod paths;
pub mod stats;
pub mod priority;
pub mod sink;
pub mod queue;
pub mod store;
#[cfg(feature = "journal")]
pub mod journal;
#[cfg(feature = "calendar")]
pub mod cache;

pub use errors::SyncError;
pub use model::{
    decode, DrinkKind, DrinkingSession, Drinks, DrinksList, Preferences, SessionId, SessionType,
    Timestamp, TzOffset, UserId, UserStatus,
};
pub use paths::{FieldPath, UpdateMap};
pub use queue::{UpdateQueue, UpdateQueueBuilder};
pub use sink::{sink_fn, FnSink, UpdateSink};
pub use store::{SessionPatch, SessionStore};
