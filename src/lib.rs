//! taskdash: a realtime task dashboard client.
//!
//! Keeps a local cache of the viewer's tasks in sync with a hosted table
//! store, applies edits optimistically, turns change-feed events into
//! queued notifications and re-reads the authoritative data in debounced
//! batches.

pub mod auth;
pub mod backend;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod notifications;
pub mod permissions;
pub mod realtime;
pub mod reconcile;
pub mod refresh;
pub mod retry;
pub mod session;
pub mod storage;
pub mod store;
pub mod view;

pub use error::SyncError;
pub use session::{SessionOptions, SyncSession};
