//! Real-time conversation synchronization: one multiplexed live connection,
//! durable event subscriptions, per-conversation timelines with optimistic
//! sends, typing presence and cursor-based history.

pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod service;
pub mod store;
pub mod transport;

pub use errors::SyncError;
pub use service::{ChatService, ServiceEvent};
