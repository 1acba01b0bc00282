//! # Tasksync Store
//!
//! An in-process implementation of the [`StoreClient`] contract.
//!
//! The backend holds the task table and a realtime hub; each session is a
//! [`MemoryStore`] handle with its own signed-in user. Writes from any
//! session are broadcast to every subscribed channel, which is what drives
//! live updates across collections.
//!
//! [`StoreClient`]: tasksync_engine::StoreClient

pub mod config;
pub mod hub;
pub mod memory;

pub use config::{ConfigError, DemoConfig};
pub use hub::{RealtimeHub, SessionId, Subscriber};
pub use memory::{Gate, MemoryBackend, MemoryStore, StoreOp};
