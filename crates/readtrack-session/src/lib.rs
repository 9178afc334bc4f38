//! Login and reading session management for readtrack.
//!
//! This crate handles the lifecycle of a participant's presence:
//!
//! 1. **Login sessions** ([`SessionCache`]): at most one live session per
//!    user, kept alive by heartbeats.
//! 2. **Reading sessions** ([`ReadingSessionManager`]): nested intervals of
//!    attention on an article or on the article list.
//! 3. **Reconciliation** ([`SessionCleanup`]): a background sweep that ends
//!    sessions whose users walked away, closing their reading sessions
//!    first.
//!
//! # How it fits in the stack
//!
//! ```text
//! Platform (above)        ← calls these managers from the request path
//!     ↕
//! Session layer (this crate)
//!     ↕
//! TtlCache + SessionStore ← injected; in-memory versions included
//! ```
//!
//! The cache is a hint and the store is the truth. Every terminal
//! transition is written to the store; the sweep resolves disagreement.

mod bounded;
mod cache;
mod cleanup;
mod config;
mod error;
mod manager;
mod reading;
mod store;

pub use cache::{MemoryTtlCache, TtlCache};
pub use cleanup::{CleanupLoop, CleanupReport, SessionCleanup};
pub use config::{CleanupConfig, ReadingConfig, SessionConfig, SingleSessionPolicy};
pub use error::{CacheError, SessionError, StoreError};
pub use manager::{HeartbeatStatus, NewLogin, SessionCache};
pub use reading::{CloseOutcome, OpenReading, ReadingSessionManager, check_close};
pub use store::{HeartbeatUpdate, MemorySessionStore, ReadingClose, SessionStore};
