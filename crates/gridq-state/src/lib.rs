//! gridq-state: embedded state store for gridq.
//!
//! Backed by [redb](https://docs.rs/redb), holds the cluster registry,
//! deployment records, and the durable table of pending scheduling
//! triggers.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns
//! under numeric ids. redb runs one write transaction at a time, so every
//! read-check-write sequence done inside a single write transaction
//! (reservation, admission commit, release) is linearizable with respect
//! to every other one.
//!
//! Clusters carry a `version` counter bumped on each change to their
//! available capacity. Callers that decide outside a transaction pass the
//! version they read back in; a mismatch surfaces as
//! [`StateError::Conflict`] and nothing is written.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
