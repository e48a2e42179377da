//! gridq-scheduler: deployment admission and scheduling.
//!
//! Decides, for each queued deployment, whether it may start on its
//! cluster now, and keeps cluster capacity accounting consistent while
//! many submissions arrive concurrently.
//!
//! # Architecture
//!
//! ```text
//! SubmissionGateway ── persist QUEUED ──▶ StateStore
//!        └── publish Trigger ──▶ work queue ──▶ SchedulingWorker
//!                                                  ├── policy::evaluate
//!                                                  └── ResourceLedger::admit
//!                                                        (status + debit, one txn)
//! LifecycleManager ── complete/fail ──▶ ResourceLedger::settle ──▶ re-trigger cluster
//! QueueRescanner   ── periodic ──▶ re-trigger every queued deployment
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod publisher;
pub mod rescan;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use gateway::{SubmissionGateway, SubmitOutcome};
pub use ledger::ResourceLedger;
pub use lifecycle::LifecycleManager;
pub use policy::{Decision, DeferReason};
pub use publisher::TriggerPublisher;
pub use rescan::QueueRescanner;
pub use worker::{DiscardReason, ProcessOutcome, SchedulingWorker};
