//! Autonomous search orchestrator for a fleet of media-management backend
//! connectors. This crate implements the search-orchestration pipeline: the
//! search-registry state machine, priority scoring, the per-connector
//! priority queue, episode batching, the throttle-aware dispatcher,
//! cooldown/backlog backoff, indexer-health monitoring, and the
//! multi-channel notification dispatcher.
//!
//! Every module here is independently testable against a trait-based
//! persistence seam (`*Repository` traits) rather than a live database, the
//! same way a workflow engine is tested against a repository trait object
//! instead of a real connection pool.

pub mod backoff;
pub mod batcher;
pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod events;
pub mod indexer_health;
pub mod logging;
pub mod notification_dispatcher;
pub mod notification_senders;
pub mod notification_templates;
pub mod priority;
pub mod queue;
pub mod quiet_hours;
pub mod registry;
pub mod retry;
pub mod throttle;
