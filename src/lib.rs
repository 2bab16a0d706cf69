#![forbid(unsafe_code)]

//! # thinktank
//!
//! Runs a small, user-configurable sequence of LLM calls ("stages") against a
//! single problem statement. Each stage sees the problem plus the outputs of
//! every stage completed before it; the first failure halts the run. Every
//! run is recorded with its request payloads, outputs, token usage, cost and
//! timing, and the whole workspace persists as one snapshot.
//!
//! The pieces, leaves first:
//! - [`stages`]: ordered stage configuration and built-in defaults
//! - [`gateway`]: one OpenRouter chat completion per stage invocation
//! - [`ledger`]: bounded, newest-first history of runs and stage results
//! - [`executor`]: the sequential run loop, emitting stage transition events
//! - [`store`]: snapshot persistence over a key-value backend
//! - [`workbench`]: the state holder that ties these together

pub mod config;
pub mod executor;
pub mod gateway;
pub mod ledger;
pub mod prompts;
pub mod report;
pub mod stages;
pub mod store;
pub mod workbench;

pub use config::Settings;
pub use executor::{
    execute_plan, ChannelObserver, LaunchBlocker, RunPlan, RunReport, StageEvent, StageObserver,
};
pub use gateway::{Completion, CompletionClient, CompletionError, OpenRouterAdapter};
pub use ledger::{PipelineRun, RunLedger, RunSummary, StageResult, StageStatus, StageTransition};
pub use stages::{StageConfig, StageList};
pub use store::{KeyValueStore, MemoryStore, Snapshot, SqliteStore, StoreError};
pub use workbench::{Workbench, WorkbenchError};
