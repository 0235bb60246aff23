//! Package install/uninstall lifecycle core.
//!
//! This crate provides the on-host engine that drives a package between
//! install states: name normalization, cross-process and in-process
//! mutual exclusion, a content-addressed local repository, an installer
//! action reader, the install/uninstall/rollback state machine itself, and
//! an inventory content-hash dedup cache. It is designed to be embedded in
//! an agent runtime rather than run standalone -- the remote manifest/
//! artifact fetch service and the sub-document executor are modeled as
//! traits (see [`service`]) so the embedding application supplies real
//! implementations while tests substitute fakes.

/// Process-wide and cross-process mutual exclusion (components B and C).
pub mod lock;
/// Deterministic mapping from arbitrary identifiers to safe directory names
/// (component A).
pub mod normalize;
/// Injectable directory layout and tuning knobs.
pub mod config;
/// Aggregated error type surfaced by the lifecycle engine.
pub mod error;
/// The install/uninstall/rollback state machine (component F).
pub mod engine;
/// Resolves an action name to a runnable sub-document (component E).
pub mod installer;
/// Content-hash dedup cache for inventory uploads (component G).
pub mod inventory;
/// On-disk package artifact/state repository (component D).
pub mod repo;
/// Trait boundaries for the out-of-scope external collaborators.
pub mod service;

pub use config::Config;
pub use engine::{CancelFlag, Engine, EngineRequest, EngineResponse, RequestAction, ResultStatus};
pub use error::EngineError;
