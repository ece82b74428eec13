//! Spaced-repetition review state and deadline-driven study planning.
//!
//! The scheduling core ([`review`], [`mastery`], [`allocator`],
//! [`reconciler`], [`analytics`]) is pure: every operation takes plain
//! snapshots plus a [`clock::Clock`] and returns new values. [`db`] persists
//! those snapshots in SQLite.

pub mod allocator;
pub mod analytics;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mastery;
pub mod models;
pub mod queue;
pub mod reconciler;
pub mod review;

pub use allocator::Allocator;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{ConfigError, PlanError};
pub use reconciler::Reconciler;
