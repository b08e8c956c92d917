//! Herald core domain types.
//!
//! Pure, I/O-free building blocks shared by the gating engine and the HTTP
//! service:
//!
//! - [`presence`]: normalized presence events and their webhook wire shape.
//! - [`decision`]: publish priorities and gate decisions.
//! - [`clock`]: injectable time source for TTL evaluation.
//! - [`backoff`]: exponential backoff with full jitter.
//! - [`config`]: tunables loaded from the environment.
//! - [`metric_names`]: canonical counter names.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod metric_names;
pub mod presence;
pub mod types;
