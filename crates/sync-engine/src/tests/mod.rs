//! Scenario tests for the sync engine.
//!
//! - `harness.rs`    - shared wiring: in-memory remote, SQLite in memory,
//!                     memory session collaborators, recording notifier,
//!                     slow-subscribe remote wrapper
//! - `collector.rs`  - immediate upload, offline queueing, history catch-up
//! - `viewer.rs`     - backfill, mirrors, fall alerts, authorization changes
//! - `roles.rs`      - role precedence, dual-role isolation, role change, sign-out
//! - `queue.rs`      - queue bound, retry exhaustion, drain ordering
//! - `concurrency.rs` - mirror start guards, folded bootstrap passes
//! - `sensors.rs`    - sensor display names in both role pipelines
//! - `end_to_end.rs` - offline collector to mirrored viewer through the worker

pub(crate) mod harness;
mod roles;
