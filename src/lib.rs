// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! GitGov — a git-native governance substrate.
//!
//! Tasks, cycles, actors, agents, executions, feedback, and changelogs
//! are persisted as signed JSON records under `.gitgov/` and synchronized
//! between participants through the `gitgov-state` branch. This facade
//! crate re-exports the member crates under stable names; depend on the
//! individual crates when you only need a slice.

pub use gitgov_agent as agent;
pub use gitgov_bus as bus;
pub use gitgov_config as config;
pub use gitgov_diagram as diagram;
pub use gitgov_metrics as metrics;
pub use gitgov_projection as projection;
pub use gitgov_record as record;
pub use gitgov_remote as remote;
pub use gitgov_scheduler as scheduler;
pub use gitgov_store as store;
pub use gitgov_sync as sync;
pub use gitgov_webhook as webhook;
