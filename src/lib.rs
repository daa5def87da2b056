//! responsiveness-guard library.
//!
//! Samples per-process CPU counters, converts them into a share of the whole
//! machine and hands processes above a CPU budget to an external enforcer.
//! The binary wires these modules to the CLI, the config file and an
//! optional Prometheus endpoint.

pub mod config;
pub mod counter;
pub mod enforcer;
pub mod guard;
pub mod metrics;
pub mod policy;
pub mod process;
pub mod replay;
pub mod stats;
pub mod system;
pub mod tracker;

pub use config::Config;
pub use counter::{CounterError, CounterSource};
pub use enforcer::{CommandEnforcer, DryRunEnforcer, EnforceError, EnforcementSink};
pub use guard::{GuardLoop, GuardState, TickReport};
pub use policy::{Action, PolicyEngine};
pub use process::{ProcessEnumerator, ProcessLister};
pub use tracker::{usage_percent, UsageTracker};
