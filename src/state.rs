//! Application state shared with the HTTP handlers.

use prometheus::Registry;
use std::sync::Arc;

use responsiveness_guard::stats::GuardStats;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// State served by `/metrics` and `/health`; the guard loop writes to the
/// same registry and stats.
pub struct AppState {
    pub registry: Registry,
    pub stats: Arc<GuardStats>,
}
