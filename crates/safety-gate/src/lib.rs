//! Safety gate for proposed browser actions.
//!
//! Pure classification of `(action, task configuration)` into
//! ALLOW / REQUIRE_CONFIRMATION / BLOCK. The rule set is configuration
//! data (kind tables, domain lists, target terms), never hardcoded in
//! the classifier; identical inputs always yield identical verdicts.

pub mod classify;
pub mod defaults;
pub mod errors;
pub mod loader;
pub mod model;

pub use classify::classify;
pub use defaults::default_policy;
pub use errors::PolicyError;
pub use loader::{load_policy, PolicyOverlay};
pub use model::{SafetyPolicy, TaskSafetyContext};
