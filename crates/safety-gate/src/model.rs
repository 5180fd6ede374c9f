use operator_core_types::ActionKind;
use serde::{Deserialize, Serialize};

/// Classification rule tables.
///
/// Everything in here is data an operator can tune without touching
/// the classifier: which action kinds are forbidden outright, which
/// always need a human, which domains force elevated caution, and
/// which target descriptors look sensitive.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SafetyPolicy {
    /// Action kinds that are never executed. Non-overridable.
    pub blocked_kinds: Vec<ActionKind>,

    /// Action kinds that always require confirmation.
    pub confirm_kinds: Vec<ActionKind>,

    /// Substrings matched against the host of the page (or the
    /// navigation target); a hit forces confirmation regardless of
    /// action kind.
    pub caution_domains: Vec<String>,

    /// Substrings matched against the action's target descriptor;
    /// a hit forces confirmation.
    pub sensitive_target_terms: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        crate::defaults::default_policy()
    }
}

impl SafetyPolicy {
    pub fn blocks_kind(&self, kind: ActionKind) -> bool {
        self.blocked_kinds.contains(&kind)
    }

    pub fn confirms_kind(&self, kind: ActionKind) -> bool {
        self.confirm_kinds.contains(&kind)
    }
}

/// The slice of task configuration the gate may look at.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskSafetyContext<'a> {
    /// URL of the page the action would run against.
    pub current_url: Option<&'a str>,

    /// Task-level flag: when set, every action is gated.
    pub require_confirmation: bool,
}

impl<'a> TaskSafetyContext<'a> {
    pub fn new(current_url: Option<&'a str>, require_confirmation: bool) -> Self {
        Self {
            current_url,
            require_confirmation,
        }
    }
}
