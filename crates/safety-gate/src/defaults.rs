use operator_core_types::ActionKind;

use crate::model::SafetyPolicy;

/// Built-in rule set.
///
/// The domain and target-term lists mirror the heuristics the service
/// shipped with historically; deployments are expected to override
/// them through the loader rather than edit this table.
pub fn default_policy() -> SafetyPolicy {
    SafetyPolicy {
        blocked_kinds: Vec::new(),
        confirm_kinds: vec![ActionKind::Submit, ActionKind::FillForm],
        caution_domains: [
            "bank", "payment", "checkout", "billing", "financial", "paypal", "stripe", "amazon",
            "shop", "store",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        sensitive_target_terms: ["submit", "buy", "purchase", "pay", "order"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}
