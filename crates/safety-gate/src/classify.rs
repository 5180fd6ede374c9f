use operator_core_types::{Action, ActionKind, Verdict};
use tracing::debug;
use url::Url;

use crate::model::{SafetyPolicy, TaskSafetyContext};

/// Classify one proposed action.
///
/// Evaluation order is fixed: block rules first (non-overridable),
/// then caution-domain confirmation, then action-kind confirmation,
/// then sensitive target terms, then the task-level flag, else allow.
/// Stateless and deterministic.
pub fn classify(policy: &SafetyPolicy, action: &Action, ctx: &TaskSafetyContext<'_>) -> Verdict {
    if policy.blocks_kind(action.kind) {
        debug!(kind = action.kind.name(), "action kind is blocked by policy");
        return Verdict::Block;
    }

    if let Some(domain) = matched_caution_domain(policy, action, ctx) {
        debug!(
            kind = action.kind.name(),
            domain, "caution domain forces confirmation"
        );
        return Verdict::RequireConfirmation;
    }

    if policy.confirms_kind(action.kind) {
        debug!(kind = action.kind.name(), "action kind requires confirmation");
        return Verdict::RequireConfirmation;
    }

    if let Some(term) = matched_target_term(policy, action) {
        debug!(
            kind = action.kind.name(),
            term, "sensitive target term forces confirmation"
        );
        return Verdict::RequireConfirmation;
    }

    if ctx.require_confirmation {
        return Verdict::RequireConfirmation;
    }

    Verdict::Allow
}

/// The URL the action would effectively run against: the navigation
/// target for navigate actions, the current page otherwise.
fn effective_url<'a>(action: &'a Action, ctx: &TaskSafetyContext<'a>) -> Option<&'a str> {
    match action.kind {
        ActionKind::Navigate => action.target.as_deref().or(ctx.current_url),
        _ => ctx.current_url,
    }
}

fn matched_caution_domain(
    policy: &SafetyPolicy,
    action: &Action,
    ctx: &TaskSafetyContext<'_>,
) -> Option<String> {
    let raw = effective_url(action, ctx)?;
    let haystack = match Url::parse(raw) {
        Ok(parsed) => parsed.host_str().map(|h| h.to_ascii_lowercase()),
        Err(_) => None,
    }
    // Bare hostnames and fragments still get substring matching.
    .unwrap_or_else(|| raw.to_ascii_lowercase());

    policy
        .caution_domains
        .iter()
        .find(|domain| !domain.is_empty() && haystack.contains(domain.as_str()))
        .cloned()
}

fn matched_target_term(policy: &SafetyPolicy, action: &Action) -> Option<String> {
    let target = action.target.as_deref()?.to_ascii_lowercase();
    policy
        .sensitive_target_terms
        .iter()
        .find(|term| !term.is_empty() && target.contains(term.as_str()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::default_policy;

    fn ctx<'a>(url: Option<&'a str>) -> TaskSafetyContext<'a> {
        TaskSafetyContext::new(url, false)
    }

    #[test]
    fn allows_plain_navigation() {
        let policy = default_policy();
        let action = Action::navigate("https://docs.example.org/guide");
        assert_eq!(classify(&policy, &action, &ctx(None)), Verdict::Allow);
    }

    #[test]
    fn block_rule_wins_over_everything() {
        let mut policy = default_policy();
        policy.blocked_kinds.push(ActionKind::Submit);
        let action = Action::new(ActionKind::Submit).with_target("button.buy-now");
        // Submit is also a confirm kind, on a caution domain, with a
        // sensitive term: block still wins.
        let context = ctx(Some("https://checkout.example.com/cart"));
        assert_eq!(classify(&policy, &action, &context), Verdict::Block);
    }

    #[test]
    fn caution_domain_gates_any_kind() {
        let policy = default_policy();
        let action = Action::click("a.next-page");
        let context = ctx(Some("https://payment.example.com/"));
        assert_eq!(
            classify(&policy, &action, &context),
            Verdict::RequireConfirmation
        );
    }

    #[test]
    fn navigate_target_domain_is_checked() {
        let policy = default_policy();
        let action = Action::navigate("https://www.paypal.com/signin");
        assert_eq!(
            classify(&policy, &action, &ctx(None)),
            Verdict::RequireConfirmation
        );
    }

    #[test]
    fn sensitive_target_term_gates_clicks() {
        let policy = default_policy();
        let action = Action::click("#purchase-button");
        assert_eq!(
            classify(&policy, &action, &ctx(Some("https://example.com"))),
            Verdict::RequireConfirmation
        );
    }

    #[test]
    fn task_flag_gates_everything_else() {
        let policy = default_policy();
        let action = Action::navigate("https://docs.example.org");
        let context = TaskSafetyContext::new(None, true);
        assert_eq!(
            classify(&policy, &action, &context),
            Verdict::RequireConfirmation
        );
    }

    #[test]
    fn unparseable_url_falls_back_to_substring() {
        let policy = default_policy();
        let action = Action::click("a");
        let context = ctx(Some("checkout page (no scheme)"));
        assert_eq!(
            classify(&policy, &action, &context),
            Verdict::RequireConfirmation
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let policy = default_policy();
        let actions = [
            Action::navigate("https://www.stripe.com"),
            Action::click("#buy"),
            Action::type_text("#q", "weather"),
            Action::new(ActionKind::Submit),
            Action::new(ActionKind::Extract),
        ];
        let urls = [None, Some("https://example.com"), Some("https://mybank.io")];
        for action in &actions {
            for url in urls {
                for flag in [false, true] {
                    let context = TaskSafetyContext::new(url, flag);
                    let first = classify(&policy, action, &context);
                    for _ in 0..3 {
                        assert_eq!(classify(&policy, action, &context), first);
                    }
                }
            }
        }
    }
}
