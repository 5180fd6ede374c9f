use std::env;
use std::fs;
use std::path::Path;

use operator_core_types::ActionKind;
use serde::Deserialize;
use tracing::warn;

use crate::defaults::default_policy;
use crate::errors::PolicyError;
use crate::model::SafetyPolicy;

const ENV_BLOCKED_KINDS: &str = "OPERATOR_POLICY__BLOCKED_KINDS";
const ENV_CONFIRM_KINDS: &str = "OPERATOR_POLICY__CONFIRM_KINDS";
const ENV_CAUTION_DOMAINS: &str = "OPERATOR_POLICY__CAUTION_DOMAINS";
const ENV_TARGET_TERMS: &str = "OPERATOR_POLICY__SENSITIVE_TARGET_TERMS";

/// Partial policy document; absent sections keep the previous value.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyOverlay {
    #[serde(default)]
    pub blocked_kinds: Option<Vec<ActionKind>>,
    #[serde(default)]
    pub confirm_kinds: Option<Vec<ActionKind>>,
    #[serde(default)]
    pub caution_domains: Option<Vec<String>>,
    #[serde(default)]
    pub sensitive_target_terms: Option<Vec<String>>,
}

impl PolicyOverlay {
    fn apply(self, policy: &mut SafetyPolicy) {
        if let Some(kinds) = self.blocked_kinds {
            policy.blocked_kinds = kinds;
        }
        if let Some(kinds) = self.confirm_kinds {
            policy.confirm_kinds = kinds;
        }
        if let Some(domains) = self.caution_domains {
            policy.caution_domains = normalize(domains);
        }
        if let Some(terms) = self.sensitive_target_terms {
            policy.sensitive_target_terms = normalize(terms);
        }
    }
}

/// Build the effective policy: defaults, then the YAML file (when
/// given), then `OPERATOR_POLICY__*` environment variables.
pub fn load_policy(path: Option<&Path>) -> Result<SafetyPolicy, PolicyError> {
    let mut policy = default_policy();

    if let Some(path) = path {
        if path.exists() {
            overlay_from_file(path)?.apply(&mut policy);
        } else {
            warn!(path = %path.display(), "safety policy file not found, using defaults");
        }
    }

    overlay_from_env()?.apply(&mut policy);
    Ok(policy)
}

fn overlay_from_file(path: &Path) -> Result<PolicyOverlay, PolicyError> {
    let content = fs::read_to_string(path).map_err(|err| PolicyError::Io(err.to_string()))?;
    serde_yaml::from_str(&content).map_err(|err| PolicyError::Invalid(err.to_string()))
}

fn overlay_from_env() -> Result<PolicyOverlay, PolicyError> {
    let mut overlay = PolicyOverlay::default();
    if let Ok(raw) = env::var(ENV_BLOCKED_KINDS) {
        overlay.blocked_kinds = Some(parse_kinds(&raw)?);
    }
    if let Ok(raw) = env::var(ENV_CONFIRM_KINDS) {
        overlay.confirm_kinds = Some(parse_kinds(&raw)?);
    }
    if let Ok(raw) = env::var(ENV_CAUTION_DOMAINS) {
        overlay.caution_domains = Some(split_list(&raw));
    }
    if let Ok(raw) = env::var(ENV_TARGET_TERMS) {
        overlay.sensitive_target_terms = Some(split_list(&raw));
    }
    Ok(overlay)
}

fn parse_kinds(raw: &str) -> Result<Vec<ActionKind>, PolicyError> {
    split_list(raw)
        .into_iter()
        .map(|token| {
            serde_json::from_value(serde_json::Value::String(token.clone()))
                .map_err(|_| PolicyError::Invalid(format!("unknown action kind: {token}")))
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn normalize(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}
