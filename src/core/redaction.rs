//! Text-level redaction of the serialized report.
//!
//! Rules work on the canonical JSON text, not on the document tree: the
//! sensitive value can show up in paths, environment variables or command
//! lines, so every occurrence is replaced wherever it appears. A rule that
//! cannot find its sensitive value fails, and the caller disables it and
//! assembles again.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::fields;

use super::store::StoreSnapshot;

/// Token that replaces every redacted occurrence
pub const PLACEHOLDER: &str = "[REDACTED]";

/// A disableable redaction rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedactionRule {
    /// Remove the OS username
    RemoveUsername,

    /// Remove the commercial OneDrive folder path
    RemoveOneDriveCommercial,
}

impl RedactionRule {
    pub const ALL: [RedactionRule; 2] = [
        RedactionRule::RemoveUsername,
        RedactionRule::RemoveOneDriveCommercial,
    ];

    /// Every text form of the sensitive value, longest first
    fn needles(&self, snapshot: &StoreSnapshot) -> Result<Vec<String>, RedactionError> {
        let value = match self {
            Self::RemoveUsername => snapshot
                .get_str(fields::USERNAME)
                .map(str::to_string)
                .ok_or(RedactionError::UsernameMissing)?,
            Self::RemoveOneDriveCommercial => snapshot
                .get(fields::USER_VARIABLES)
                .and_then(Value::as_object)
                .and_then(|vars| vars.get(fields::ONEDRIVE_COMMERCIAL_VAR))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(RedactionError::OneDriveCommercialMissing)?,
        };

        let mut needles = vec![json_escaped(&value), value];
        let mut seen = HashSet::new();
        needles.retain(|n| !n.is_empty() && seen.insert(n.clone()));
        needles.sort_by(|a, b| b.len().cmp(&a.len()));
        Ok(needles)
    }
}

impl fmt::Display for RedactionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveUsername => write!(f, "remove-username"),
            Self::RemoveOneDriveCommercial => write!(f, "remove-onedrive-commercial"),
        }
    }
}

/// A rule could not locate its sensitive value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedactionError {
    #[error("Username redaction failed. The username was not collected.")]
    UsernameMissing,

    #[error("Commercial OneDrive redaction failed. This usually happens when Commercial OneDrive is not installed.")]
    OneDriveCommercialMissing,
}

impl RedactionError {
    /// The rule that failed
    pub fn rule(&self) -> RedactionRule {
        match self {
            Self::UsernameMissing => RedactionRule::RemoveUsername,
            Self::OneDriveCommercialMissing => RedactionRule::RemoveOneDriveCommercial,
        }
    }
}

/// The set of rules still enabled for a logical run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redactor {
    enabled: Vec<RedactionRule>,
}

impl Redactor {
    pub fn new(rules: impl IntoIterator<Item = RedactionRule>) -> Self {
        let mut enabled = Vec::new();
        for rule in rules {
            if !enabled.contains(&rule) {
                enabled.push(rule);
            }
        }
        Self { enabled }
    }

    pub fn enabled(&self) -> &[RedactionRule] {
        &self.enabled
    }

    pub fn is_enabled(&self, rule: RedactionRule) -> bool {
        self.enabled.contains(&rule)
    }

    /// Turn a rule off for the rest of the run. Returns false if it was
    /// already off.
    pub fn disable(&mut self, rule: RedactionRule) -> bool {
        let before = self.enabled.len();
        self.enabled.retain(|r| *r != rule);
        self.enabled.len() != before
    }

    /// Apply every enabled rule to `text`. Fails on the first rule whose
    /// sensitive value is missing from the snapshot.
    ///
    /// Needles from all rules are gathered before anything is replaced and
    /// applied longest first, so one rule's replacement can never break
    /// another rule's match (a username inside the OneDrive path).
    pub fn redact(&self, text: &str, snapshot: &StoreSnapshot) -> Result<String, RedactionError> {
        let mut needles = Vec::new();
        for rule in &self.enabled {
            needles.extend(rule.needles(snapshot)?);
        }
        let mut seen = HashSet::new();
        needles.retain(|n| seen.insert(n.clone()));
        needles.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut output = text.to_string();
        for needle in &needles {
            output = replace_bounded(&output, needle);
        }
        debug!(rules = self.enabled.len(), needles = needles.len(), "Redaction applied");
        Ok(output)
    }
}

/// The value as it appears inside a JSON string literal
fn json_escaped(value: &str) -> String {
    let quoted = serde_json::to_string(value).unwrap_or_default();
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// Replace every occurrence of `needle` that is not part of a longer word.
///
/// Text already replaced by [`PLACEHOLDER`] is never touched again, so
/// applying the same needle twice gives the same output.
pub fn replace_bounded(text: &str, needle: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    for (i, segment) in text.split(PLACEHOLDER).enumerate() {
        if i > 0 {
            output.push_str(PLACEHOLDER);
        }
        replace_in_segment(segment, needle, &mut output);
    }
    output
}

fn replace_in_segment(segment: &str, needle: &str, output: &mut String) {
    let check_start = needle.chars().next().is_some_and(char::is_alphanumeric);
    let check_end = needle.chars().next_back().is_some_and(char::is_alphanumeric);

    let mut last = 0;
    for (start, _) in segment.match_indices(needle) {
        let end = start + needle.len();
        let start_ok = !check_start
            || segment[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
        let end_ok = !check_end
            || segment[end..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric());

        if start_ok && end_ok {
            output.push_str(&segment[last..start]);
            output.push_str(PLACEHOLDER);
            last = end;
        }
    }
    output.push_str(&segment[last..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> StoreSnapshot {
        StoreSnapshot::default()
            .with_field(fields::USERNAME, "alice")
            .with_field(
                fields::USER_VARIABLES,
                json!({"OneDriveCommercial": "C:\\Users\\alice\\OneDrive - Contoso"}),
            )
    }

    #[test]
    fn test_replace_respects_word_boundaries() {
        assert_eq!(
            replace_bounded("alice malice alice_x alice", "alice"),
            "[REDACTED] malice [REDACTED]_x [REDACTED]"
        );
    }

    #[test]
    fn test_prefixed_forms_replaced() {
        let text = r#"{"Owner": "HOST\\alice", "Domain": "CORP\\alice", "Path": "C:\\Users\\alice"}"#;
        let out = Redactor::new([RedactionRule::RemoveUsername])
            .redact(text, &snapshot())
            .unwrap();

        assert!(out.contains(r#""HOST\\[REDACTED]""#));
        assert!(out.contains(r#""CORP\\[REDACTED]""#));
        assert!(out.contains(r#""C:\\Users\\[REDACTED]""#));
        assert!(!out.contains("alice"));
    }

    #[test]
    fn test_onedrive_escaped_form_replaced() {
        let report = json!({"Path": "C:\\Users\\alice\\OneDrive - Contoso\\Documents"});
        let text = serde_json::to_string_pretty(&report).unwrap();

        let out = Redactor::new([RedactionRule::RemoveOneDriveCommercial])
            .redact(&text, &snapshot())
            .unwrap();

        assert!(out.contains(r#""[REDACTED]\\Documents""#));
    }

    #[test]
    fn test_both_rules_remove_onedrive_path_in_any_order() {
        let report = json!({
            "Username": "alice",
            "P": "C:\\Users\\alice\\OneDrive - Contoso\\Docs",
        });
        let text = serde_json::to_string_pretty(&report).unwrap();

        for rules in [
            [RedactionRule::RemoveUsername, RedactionRule::RemoveOneDriveCommercial],
            [RedactionRule::RemoveOneDriveCommercial, RedactionRule::RemoveUsername],
        ] {
            let out = Redactor::new(rules).redact(&text, &snapshot()).unwrap();
            assert!(!out.contains("Contoso"), "{}", out);
            assert!(!out.contains("alice"), "{}", out);
            assert!(out.contains(r#""[REDACTED]\\Docs""#), "{}", out);
        }
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let redactor = Redactor::new(RedactionRule::ALL);
        let text = r#"{"Username": "alice", "P": "C:\\Users\\alice\\OneDrive - Contoso"}"#;

        let once = redactor.redact(text, &snapshot()).unwrap();
        let twice = redactor.redact(&once, &snapshot()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_needle_inside_placeholder_left_alone() {
        let snapshot = StoreSnapshot::default().with_field(fields::USERNAME, "RED");
        let redactor = Redactor::new([RedactionRule::RemoveUsername]);

        let once = redactor.redact("user RED", &snapshot).unwrap();
        assert_eq!(once, "user [REDACTED]");
        assert_eq!(redactor.redact(&once, &snapshot).unwrap(), once);
    }

    #[test]
    fn test_missing_source_fails_rule() {
        let redactor = Redactor::new(RedactionRule::ALL);
        let err = redactor.redact("{}", &StoreSnapshot::default()).unwrap_err();
        assert_eq!(err, RedactionError::UsernameMissing);
        assert_eq!(err.rule(), RedactionRule::RemoveUsername);

        let wrong_type = StoreSnapshot::default()
            .with_field(fields::USERNAME, "alice")
            .with_field(fields::USER_VARIABLES, json!({"OneDriveCommercial": 5}));
        assert_eq!(
            redactor.redact("{}", &wrong_type).unwrap_err(),
            RedactionError::OneDriveCommercialMissing
        );
    }

    #[test]
    fn test_disable_is_durable() {
        let mut redactor = Redactor::new([RedactionRule::RemoveUsername, RedactionRule::RemoveUsername]);
        assert_eq!(redactor.enabled().len(), 1);
        assert!(redactor.disable(RedactionRule::RemoveUsername));
        assert!(!redactor.disable(RedactionRule::RemoveUsername));
        assert_eq!(redactor.redact("alice", &StoreSnapshot::default()).unwrap(), "alice");
    }
}
