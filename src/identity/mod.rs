use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{Result, StoreError};

pub const DEFAULT_LABEL: &str = "untitled_note";
const MAX_LABEL_BYTES: usize = 120;
const MAX_KEY_BYTES: usize = 200;

static OPAQUE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("opaque key pattern compiles")
});

/// How a note's storage key is derived when it is created or imported.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Random UUID per note; the first body line is only a display title.
    #[default]
    OpaqueId,
    /// Key is the sanitized title, suffixed `_1`, `_2`, ... on collision.
    TitleDerived,
}

impl IdentityPolicy {
    pub fn mint(&self, desired: Option<&str>, existing: &HashSet<String>) -> Result<String> {
        self.mint_with(desired, existing, Uuid::new_v4)
    }

    /// Same as [`mint`](Self::mint) with an injectable id source.
    pub fn mint_with<F>(
        &self,
        desired: Option<&str>,
        existing: &HashSet<String>,
        mut next_id: F,
    ) -> Result<String>
    where
        F: FnMut() -> Uuid,
    {
        match self {
            IdentityPolicy::OpaqueId => loop {
                let key = next_id().hyphenated().to_string();
                if !existing.contains(&key) {
                    return Ok(key);
                }
                tracing::debug!(%key, "generated id already in use, regenerating");
            },
            IdentityPolicy::TitleDerived => mint_from_label(desired.unwrap_or_default(), existing),
        }
    }

    /// Whether `key` collides with one of `existing`. Title-derived keys are
    /// compared case-insensitively so "Foo" and "foo" never share a file.
    pub fn is_taken(&self, key: &str, existing: &HashSet<String>) -> bool {
        match self {
            IdentityPolicy::OpaqueId => existing.contains(key),
            IdentityPolicy::TitleDerived => {
                let wanted = key.to_lowercase();
                existing.contains(key)
                    || existing.iter().any(|taken| taken.to_lowercase() == wanted)
            }
        }
    }

    /// Whether `name` already looks like a key this policy would produce.
    pub fn matches_key_format(&self, name: &str) -> bool {
        match self {
            IdentityPolicy::OpaqueId => OPAQUE_KEY.is_match(name),
            IdentityPolicy::TitleDerived => {
                validate_key(name).is_ok() && sanitize_label(name) == name
            }
        }
    }
}

fn mint_from_label(desired: &str, existing: &HashSet<String>) -> Result<String> {
    let base = sanitize_label(desired);
    // the fallback label makes this unreachable unless sanitization regresses
    validate_key(&base)?;

    let policy = IdentityPolicy::TitleDerived;
    if !policy.is_taken(&base, existing) {
        return Ok(base);
    }
    let mut suffix: u64 = 1;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !policy.is_taken(&candidate, existing) {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

/// Turns free text into a filename-safe label.
///
/// Uses the first non-empty line, joins whitespace runs with `_`, keeps
/// alphanumerics plus `-`, `_` and `.`, and drops everything else. Falls back
/// to [`DEFAULT_LABEL`] when nothing survives.
pub fn sanitize_label(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    let mut label = String::with_capacity(line.len().min(MAX_LABEL_BYTES));
    let mut pending_separator = false;
    for ch in line.chars() {
        if ch.is_whitespace() {
            pending_separator = true;
            continue;
        }
        if !(ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.')) {
            continue;
        }
        if label.is_empty() && matches!(ch, '.' | '_' | '-') {
            pending_separator = false;
            continue;
        }
        let needed = ch.len_utf8() + usize::from(pending_separator && !label.is_empty());
        if label.len() + needed > MAX_LABEL_BYTES {
            break;
        }
        if pending_separator && !label.is_empty() {
            label.push('_');
        }
        pending_separator = false;
        label.push(ch);
    }

    let trimmed = label.trim_end_matches('.');
    if trimmed.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Rejects keys that could escape the notes directory or collide with
/// hidden or temporary files. Applied to every key regardless of policy.
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.len() > MAX_KEY_BYTES {
        Some("key is too long")
    } else if key.starts_with('.') {
        Some("key must not start with '.'")
    } else if key.contains(&['/', '\\', ':'][..]) {
        Some("key contains a path separator")
    } else if key.chars().any(char::is_control) {
        Some("key contains control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn title_policy_probes_suffixes_in_order() -> anyhow::Result<()> {
        let existing = keys(&["foo", "foo_1"]);
        let key = IdentityPolicy::TitleDerived.mint(Some("foo"), &existing)?;
        assert_eq!(key, "foo_2");
        Ok(())
    }

    #[test]
    fn title_policy_is_deterministic() -> anyhow::Result<()> {
        let existing = keys(&["Shopping_list"]);
        let first = IdentityPolicy::TitleDerived.mint(Some("Shopping list\nmilk"), &existing)?;
        let second = IdentityPolicy::TitleDerived.mint(Some("Shopping list\nmilk"), &existing)?;
        assert_eq!(first, "Shopping_list_1");
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn title_policy_treats_case_variants_as_taken() -> anyhow::Result<()> {
        let existing = keys(&["Plan"]);
        let key = IdentityPolicy::TitleDerived.mint(Some("plan"), &existing)?;
        assert_eq!(key, "plan_1");
        Ok(())
    }

    #[test]
    fn taken_check_follows_policy_case_rules() {
        let existing = keys(&["Todo", "0F8FAD5B-D9CB-469F-A165-70867728950E"]);
        assert!(IdentityPolicy::TitleDerived.is_taken("todo", &existing));
        assert!(IdentityPolicy::TitleDerived.is_taken("Todo", &existing));
        assert!(!IdentityPolicy::TitleDerived.is_taken("todo_1", &existing));
        let upper = "0F8FAD5B-D9CB-469F-A165-70867728950E";
        assert!(IdentityPolicy::OpaqueId.is_taken(upper, &existing));
        assert!(!IdentityPolicy::OpaqueId.is_taken("todo", &existing));
    }

    #[test]
    fn title_policy_falls_back_to_default_label() -> anyhow::Result<()> {
        let empty = HashSet::new();
        assert_eq!(IdentityPolicy::TitleDerived.mint(None, &empty)?, DEFAULT_LABEL);
        assert_eq!(
            IdentityPolicy::TitleDerived.mint(Some("  \n ?!*/ \n"), &empty)?,
            DEFAULT_LABEL
        );
        let existing = keys(&[DEFAULT_LABEL]);
        assert_eq!(
            IdentityPolicy::TitleDerived.mint(Some(""), &existing)?,
            "untitled_note_1"
        );
        Ok(())
    }

    #[test]
    fn sanitize_strips_traversal_and_separators() {
        assert_eq!(sanitize_label("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_label("\n\n  Meeting: 10/12 notes  \nbody"), "Meeting_1012_notes");
        assert_eq!(sanitize_label("...hidden"), "hidden");
        assert_eq!(sanitize_label("version 1.2."), "version_1.2");
        assert_eq!(sanitize_label("Café crème"), "Café_crème");
    }

    #[test]
    fn sanitize_caps_label_length() {
        let long = "x".repeat(500);
        let label = sanitize_label(&long);
        assert_eq!(label.len(), MAX_LABEL_BYTES);
        assert!(validate_key(&label).is_ok());
    }

    #[test]
    fn sanitize_output_is_a_fixed_point() {
        for input in ["Hello World", "a / b", "--x--", "Ünïcödé tïtle", ""] {
            let once = sanitize_label(input);
            assert_eq!(sanitize_label(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn opaque_policy_renders_canonical_uuid() -> anyhow::Result<()> {
        let key = IdentityPolicy::OpaqueId.mint(Some("ignored title"), &HashSet::new())?;
        assert_eq!(key.len(), 36);
        assert!(IdentityPolicy::OpaqueId.matches_key_format(&key));
        assert_eq!(key, key.to_lowercase());
        Ok(())
    }

    #[test]
    fn opaque_policy_regenerates_on_collision() -> anyhow::Result<()> {
        let taken = Uuid::from_u128(1);
        let fresh = Uuid::from_u128(2);
        let taken_key = taken.hyphenated().to_string();
        let existing = keys(&[taken_key.as_str()]);
        let mut ids = vec![fresh, taken, taken].into_iter().rev();
        let mut calls = 0;
        let key = IdentityPolicy::OpaqueId.mint_with(None, &existing, || {
            calls += 1;
            ids.next().unwrap_or(fresh)
        })?;
        assert_eq!(key, fresh.hyphenated().to_string());
        assert_eq!(calls, 3);
        Ok(())
    }

    #[test]
    fn repeated_mints_are_pairwise_distinct() -> anyhow::Result<()> {
        for policy in [IdentityPolicy::OpaqueId, IdentityPolicy::TitleDerived] {
            let mut existing = HashSet::new();
            for _ in 0..50 {
                let key = policy.mint(Some("same title"), &existing)?;
                assert!(existing.insert(key), "{policy} minted a duplicate");
            }
        }
        Ok(())
    }

    #[test]
    fn key_format_per_policy() {
        let uuid = "0f8fad5b-d9cb-469f-a165-70867728950e";
        assert!(IdentityPolicy::OpaqueId.matches_key_format(uuid));
        assert!(IdentityPolicy::OpaqueId.matches_key_format(&uuid.to_uppercase()));
        assert!(!IdentityPolicy::OpaqueId.matches_key_format("groceries"));
        assert!(!IdentityPolicy::OpaqueId.matches_key_format(&format!("{uuid}.txt")));

        assert!(IdentityPolicy::TitleDerived.matches_key_format("groceries_2"));
        assert!(IdentityPolicy::TitleDerived.matches_key_format(uuid));
        assert!(!IdentityPolicy::TitleDerived.matches_key_format("two words"));
        assert!(!IdentityPolicy::TitleDerived.matches_key_format(".hidden"));
    }

    #[test]
    fn validate_key_rejects_escapes() {
        for bad in ["", "../../etc/passwd", "..", ".", "a/b", "a\\b", "c:evil", "nul\0byte"] {
            assert_matches!(validate_key(bad), Err(StoreError::InvalidKey { .. }), "{bad:?}");
        }
        assert!(validate_key("groceries_1").is_ok());
    }

    #[test]
    fn policy_parses_from_kebab_case() {
        assert_eq!("title-derived".parse::<IdentityPolicy>().ok(), Some(IdentityPolicy::TitleDerived));
        assert_eq!(IdentityPolicy::OpaqueId.to_string(), "opaque-id");
    }
}
