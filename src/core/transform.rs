//! FP-003: Name transform.
//!
//! User names become planner-safe identifiers: lowercase, `[a-z0-9_]` only,
//! starting with a letter. Every rewrite is recorded so plan output can be
//! mapped back to the names the user wrote.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One rewrite from a user name to its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TransformRecord {
    pub source: String,
    pub target: String,
}

/// Canonical identifier for a name, without recording anything.
pub fn canonical(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if !out.starts_with(|c: char| c.is_ascii_lowercase()) {
        out.insert_str(0, "n_");
    }
    out
}

/// Ordered list of recorded rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameTransform {
    records: Vec<TransformRecord>,
}

impl NameTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `name`, recording the rewrite when it changes anything.
    pub fn normalize(&mut self, name: &str) -> String {
        let target = canonical(name);
        self.record(name, &target);
        target
    }

    /// Normalize `name` to an identifier not in `taken`, appending `suffix`
    /// until it is free.
    pub fn normalize_unique<F>(&mut self, name: &str, suffix: &str, taken: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        let mut target = canonical(name);
        while taken(&target) {
            target.push_str(suffix);
        }
        self.record(name, &target);
        target
    }

    fn record(&mut self, source: &str, target: &str) {
        if source == target {
            return;
        }
        let exists = self
            .records
            .iter()
            .any(|r| r.source == source && r.target == target);
        if !exists {
            self.records.push(TransformRecord {
                source: source.to_string(),
                target: target.to_string(),
            });
        }
    }

    /// The last recorded source for `target`, or `target` itself.
    pub fn revert(&self, target: &str) -> String {
        self.records
            .iter()
            .rev()
            .find(|r| r.target == target)
            .map(|r| r.source.clone())
            .unwrap_or_else(|| target.to_string())
    }

    /// Targets claimed by more than one distinct source. A source that is
    /// already canonical counts when `identity` reports it.
    pub fn collisions<F>(&self, identity: F) -> Vec<(String, Vec<String>)>
    where
        F: Fn(&str) -> bool,
    {
        let mut grouped: indexmap::IndexMap<&str, Vec<String>> = indexmap::IndexMap::new();
        for r in &self.records {
            grouped
                .entry(r.target.as_str())
                .or_default()
                .push(r.source.clone());
        }
        grouped
            .into_iter()
            .filter_map(|(target, mut sources)| {
                if identity(target) {
                    sources.insert(0, target.to_string());
                }
                sources.dedup();
                (sources.len() > 1).then(|| (target.to_string(), sources))
            })
            .collect()
    }

    pub fn records(&self) -> &[TransformRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<TransformRecord>> for NameTransform {
    fn from(records: Vec<TransformRecord>) -> Self {
        Self { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fp003_canonical() {
        assert_eq!(canonical("db_link"), "db_link");
        assert_eq!(canonical("Account Info"), "account_info");
        assert_eq!(canonical("Case-Conflict"), "case_conflict");
        assert_eq!(canonical("2fa code"), "n_2fa_code");
        assert_eq!(canonical("_hidden"), "n__hidden");
        assert_eq!(canonical(""), "n_");
    }

    #[test]
    fn test_fp003_record_only_changes() {
        let mut t = NameTransform::new();
        assert_eq!(t.normalize("errors"), "errors");
        assert!(t.is_empty());
        assert_eq!(t.normalize("Account Info"), "account_info");
        assert_eq!(t.normalize("Account Info"), "account_info");
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_fp003_revert() {
        let mut t = NameTransform::new();
        t.normalize("Fix Errors");
        assert_eq!(t.revert("fix_errors"), "Fix Errors");
        assert_eq!(t.revert("untouched"), "untouched");
    }

    #[test]
    fn test_fp003_collisions() {
        let mut t = NameTransform::new();
        t.normalize("Case Conflict");
        t.normalize("Case-Conflict");
        t.normalize("Other");
        let found = t.collisions(|_| false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "case_conflict");
        assert_eq!(found[0].1, vec!["Case Conflict", "Case-Conflict"]);
    }

    #[test]
    fn test_fp003_collision_with_identity() {
        let mut t = NameTransform::new();
        t.normalize("Case Conflict");
        let found = t.collisions(|name| name == "case_conflict");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, vec!["case_conflict", "Case Conflict"]);
    }

    #[test]
    fn test_fp003_normalize_unique() {
        let mut t = NameTransform::new();
        let id = t.normalize_unique("X", "_op", |n| n == "x");
        assert_eq!(id, "x_op");
        assert_eq!(t.revert("x_op"), "X");
        assert_eq!(t.revert("x"), "x");
    }

    proptest! {
        #[test]
        fn prop_canonical_is_planner_safe(s in ".{0,24}") {
            let c = canonical(&s);
            prop_assert!(c.starts_with(|ch: char| ch.is_ascii_lowercase()));
            prop_assert!(c.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_'));
        }

        #[test]
        fn prop_canonical_is_idempotent(s in ".{0,24}") {
            let once = canonical(&s);
            prop_assert_eq!(canonical(&once), once);
        }

        #[test]
        fn prop_revert_inverts_normalize(s in "[A-Za-z][A-Za-z0-9 ]{0,16}") {
            let mut t = NameTransform::new();
            let target = t.normalize(&s);
            prop_assert_eq!(t.revert(&target), s);
        }
    }
}
