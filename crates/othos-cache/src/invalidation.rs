//! Invalidation rules and glob pattern matching
//!
//! Maps named mutation operations to the glob patterns that must be purged,
//! and resolves cascade patterns for changes that ripple across entity types
//! (a dot edit invalidates its parent collection's cached list, and so on).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entry::EntityType;

/// What causes a rule to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationTrigger {
    Mutation,
    Time,
    Session,
    Manual,
}

/// Declarative invalidation rule, embedded in the cache metadata record.
/// Rules are static configuration; they are never created at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRule {
    pub trigger: InvalidationTrigger,
    pub pattern: String,
    pub entity_types: Vec<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_rules: Option<Vec<String>>,
}

/// Pattern templates per known mutation operation. `{userId}` and
/// `{entityId}` are substituted at lookup time; templates whose placeholders
/// cannot be filled are skipped.
///
/// Dot mutations always include the owner's collections list: dot counts and
/// positions are denormalized into it.
static OPERATION_PATTERNS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("create-collection", vec!["user:{userId}:collections*"]),
        (
            "update-collection",
            vec![
                "user:{userId}:collections*",
                "user:{userId}:collection:{entityId}*",
            ],
        ),
        (
            "delete-collection",
            vec![
                "user:{userId}:collections*",
                "user:{userId}:collection:{entityId}*",
                "*:dots:{entityId}*",
                "*:snapshots:{entityId}*",
            ],
        ),
        (
            "create-dot",
            vec!["user:{userId}:dots*", "user:{userId}:collections*"],
        ),
        (
            "update-dot",
            vec![
                "user:{userId}:dots*",
                "user:{userId}:dot:{entityId}*",
                "user:{userId}:collections*",
            ],
        ),
        (
            "delete-dot",
            vec![
                "user:{userId}:dots*",
                "user:{userId}:dot:{entityId}*",
                "user:{userId}:collections*",
            ],
        ),
        ("create-snapshot", vec!["user:{userId}:snapshots*"]),
        (
            "delete-snapshot",
            vec![
                "user:{userId}:snapshots*",
                "user:{userId}:snapshot:{entityId}*",
            ],
        ),
        (
            "update-preferences",
            vec!["user:{userId}:preferences*", "user:{userId}:ui-state*"],
        ),
    ])
});

/// Resolve the purge patterns for a named mutation operation.
///
/// Unknown operations yield an empty list; the caller logs the no-op.
pub fn invalidation_patterns(
    operation: &str,
    entity_id: Option<&str>,
    user_id: Option<&str>,
) -> Vec<String> {
    let Some(templates) = OPERATION_PATTERNS.get(operation) else {
        return Vec::new();
    };
    templates
        .iter()
        .filter_map(|template| fill_template(template, entity_id, user_id))
        .collect()
}

fn fill_template(template: &str, entity_id: Option<&str>, user_id: Option<&str>) -> Option<String> {
    let mut pattern = template.to_string();
    if pattern.contains("{userId}") {
        pattern = pattern.replace("{userId}", user_id?);
    }
    if pattern.contains("{entityId}") {
        pattern = pattern.replace("{entityId}", entity_id?);
    }
    Some(pattern)
}

/// Cascade patterns for a change to one entity, covering the related entries
/// that must not outlive it.
pub fn cascade_patterns(entity_type: EntityType, entity_id: Option<&str>) -> Vec<String> {
    match entity_type {
        // a collection owns its dots and snapshots and is denormalized into
        // the collections list
        EntityType::Collection => match entity_id {
            Some(id) => vec![
                format!("*:dots:{id}*"),
                format!("*:snapshots:{id}*"),
                format!("*:collection:{id}*"),
                "*:collections*".to_string(),
            ],
            None => vec![
                "*:dots*".to_string(),
                "*:snapshots*".to_string(),
                "*:collections*".to_string(),
            ],
        },
        // a dot is summarized in its parent collection and the collections list
        EntityType::Dot => vec!["*:collection:*".to_string(), "*:collections*".to_string()],
        // snapshots are leaf records
        EntityType::Snapshot => Vec::new(),
        EntityType::UserPreferences => vec!["*:ui-state*".to_string()],
    }
}

/// Compile a glob into an anchored regex: `*` matches any run of characters,
/// `?` exactly one, everything else literally.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            _ => source.push_str(&regex::escape(&ch.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
}

/// The static rule set recorded in fresh metadata. Kept declarative so the
/// effective configuration is inspectable alongside the rest of the record.
pub fn default_rules() -> Vec<InvalidationRule> {
    vec![
        InvalidationRule {
            trigger: InvalidationTrigger::Mutation,
            pattern: "user:{userId}:collections*".to_string(),
            entity_types: vec![EntityType::Collection, EntityType::Dot],
            cascade_rules: Some(vec![
                "*:dots:{entityId}*".to_string(),
                "*:snapshots:{entityId}*".to_string(),
            ]),
        },
        InvalidationRule {
            trigger: InvalidationTrigger::Mutation,
            pattern: "user:{userId}:dots*".to_string(),
            entity_types: vec![EntityType::Dot],
            cascade_rules: Some(vec!["*:collections*".to_string()]),
        },
        InvalidationRule {
            trigger: InvalidationTrigger::Mutation,
            pattern: "user:{userId}:snapshots*".to_string(),
            entity_types: vec![EntityType::Snapshot],
            cascade_rules: None,
        },
        InvalidationRule {
            trigger: InvalidationTrigger::Mutation,
            pattern: "user:{userId}:preferences*".to_string(),
            entity_types: vec![EntityType::UserPreferences],
            cascade_rules: Some(vec!["*:ui-state*".to_string()]),
        },
        InvalidationRule {
            trigger: InvalidationTrigger::Session,
            pattern: "*".to_string(),
            entity_types: vec![
                EntityType::Collection,
                EntityType::Dot,
                EntityType::Snapshot,
                EntityType::UserPreferences,
            ],
            cascade_rules: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn matches(pattern: &str, candidate: &str) -> bool {
        glob_to_regex(pattern).unwrap().is_match(candidate)
    }

    #[test]
    fn test_glob_star_and_question_mark() {
        assert!(matches("*:dots:c1*", "u1:dots:c1-extra"));
        assert!(!matches("*:dots:c1*", "u1:dots:c2"));
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "ac"));
        assert!(!matches("a?c", "abbc"));
    }

    #[test]
    fn test_glob_is_anchored() {
        assert!(!matches("dots", "u1:dots:c1"));
        assert!(matches("*dots*", "u1:dots:c1"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "axb"));
        assert!(matches("cost(usd)+[eur]", "cost(usd)+[eur]"));
    }

    #[test]
    fn test_operation_lookup_substitutes_placeholders() {
        let patterns = invalidation_patterns("update-dot", Some("d1"), Some("u1"));
        assert_eq!(
            patterns,
            vec![
                "user:u1:dots*".to_string(),
                "user:u1:dot:d1*".to_string(),
                "user:u1:collections*".to_string(),
            ]
        );
    }

    #[test]
    fn test_operation_lookup_skips_unfillable_templates() {
        // without an entity id the per-entity template drops out
        let patterns = invalidation_patterns("update-dot", None, Some("u1"));
        assert_eq!(
            patterns,
            vec![
                "user:u1:dots*".to_string(),
                "user:u1:collections*".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_operation_is_empty() {
        assert!(invalidation_patterns("truncate-universe", Some("x"), Some("u1")).is_empty());
    }

    #[test]
    fn test_collection_cascade_covers_children_and_list() {
        let patterns = cascade_patterns(EntityType::Collection, Some("c1"));
        assert!(patterns.contains(&"*:dots:c1*".to_string()));
        assert!(patterns.contains(&"*:snapshots:c1*".to_string()));
        assert!(patterns.contains(&"*:collection:c1*".to_string()));
        assert!(patterns.contains(&"*:collections*".to_string()));
    }

    #[test]
    fn test_snapshot_has_no_cascade() {
        assert!(cascade_patterns(EntityType::Snapshot, Some("s1")).is_empty());
    }

    /// Reference matcher: naive backtracking over the same glob dialect.
    fn naive_glob(pattern: &[char], candidate: &[char]) -> bool {
        match (pattern.first(), candidate.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                naive_glob(&pattern[1..], candidate)
                    || (!candidate.is_empty() && naive_glob(pattern, &candidate[1..]))
            }
            (Some('?'), Some(_)) => naive_glob(&pattern[1..], &candidate[1..]),
            (Some(p), Some(c)) if p == c => naive_glob(&pattern[1..], &candidate[1..]),
            _ => false,
        }
    }

    proptest! {
        #[test]
        fn prop_glob_agrees_with_reference(
            pattern in "[abc:*?]{0,8}",
            candidate in "[abc:]{0,8}",
        ) {
            let compiled = glob_to_regex(&pattern).unwrap();
            let pattern_chars: Vec<char> = pattern.chars().collect();
            let candidate_chars: Vec<char> = candidate.chars().collect();
            prop_assert_eq!(
                compiled.is_match(&candidate),
                naive_glob(&pattern_chars, &candidate_chars)
            );
        }
    }
}
