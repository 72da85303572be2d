//! Tag composition for hosts and tasks.

use std::collections::HashSet;

use log::debug;

use crate::error::ConfigError;

/// Cross every configured suffix with every role as `role.suffix`.
///
/// Without suffixes the roles are returned unchanged.
pub fn node_tags(roles: &[&str], suffixes: &[String]) -> Vec<String> {
    if suffixes.is_empty() {
        return roles.iter().map(|r| r.to_string()).collect();
    }

    let mut tags = Vec::with_capacity(roles.len() * suffixes.len());
    for suffix in suffixes {
        for role in roles {
            tags.push(format!("{role}.{suffix}"));
        }
    }
    tags
}

/// Split a comma-separated label value into tags, dropping blanks and repeats.
pub fn split_tags(value: Option<&str>) -> Vec<String> {
    let mut tags = Vec::new();
    for tag in value.unwrap_or_default().split(',').map(str::trim) {
        if !tag.is_empty() {
            push_unique(&mut tags, tag);
        }
    }
    tags
}

/// Append `tag` unless it is already present.
pub fn push_unique(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

/// Order-insensitive comparison; a duplicate on either side never matches.
pub fn tags_match(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let left: HashSet<&str> = a.iter().map(String::as_str).collect();
    let right: HashSet<&str> = b.iter().map(String::as_str).collect();
    left.len() == a.len() && left == right
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagRule {
    pattern: String,
    tags: Vec<String>,
}

/// Ordered `pattern -> tags` table applied to cleaned task names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskTagRules {
    rules: Vec<TagRule>,
}

impl TaskTagRules {
    /// Parse `pattern:tag1,tag2` rules.
    ///
    /// Patterns are lowercased. A repeated pattern extends the rule that
    /// first declared it, keeping that rule's position.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let mut rules: Vec<TagRule> = Vec::new();

        for entry in entries {
            let entry = entry.as_ref();
            let invalid = || ConfigError::InvalidTaskTag {
                rule: entry.to_string(),
            };

            let (pattern, tags) = entry.split_once(':').ok_or_else(invalid)?;
            let pattern = pattern.trim().to_lowercase();
            let tags = split_tags(Some(tags));
            if pattern.is_empty() || tags.is_empty() {
                return Err(invalid());
            }

            match rules.iter_mut().find(|r| r.pattern == pattern) {
                Some(rule) => {
                    for tag in &tags {
                        push_unique(&mut rule.tags, tag);
                    }
                }
                None => rules.push(TagRule { pattern, tags }),
            }
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Extend `tags` with the tags of every rule whose pattern occurs in the
    /// lowercased task name.
    pub fn apply(&self, task_name: &str, mut tags: Vec<String>) -> Vec<String> {
        let name = task_name.to_lowercase();

        for rule in self.rules.iter().filter(|r| name.contains(&r.pattern)) {
            for tag in &rule.tags {
                if !tags.contains(tag) {
                    debug!("Task {} matches pattern {:?}, adding tag {}", name, rule.pattern, tag);
                    tags.push(tag.clone());
                }
            }
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_node_tags_without_suffixes() {
        assert_eq!(node_tags(&["agent", "follower"], &[]), strings(&["agent", "follower"]));
    }

    #[test]
    fn test_node_tags_cross_product() {
        let tags = node_tags(&["leader", "master"], &strings(&["dc1", "prod"]));
        assert_eq!(
            tags,
            strings(&["leader.dc1", "master.dc1", "leader.prod", "master.prod"])
        );
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags(Some("a,b, c,,")), strings(&["a", "b", "c"]));
        assert!(split_tags(Some("")).is_empty());
        assert!(split_tags(None).is_empty());
    }

    #[test]
    fn test_split_tags_drops_repeats() {
        assert_eq!(split_tags(Some("a,b,a, b")), strings(&["a", "b"]));
    }

    #[test]
    fn test_tags_match_is_order_insensitive() {
        assert!(tags_match(&strings(&["a", "b"]), &strings(&["b", "a"])));
        assert!(tags_match(&[], &[]));
        assert!(!tags_match(&strings(&["a"]), &strings(&["a", "b"])));
        assert!(!tags_match(&strings(&["a", "c"]), &strings(&["a", "b"])));
    }

    #[test]
    fn test_tags_match_rejects_duplicates() {
        assert!(!tags_match(&strings(&["a", "a"]), &strings(&["a", "b"])));
        assert!(!tags_match(&strings(&["a", "a"]), &strings(&["a", "a"])));
    }

    #[test]
    fn test_parse_rules() {
        let rules = TaskTagRules::parse(&["Web:public,http", "db:storage"]).unwrap();
        assert_eq!(rules.rules.len(), 2);
        assert_eq!(rules.rules[0].pattern, "web");
        assert_eq!(rules.rules[0].tags, strings(&["public", "http"]));
    }

    #[test]
    fn test_parse_merges_repeated_patterns() {
        let rules = TaskTagRules::parse(&["web:a", "db:b", "web:c,a"]).unwrap();
        assert_eq!(rules.rules.len(), 2);
        assert_eq!(rules.rules[0].tags, strings(&["a", "c"]));
    }

    #[test]
    fn test_parse_rejects_malformed_rules() {
        for bad in ["web", ":tag", "web:", "web: , "] {
            assert!(
                matches!(
                    TaskTagRules::parse(&[bad]),
                    Err(ConfigError::InvalidTaskTag { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_apply_is_case_insensitive_and_ordered() {
        let rules = TaskTagRules::parse(&["web:public,http", "service:svc,public"]).unwrap();
        let tags = rules.apply("Web-Service-1", strings(&["explicit"]));
        assert_eq!(tags, strings(&["explicit", "public", "http", "svc"]));
    }

    #[test]
    fn test_apply_never_duplicates() {
        let rules = TaskTagRules::parse(&["web:http,http2"]).unwrap();
        let tags = rules.apply("web", strings(&["http"]));
        assert_eq!(tags, strings(&["http", "http2"]));
    }

    #[test]
    fn test_apply_without_match() {
        let rules = TaskTagRules::parse(&["db:storage"]).unwrap();
        assert_eq!(rules.apply("web", vec![]), Vec::<String>::new());
        assert!(TaskTagRules::default().is_empty());
    }
}
