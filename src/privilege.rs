//! Allow-list gate for task registration.

use regex::Regex;

use crate::error::ConfigError;

pub trait Privilege: Send + Sync {
    /// Whether the cleaned task `name` may be registered.
    fn allowed(&self, name: &str) -> bool;
}

impl<F> Privilege for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn allowed(&self, name: &str) -> bool {
        self(name)
    }
}

/// A name is allowed when it matches some whitelist pattern (or the
/// whitelist is empty) and no blacklist pattern.
#[derive(Debug, Clone, Default)]
pub struct RegexPrivilege {
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
}

impl RegexPrivilege {
    pub fn new<S: AsRef<str>>(whitelist: &[S], blacklist: &[S]) -> Result<Self, ConfigError> {
        Ok(Self {
            whitelist: compile(whitelist)?,
            blacklist: compile(blacklist)?,
        })
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|source| ConfigError::InvalidPattern {
                pattern: p.as_ref().to_string(),
                source,
            })
        })
        .collect()
}

impl Privilege for RegexPrivilege {
    fn allowed(&self, name: &str) -> bool {
        let whitelisted = self.whitelist.is_empty() || self.whitelist.iter().any(|r| r.is_match(name));
        whitelisted && !self.blacklist.iter().any(|r| r.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: &[&str] = &[];

    #[test]
    fn test_empty_lists_allow_everything() {
        let privilege = RegexPrivilege::new(NONE, NONE).unwrap();
        assert!(privilege.allowed("anything"));
    }

    #[test]
    fn test_whitelist() {
        let privilege = RegexPrivilege::new(&["^web", "api$"], NONE).unwrap();
        assert!(privilege.allowed("web-service-1"));
        assert!(privilege.allowed("public-api"));
        assert!(!privilege.allowed("db"));
    }

    #[test]
    fn test_blacklist_wins() {
        let privilege = RegexPrivilege::new(&["^web"], &["canary"]).unwrap();
        assert!(privilege.allowed("web"));
        assert!(!privilege.allowed("web-canary"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = RegexPrivilege::new(&["("], NONE);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_closures_are_privileges() {
        let deny_all = |_: &str| false;
        assert!(!deny_all.allowed("web"));
    }
}
