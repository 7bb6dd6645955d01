//! Per-session resource policy.
//!
//! Whether a caller is exempt from limits is decided once, when the `Caller`
//! is resolved. The rest of the pipeline only looks at the resulting
//! `SessionPolicy`.

use std::time::Duration;

use super::language::Language;

/// The identity a session runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    identity: String,
    unrestricted: bool,
}

impl Caller {
    /// A regular caller, subject to memory and time limits.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            unrestricted: false,
        }
    }

    /// A caller exempt from memory and time limits.
    pub fn unrestricted(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            unrestricted: true,
        }
    }

    /// Resolves the capability by comparing against the configured superuser.
    pub fn resolve(identity: impl Into<String>, superuser: Option<&str>) -> Self {
        let identity = identity.into();
        let unrestricted = superuser.is_some_and(|su| su == identity);
        Self {
            identity,
            unrestricted,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }
}

/// Limits applied to one session's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Memory cap in bytes, `None` for unlimited.
    pub memory_limit: Option<i64>,
    /// Wall-clock limit for the run phase, `None` for no timeout.
    pub time_limit: Option<Duration>,
}

impl SessionPolicy {
    pub fn for_caller(caller: &Caller, language: &Language, default_memory: i64) -> Self {
        if caller.is_unrestricted() {
            Self {
                memory_limit: None,
                time_limit: None,
            }
        } else {
            Self {
                memory_limit: Some(default_memory),
                time_limit: Some(language.time_limit()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> Language {
        Language::new("python", "python3 main.py", "main.py").with_time_limit_ms(3000)
    }

    #[test]
    fn test_resolve_superuser() {
        let su = Caller::resolve("admin@host", Some("admin@host"));
        assert!(su.is_unrestricted());
        assert_eq!(su.identity(), "admin@host");

        let user = Caller::resolve("alice@host", Some("admin@host"));
        assert!(!user.is_unrestricted());

        let nobody_configured = Caller::resolve("admin@host", None);
        assert!(!nobody_configured.is_unrestricted());
    }

    #[test]
    fn test_restricted_policy() {
        let policy = SessionPolicy::for_caller(&Caller::new("alice"), &python(), 1024);
        assert_eq!(policy.memory_limit, Some(1024));
        assert_eq!(policy.time_limit, Some(Duration::from_millis(3000)));
    }

    #[test]
    fn test_unrestricted_policy() {
        let policy = SessionPolicy::for_caller(&Caller::unrestricted("root"), &python(), 1024);
        assert_eq!(policy.memory_limit, None);
        assert_eq!(policy.time_limit, None);
    }
}
