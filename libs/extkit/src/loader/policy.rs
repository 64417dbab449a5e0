//! Decides, per resource identifier, which scopes are consulted and in what order.

use glob::Pattern;
use serde::Deserialize;

use super::LoaderError;

/// Resolution order between the enclosing scope and the isolated child scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupStrategy {
    EnclosingFirst,
    IsolatedFirst,
    EnclosingOnly,
    IsolatedOnly,
}

/// One side of a composite loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Enclosing,
    Isolated,
}

impl LookupStrategy {
    /// Scopes to try, in order.
    #[must_use]
    pub fn scopes(self) -> &'static [Scope] {
        match self {
            Self::EnclosingFirst => &[Scope::Enclosing, Scope::Isolated],
            Self::IsolatedFirst => &[Scope::Isolated, Scope::Enclosing],
            Self::EnclosingOnly => &[Scope::Enclosing],
            Self::IsolatedOnly => &[Scope::Isolated],
        }
    }
}

/// Immutable table of `pattern -> strategy` rules plus a fallback.
///
/// Rules are tested in declaration order; the first matching pattern wins.
#[derive(Debug, Clone)]
pub struct LookupPolicy {
    rules: Vec<(Pattern, LookupStrategy)>,
    default: LookupStrategy,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default: LookupStrategy::IsolatedFirst,
        }
    }
}

impl LookupPolicy {
    #[must_use]
    pub fn builder() -> LookupPolicyBuilder {
        LookupPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Strategy applying to `identifier`.
    #[must_use]
    pub fn lookup_strategy(&self, identifier: &str) -> LookupStrategy {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(identifier))
            .map_or(self.default, |(_, strategy)| *strategy)
    }

    #[must_use]
    pub fn default_strategy(&self) -> LookupStrategy {
        self.default
    }
}

pub struct LookupPolicyBuilder {
    policy: LookupPolicy,
}

impl LookupPolicyBuilder {
    /// Append a rule for identifiers matching the glob `pattern`.
    ///
    /// # Errors
    /// Returns `LoaderError::InvalidPattern` if `pattern` is not a valid glob.
    pub fn rule(mut self, pattern: &str, strategy: LookupStrategy) -> Result<Self, LoaderError> {
        let compiled = Pattern::new(pattern).map_err(|source| LoaderError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        self.policy.rules.push((compiled, strategy));
        Ok(self)
    }

    #[must_use]
    pub fn default_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.policy.default = strategy;
        self
    }

    #[must_use]
    pub fn build(self) -> LookupPolicy {
        self.policy
    }
}
