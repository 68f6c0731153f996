//! Known false-positive patterns
//!
//! An [`ExclusionPolicy`] is an ordered list of rules matched against the type
//! name or the reference name of a retained object. The watcher only passes it
//! along; the analyzer decides what a match means.

use crate::error::{LeakWatchError, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What an [`ExclusionRule`] pattern is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    TypeName,
    ReferenceName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub kind: ExclusionKind,

    /// Regular expression, matched anywhere in the candidate
    pub pattern: String,

    /// Why this is not considered a leak
    #[serde(default)]
    pub reason: String,

    /// Drop the finding entirely instead of reporting it as an excluded leak
    #[serde(default)]
    pub always_exclude: bool,

    #[serde(skip)]
    compiled: OnceCell<Regex>,
}

impl PartialEq for ExclusionRule {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.pattern == other.pattern
            && self.reason == other.reason
            && self.always_exclude == other.always_exclude
    }
}

impl Eq for ExclusionRule {}

impl ExclusionRule {
    pub fn new(kind: ExclusionKind, pattern: &str, reason: &str, always_exclude: bool) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
            reason: reason.to_string(),
            always_exclude,
            compiled: OnceCell::new(),
        }
    }

    /// Compiled pattern, built on first use
    pub fn regex(&self) -> Result<&Regex> {
        self.compiled.get_or_try_init(|| {
            Regex::new(&self.pattern).map_err(|e| {
                LeakWatchError::InvalidArgument(format!(
                    "invalid exclusion pattern '{}': {}",
                    self.pattern, e
                ))
            })
        })
    }

    fn matches(&self, type_name: &str, reference_name: &str) -> bool {
        let candidate = match self.kind {
            ExclusionKind::TypeName => type_name,
            ExclusionKind::ReferenceName => reference_name,
        };
        match self.regex() {
            Ok(re) => re.is_match(candidate),
            Err(e) => {
                warn!("Skipping exclusion rule: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionPolicy {
    #[serde(default)]
    rules: Vec<ExclusionRule>,
}

impl ExclusionPolicy {
    pub fn builder() -> ExclusionPolicyBuilder {
        ExclusionPolicyBuilder::default()
    }

    /// Build a policy from rules loaded elsewhere (e.g. a config file)
    pub fn from_rules(rules: Vec<ExclusionRule>) -> Result<Self> {
        let policy = Self { rules };
        policy.validate()?;
        Ok(policy)
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Compile every pattern, failing on the first bad one
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            rule.regex()?;
        }
        Ok(())
    }

    /// First rule matching the given object, in declaration order
    pub fn find_match(&self, type_name: &str, reference_name: &str) -> Option<&ExclusionRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(type_name, reference_name))
    }
}

#[derive(Debug, Default)]
pub struct ExclusionPolicyBuilder {
    rules: Vec<ExclusionRule>,
}

impl ExclusionPolicyBuilder {
    pub fn type_name(self, pattern: &str, reason: &str) -> Self {
        self.rule(ExclusionKind::TypeName, pattern, reason, false)
    }

    pub fn reference_name(self, pattern: &str, reason: &str) -> Self {
        self.rule(ExclusionKind::ReferenceName, pattern, reason, false)
    }

    /// Mark the most recently added rule as always excluded
    pub fn always_exclude(mut self) -> Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.always_exclude = true;
        }
        self
    }

    pub fn rule(mut self, kind: ExclusionKind, pattern: &str, reason: &str, always: bool) -> Self {
        self.rules
            .push(ExclusionRule::new(kind, pattern, reason, always));
        self
    }

    pub fn build(self) -> Result<ExclusionPolicy> {
        ExclusionPolicy::from_rules(self.rules)
    }
}
