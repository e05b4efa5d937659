//! Rules deciding which offset commits are not mirrored.
//!
//! A [`FilterPolicy`] ignores a record when any of its rules matches. Rules
//! look only at the record's key and match the whole group or topic name.

use regex::Regex;

use crate::config::FilterConfig;
use crate::model::{Keyed, OffsetKey};
use crate::Result;

/// A single ignore rule.
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Ignore when the group name matches
    Group(Regex),
    /// Ignore when the topic name matches
    Topic(Regex),
}

impl FilterRule {
    /// Rule matching group names against `pattern`
    pub fn group(pattern: &str) -> Result<Self> {
        Ok(FilterRule::Group(full_match(pattern)?))
    }

    /// Rule matching topic names against `pattern`
    pub fn topic(pattern: &str) -> Result<Self> {
        Ok(FilterRule::Topic(full_match(pattern)?))
    }

    pub fn matches(&self, key: &OffsetKey) -> bool {
        match self {
            FilterRule::Group(re) => re.is_match(key.group()),
            FilterRule::Topic(re) => re.is_match(key.topic()),
        }
    }
}

fn full_match(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})$", pattern))?)
}

/// Logical OR of a fixed list of rules.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    rules: Vec<FilterRule>,
}

impl FilterPolicy {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Build the policy described by a filter configuration
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let groups = config.groups.iter().map(|p| FilterRule::group(p));
        let topics = config.topics.iter().map(|p| FilterRule::topic(p));
        Ok(Self::new(groups.chain(topics).collect::<Result<Vec<_>>>()?))
    }

    /// Add a rule, returning the extended policy
    pub fn ignore(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Whether the record must not be forwarded
    pub fn should_ignore<R: Keyed>(&self, record: &R) -> bool {
        let key = record.offset_key();
        self.rules.iter().any(|rule| rule.matches(key))
    }
}
