//! Tag predicates shared by mutes, subscriptions and pipeline filters.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

/// Comparison applied between an event tag value and a filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "=~")]
    Regex,
    #[serde(rename = "!~")]
    NotRegex,
}

#[derive(Debug, Clone)]
enum Compiled {
    Regex(Regex),
    Set(HashSet<String>),
}

/// A single `key <op> value` predicate.
///
/// `value` is kept as raw JSON: `in` accepts either a whitespace separated
/// string or an array; regex ops accept a string or a number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    #[serde(alias = "op")]
    pub func: TagOp,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(skip)]
    compiled: Option<Compiled>,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, func: TagOp, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            func,
            value,
            compiled: None,
        }
    }

    /// Build and compile in one step.
    pub fn compiled(key: impl Into<String>, func: TagOp, value: serde_json::Value) -> Result<Self> {
        let mut f = Self::new(key, func, value);
        f.prepare()?;
        Ok(f)
    }

    /// Compile regexes and value sets ahead of matching.
    pub fn prepare(&mut self) -> Result<()> {
        if self.key.is_empty() {
            return Err(VigilError::TagFilter {
                key: String::new(),
                reason: "tag key cannot be empty".into(),
            });
        }
        self.compiled = self.compile()?;
        Ok(())
    }

    fn compile(&self) -> Result<Option<Compiled>> {
        match self.func {
            TagOp::Regex | TagOp::NotRegex => {
                let pattern = match &self.value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(VigilError::TagFilter {
                            key: self.key.clone(),
                            reason: format!("unsupported value for regex: {other}"),
                        })
                    }
                };
                let re = Regex::new(&pattern).map_err(|source| VigilError::Regex {
                    pattern: pattern.clone(),
                    source,
                })?;
                Ok(Some(Compiled::Regex(re)))
            }
            TagOp::In | TagOp::NotIn => Ok(Some(Compiled::Set(value_set(&self.value)))),
            TagOp::Eq | TagOp::Ne => Ok(None),
        }
    }

    /// True when `value` satisfies this predicate.
    pub fn matches_value(&self, value: &str) -> bool {
        let lazy;
        let compiled = match &self.compiled {
            Some(c) => Some(c),
            None => {
                lazy = match self.compile() {
                    Ok(c) => c,
                    Err(_) => return false,
                };
                lazy.as_ref()
            }
        };

        match (self.func, compiled) {
            (TagOp::Eq, _) => scalar(&self.value).trim() == value.trim(),
            (TagOp::Ne, _) => scalar(&self.value).trim() != value.trim(),
            (TagOp::In, Some(Compiled::Set(set))) => set.contains(value),
            (TagOp::NotIn, Some(Compiled::Set(set))) => !set.contains(value),
            (TagOp::Regex, Some(Compiled::Regex(re))) => re.is_match(value),
            (TagOp::NotRegex, Some(Compiled::Regex(re))) => !re.is_match(value),
            _ => false,
        }
    }
}

/// Every filter must match, and every filtered key must be present.
pub fn match_tags(tags: &BTreeMap<String, String>, filters: &[TagFilter]) -> bool {
    filters.iter().all(|f| match tags.get(&f.key) {
        Some(v) => f.matches_value(v),
        None => false,
    })
}

/// Compile every filter in place.
pub fn prepare_all(filters: &mut [TagFilter]) -> Result<()> {
    filters.iter_mut().try_for_each(TagFilter::prepare)
}

fn scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_set(v: &serde_json::Value) -> HashSet<String> {
    match v {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|i| match i {
                serde_json::Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| (f as i64).to_string())
                    .unwrap_or_else(|| n.to_string()),
                other => scalar(other),
            })
            .collect(),
        other => scalar(other)
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    }
}
