//! Inclusion and exclusion patterns for operation names.

use regex::Regex;

use crate::config::FilterConfig;

/// Decides which operation names get instrumented.
///
/// When inclusion patterns are present only names matching one of them are
/// allowed and exclusion patterns are ignored. Otherwise every name is allowed
/// except those matching an exclusion pattern.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl OperationFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self, regex::Error> {
        Self::new(&config.include, &config.exclude)
    }

    /// A filter that allows every name.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn allows(&self, name: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|re| re.is_match(name));
        }
        !self.exclude.iter().any(|re| re.is_match(name))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}
