//! Institutional entity classification

use regex::Regex;

use crate::error::ConfigError;

/// Decides whether an entity name belongs to an institutional party
///
/// With no patterns any non-blank entity name is institutional (the provider
/// only reports entity names for corporate owners). Patterns narrow that to
/// names matching at least one regex.
#[derive(Debug, Clone, Default)]
pub struct InvestorPolicy {
    patterns: Vec<Regex>,
}

impl InvestorPolicy {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::invalid("ETL_INVESTOR_PATTERNS", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_institutional(&self, name: Option<&str>) -> bool {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return false;
        };
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(name))
    }
}
