//! Configuration Management
//!
//! The connector's configuration surface: the service-account key file
//! (required) and an optional project allow-list or deny-list. The two list
//! variants are mutually exclusive; this is validated once when the scope
//! is built, before any client is constructed.

use crate::sync::ProjectScope;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connector configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to the service-account JSON key file
    pub credentials_file: PathBuf,
    /// Only sync these projects
    #[serde(default)]
    pub allow_projects: Vec<String>,
    /// Sync everything except these projects
    #[serde(default)]
    pub deny_projects: Vec<String>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Build the project scope, rejecting contradictory list settings
    pub fn scope(&self) -> Result<ProjectScope> {
        match (self.allow_projects.is_empty(), self.deny_projects.is_empty()) {
            (true, true) => Ok(ProjectScope::All),
            (false, true) => Ok(ProjectScope::allow(self.allow_projects.iter().cloned())),
            (true, false) => Ok(ProjectScope::deny(self.deny_projects.iter().cloned())),
            (false, false) => anyhow::bail!(
                "allow-projects and deny-projects are mutually exclusive"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_lists_mean_all_projects() {
        let config = Config::default();
        assert!(matches!(config.scope().unwrap(), ProjectScope::All));
    }

    #[test]
    fn test_allow_list_builds_allow_scope() {
        let config = Config {
            allow_projects: vec!["proj-a".to_string()],
            ..Default::default()
        };
        let scope = config.scope().unwrap();
        assert!(scope.permits("proj-a"));
        assert!(!scope.permits("proj-b"));
    }

    #[test]
    fn test_deny_list_builds_deny_scope() {
        let config = Config {
            deny_projects: vec!["proj-a".to_string()],
            ..Default::default()
        };
        let scope = config.scope().unwrap();
        assert!(!scope.permits("proj-a"));
        assert!(scope.permits("proj-b"));
    }

    #[test]
    fn test_both_lists_are_rejected() {
        let config = Config {
            allow_projects: vec!["proj-a".to_string()],
            deny_projects: vec!["proj-b".to_string()],
            ..Default::default()
        };
        assert!(config.scope().is_err());
    }
}
