//! The check abstraction shared by every kind of check

use crate::error::{CheckError, HealthError, Result};
use crate::health::status::CheckStatus;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// A named check of one dependency.
///
/// `update_status` runs the check, stores the outcome so that `status`
/// reflects it, and returns that same outcome. Checks report what they
/// observed or return an error; turning an error into Red is the runner's
/// job, not the check's.
#[async_trait::async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn required(&self) -> bool;

    fn tags(&self) -> &[String];

    /// Last computed status. Green until the first update.
    fn status(&self) -> CheckStatus;

    async fn update_status(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<CheckStatus, CheckError>;
}

/// Name, severity and tags common to all check types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckProperties {
    name: String,
    required: bool,
    tags: Vec<String>,
}

impl HealthCheckProperties {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HealthError::EmptyName);
        }

        Ok(Self {
            name,
            required: false,
            tags: Vec::new(),
        })
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        for tag in tags {
            self.push_tag(tag);
        }
        self
    }

    /// Appends a tag unless it is already present.
    pub fn push_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// Interior-mutable slot for a check's last status.
#[derive(Debug, Default)]
pub struct StatusCell(RwLock<CheckStatus>);

impl StatusCell {
    pub fn get(&self) -> CheckStatus {
        *self.0.read()
    }

    pub fn set(&self, status: CheckStatus) -> CheckStatus {
        *self.0.write() = status;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_reject_empty_name() {
        assert!(matches!(HealthCheckProperties::new(""), Err(HealthError::EmptyName)));
        assert!(matches!(HealthCheckProperties::new("   "), Err(HealthError::EmptyName)));
    }

    #[test]
    fn test_properties_defaults() {
        let properties = HealthCheckProperties::new("db").unwrap();
        assert_eq!(properties.name(), "db");
        assert!(!properties.is_required());
        assert!(properties.tags().is_empty());
    }

    #[test]
    fn test_tags_are_an_ordered_set() {
        let properties = HealthCheckProperties::new("db")
            .unwrap()
            .required(true)
            .with_tags(["sql", "primary", "sql"]);

        assert!(properties.is_required());
        assert_eq!(properties.tags(), &["sql".to_string(), "primary".to_string()]);
    }

    #[test]
    fn test_status_cell_defaults_to_green() {
        let cell = StatusCell::default();
        assert_eq!(cell.get(), CheckStatus::Green);
        assert_eq!(cell.set(CheckStatus::Red), CheckStatus::Red);
        assert_eq!(cell.get(), CheckStatus::Red);
    }
}
