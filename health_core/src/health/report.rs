use crate::health::status::{CheckStatus, GlobalStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-check entry of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyReport {
    pub status: CheckStatus,
    pub required: bool,
    pub tags: Vec<String>,
}

/// Composite result of one run, keyed by check name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckReport {
    pub status: GlobalStatus,
    pub started_on: DateTime<Utc>,
    pub terminated_on: DateTime<Utc>,
    pub dependencies: BTreeMap<String, DependencyReport>,
}

impl HealthCheckReport {
    pub fn new(started_on: DateTime<Utc>) -> Self {
        Self {
            status: GlobalStatus::Green,
            started_on,
            terminated_on: started_on,
            dependencies: BTreeMap::new(),
        }
    }

    /// Records a check outcome and folds it into the global status. A name
    /// that is already present is overwritten.
    pub fn add_dependency(&mut self, name: String, dependency: DependencyReport) -> bool {
        self.status = self.status.combine(dependency.status, dependency.required);
        self.dependencies.insert(name, dependency).is_some()
    }

    pub fn finish(mut self, terminated_on: DateTime<Utc>) -> Self {
        self.terminated_on = terminated_on;
        self
    }

    pub fn is_serving(&self) -> bool {
        self.status.is_serving()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.terminated_on - self.started_on
    }
}
