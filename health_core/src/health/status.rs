use serde::{Deserialize, Serialize};

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    #[default]
    Green,
    Red,
}

impl CheckStatus {
    pub fn ordinal(self) -> u8 {
        match self {
            CheckStatus::Green => 0,
            CheckStatus::Red => 1,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Green => write!(f, "Green"),
            CheckStatus::Red => write!(f, "Red"),
        }
    }
}

/// Composite status of a whole run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GlobalStatus {
    #[default]
    Green,
    Yellow,
    Red,
}

impl GlobalStatus {
    pub fn ordinal(self) -> u8 {
        match self {
            GlobalStatus::Green => 0,
            GlobalStatus::Yellow => 1,
            GlobalStatus::Red => 2,
        }
    }

    /// Folds one check outcome into the running status. Red is absorbing,
    /// Yellow only replaces Green, and Green outcomes never change anything.
    pub fn combine(self, status: CheckStatus, required: bool) -> GlobalStatus {
        match (status, required, self) {
            (CheckStatus::Green, _, current) => current,
            (CheckStatus::Red, true, _) => GlobalStatus::Red,
            (CheckStatus::Red, false, GlobalStatus::Green) => GlobalStatus::Yellow,
            (CheckStatus::Red, false, current) => current,
        }
    }

    pub fn rollup<I>(outcomes: I) -> GlobalStatus
    where
        I: IntoIterator<Item = (CheckStatus, bool)>,
    {
        outcomes
            .into_iter()
            .fold(GlobalStatus::Green, |global, (status, required)| {
                global.combine(status, required)
            })
    }

    /// Yellow still counts as serving.
    pub fn is_serving(self) -> bool {
        !matches!(self, GlobalStatus::Red)
    }
}

impl std::fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalStatus::Green => write!(f, "Green"),
            GlobalStatus::Yellow => write!(f, "Yellow"),
            GlobalStatus::Red => write!(f, "Red"),
        }
    }
}
