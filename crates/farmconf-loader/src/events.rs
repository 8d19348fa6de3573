//! Load-completion events published by the distribution pipeline.

use chrono::{DateTime, Utc};
use std::fmt;

/// Result of loading one module into one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Attributes were pushed; `failed` of them were refused
    Updated { pushed: usize, failed: usize },
    /// Content matches the last push
    Unchanged,
    /// The consolidated document has no such module
    Missing,
    Failed(String),
}

impl ModuleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ModuleOutcome::Failed(_))
    }
}

impl fmt::Display for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleOutcome::Updated { pushed, failed } => {
                write!(f, "updated ({} pushed, {} failed)", pushed, failed)
            }
            ModuleOutcome::Unchanged => f.write_str("unchanged"),
            ModuleOutcome::Missing => f.write_str("missing"),
            ModuleOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoadEvent {
    ModuleLoaded {
        app: String,
        module: String,
        outcome: ModuleOutcome,
        at: DateTime<Utc>,
    },
    /// Sent once per application and cycle, after every module
    AppLoaded {
        app: String,
        success: bool,
        at: DateTime<Utc>,
    },
}

impl LoadEvent {
    pub fn app(&self) -> &str {
        match self {
            LoadEvent::ModuleLoaded { app, .. } | LoadEvent::AppLoaded { app, .. } => app,
        }
    }
}
