//! The two kinds of job the engine knows how to run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Pipeline kind. Each kind has its own ordered stage list and finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Multi-agent journal content generation, producing a library project.
    ContentGeneration,
    /// Rendering an existing project to PDF / EPUB / KDP, producing a file.
    Export,
}

impl JobType {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentGeneration => "content_generation",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content_generation" => Ok(Self::ContentGeneration),
            "export" => Ok(Self::Export),
            other => Err(CoreError::Validation(format!(
                "Unknown job type '{other}'. Expected one of: content_generation, export"
            ))),
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
