//! Typed input parameters for each job type.
//!
//! Jobs store their parameters as raw JSON; these types are the validated
//! view the engine checks at creation time and the stage executors read
//! while the job runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::job_type::JobType;
use crate::types::JobId;

/// Default number of journal entries generated when none is requested.
pub const DEFAULT_ENTRY_COUNT: u32 = 30;

/// Upper bound on entries per generated journal.
pub const MAX_ENTRY_COUNT: u32 = 365;

/// Writing style used when the request omits one.
pub const DEFAULT_STYLE: &str = "inspirational";

/// Parameters of a `content_generation` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GenerationParams {
    #[validate(length(min = 1, max = 200))]
    pub theme: String,
    #[validate(length(min = 1, max = 100))]
    pub style: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(range(min = 1, max = 365))]
    pub entry_count: Option<u32>,
}

impl GenerationParams {
    pub fn style(&self) -> &str {
        self.style.as_deref().unwrap_or(DEFAULT_STYLE)
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count.unwrap_or(DEFAULT_ENTRY_COUNT)
    }
}

/// Output document format of an `export` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Epub,
    /// Print-ready interior for Kindle Direct Publishing.
    Kdp,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Kdp => "kdp",
        }
    }

    /// File extension of the rendered document.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf | Self::Kdp => "pdf",
            Self::Epub => "epub",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf | Self::Kdp => "application/pdf",
            Self::Epub => "application/epub+zip",
        }
    }
}

/// Parameters of an `export` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExportParams {
    /// The library project to render.
    pub project_id: JobId,
    pub format: ExportFormat,
    /// KDP trim size such as `6x9`; ignored for other formats.
    #[validate(length(min = 3, max = 16))]
    pub trim_size: Option<String>,
}

/// Deserialize and validate job parameters.
///
/// Both shape errors (missing or mistyped fields) and rule violations map
/// to [`CoreError::Validation`].
pub fn parse_params<T>(value: &serde_json::Value) -> Result<T, CoreError>
where
    T: DeserializeOwned + Validate,
{
    let params: T = serde_json::from_value(value.clone())
        .map_err(|e| CoreError::Validation(format!("Malformed parameters: {e}")))?;
    params
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    Ok(params)
}

/// Validate raw parameters against the rules of the given job type.
pub fn validate_for(job_type: JobType, value: &serde_json::Value) -> Result<(), CoreError> {
    match job_type {
        JobType::ContentGeneration => {
            let params: GenerationParams = parse_params(value)?;
            if params.theme.trim().is_empty() {
                return Err(CoreError::Validation("theme must not be blank".into()));
            }
        }
        JobType::Export => {
            parse_params::<ExportParams>(value)?;
        }
    }
    Ok(())
}
