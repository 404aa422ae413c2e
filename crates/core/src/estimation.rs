//! Duration estimates for jobs, reported at creation time and while polling.

use crate::job_type::JobType;
use crate::params::{GenerationParams, DEFAULT_ENTRY_COUNT};

// ---------------------------------------------------------------------------
// Baselines
// ---------------------------------------------------------------------------

/// Fixed overhead of a generation run (theme analysis, titles, editing).
pub const GENERATION_BASE_SECS: i32 = 60;

/// Additional generation time per journal entry.
pub const GENERATION_SECS_PER_ENTRY: i32 = 4;

/// Typical wall-clock time of an export render.
pub const EXPORT_BASE_SECS: i32 = 45;

// ---------------------------------------------------------------------------
// Estimation logic
// ---------------------------------------------------------------------------

/// Estimate total run time of a job from its type and raw parameters.
///
/// Unparseable parameters fall back to the defaults; validation happens
/// elsewhere.
pub fn estimate_duration_secs(job_type: JobType, params: &serde_json::Value) -> i32 {
    match job_type {
        JobType::ContentGeneration => {
            let entries = serde_json::from_value::<GenerationParams>(params.clone())
                .map(|p| p.entry_count())
                .unwrap_or(DEFAULT_ENTRY_COUNT);
            GENERATION_BASE_SECS + GENERATION_SECS_PER_ENTRY * entries as i32
        }
        JobType::Export => EXPORT_BASE_SECS,
    }
}

/// Estimate the seconds left for a job.
///
/// Once progress has been made the observed rate is extrapolated; before
/// that the static estimate minus elapsed time is used. Terminal jobs have
/// nothing remaining.
pub fn estimate_remaining_secs(
    estimated_total_secs: Option<i32>,
    elapsed_secs: i64,
    progress_percent: i16,
    terminal: bool,
) -> Option<i64> {
    if terminal {
        return Some(0);
    }
    let elapsed = elapsed_secs.max(0);
    if progress_percent > 0 {
        let progress = i64::from(progress_percent.min(100));
        return Some(elapsed * (100 - progress) / progress);
    }
    estimated_total_secs.map(|total| (i64::from(total) - elapsed).max(0))
}
