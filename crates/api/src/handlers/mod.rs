pub mod credits;
pub mod jobs;
