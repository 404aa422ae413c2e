pub mod artifact;
pub mod job;
pub mod status;
