/// User and account primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Jobs and artifacts use application-generated UUID v7 keys.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
