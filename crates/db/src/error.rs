use journal_core::error::CoreError;

/// Errors raised by the job, artifact and credit stores.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A query failed in the Postgres backend.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The write would violate the job lifecycle (e.g. touching a terminal job).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl DbError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            DbError::Conflict(msg) => CoreError::Conflict(msg),
            DbError::Database(e) => CoreError::Internal(format!("database error: {e}")),
            DbError::Corrupt(msg) => CoreError::Internal(msg),
        }
    }
}
