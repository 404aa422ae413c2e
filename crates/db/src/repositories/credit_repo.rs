//! Store for per-owner credit balances and the charge ledger.
//!
//! Every debit is recorded in `credit_charges` keyed by job id, which makes
//! charging idempotent per job.

use async_trait::async_trait;
use journal_core::types::{DbId, JobId};
use sqlx::PgPool;

use crate::error::DbError;

/// Credit balances and the per-job charge ledger.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Current balance. Owners without an account have the store's default.
    async fn balance(&self, owner_id: DbId) -> Result<i64, DbError>;

    /// Debit `amount` for `job_id`.
    ///
    /// Returns `false` without touching the balance when the job has
    /// already been charged.
    async fn charge(&self, owner_id: DbId, job_id: JobId, amount: i64) -> Result<bool, DbError>;
}

/// Postgres-backed [`CreditStore`].
#[derive(Clone)]
pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStore for PgCreditStore {
    async fn balance(&self, owner_id: DbId) -> Result<i64, DbError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn charge(&self, owner_id: DbId, job_id: JobId, amount: i64) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO credit_charges (job_id, owner_id, amount) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(job_id)
        .bind(owner_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO credit_accounts (owner_id, balance) VALUES ($1, $2) \
             ON CONFLICT (owner_id) DO UPDATE \
             SET balance = credit_accounts.balance + EXCLUDED.balance, updated_at = NOW()",
        )
        .bind(owner_id)
        .bind(-amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
