use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use journal_core::types::DbId;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreditBalance {
    pub owner_id: DbId,
    pub balance: i64,
}

/// GET /api/v1/credits
pub async fn get_balance(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let balance = state.engine.credit_balance(auth.user_id).await?;
    Ok(Json(DataResponse {
        data: CreditBalance {
            owner_id: auth.user_id,
            balance,
        },
    }))
}
