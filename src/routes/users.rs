use axum::{extract::State, Json};

use crate::{
    error::AuthError,
    middleware::auth::RequireAdmin,
    models::user::UserProfile,
    AppState,
};

/// List all users. Admin only.
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<UserProfile>>, AuthError> {
    let users = state.auth.list_profiles().await?;
    Ok(Json(users))
}
