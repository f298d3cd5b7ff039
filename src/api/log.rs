use crate::api::error::AppError;
use crate::api::AppState;
use crate::domain::feed_service;
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Redirect, Response};

/// `GET /v1/log/{user_id}/{article_id}/{link_url}`: record the click and
/// bounce the reader to the real destination.
///
/// The wrapped URL is fully percent-encoded into one path segment, but a
/// client that decodes early can split its query off; a query string on the
/// request is therefore re-attached to the target.
pub async fn log_click(
    State(state): State<AppState>,
    Path((user_id, article_id, link_url)): Path<(String, i64, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    let mut link_url = link_url;
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        link_url = format!("{link_url}?{query}");
    }

    feed_service::log_click(&state.ctx, &user_id, article_id, &link_url)?;

    // Logging is asynchronous; the redirect never waits for it
    Ok(Redirect::temporary(&link_url).into_response())
}
