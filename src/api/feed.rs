use crate::api::error::AppError;
use crate::api::AppState;
use crate::domain::feed_service;
use axum::extract::{Path, RawQuery, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

/// `GET /v1/feed/{user_id}/{feed_url}`: the personalized feed document.
///
/// `feed_url` arrives as the remaining path (encoded or not); a query
/// string on the request belongs to the upstream feed URL and is carried
/// through.
pub async fn get_feed(
    State(state): State<AppState>,
    Path((user_id, feed_url)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    let mut feed_url = feed_url;
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        feed_url = format!("{feed_url}?{query}");
    }

    let xml = feed_service::get_user_feed(&state.ctx, &state.urls, &user_id, &feed_url).await?;

    Ok(([(header::CONTENT_TYPE, "application/xml")], xml).into_response())
}
