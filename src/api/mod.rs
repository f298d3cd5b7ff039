pub mod error;
pub mod feed;
pub mod health;
pub mod log;
pub mod signup;
pub mod user;

use crate::infrastructure::jobs::JobContext;
use crate::infrastructure::rewriter::TrackerUrls;
use axum::routing::{get, post};
use axum::Router;

#[derive(Clone)]
pub struct AppState {
    pub ctx: JobContext,
    pub urls: TrackerUrls,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::check))
        .route("/v1/feed/:user_id/*feed_url", get(feed::get_feed))
        .route("/v1/log/:user_id/:article_id/*link_url", get(log::log_click))
        .route("/v1/signup/user", post(signup::register_user))
        .route("/v1/signup/process_opml", post(signup::process_opml))
        .route("/v1/user/:user_id/clusters", get(user::get_user_clusters))
        .with_state(state)
}
