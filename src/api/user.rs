use crate::api::error::AppError;
use crate::api::AppState;
use crate::domain::models::Article;
use crate::domain::user_service;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct ClusteredArticle {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
}

impl From<Article> for ClusteredArticle {
    fn from(article: Article) -> Self {
        ClusteredArticle {
            title: article.title,
            description: article.description,
            url: article.url,
        }
    }
}

#[derive(Serialize)]
pub struct GetUserClustersResponse {
    pub user_id: String,
    pub clustered_articles: BTreeMap<usize, Vec<ClusteredArticle>>,
}

/// `GET /v1/user/{user_id}/clusters`: the user's click history grouped by
/// nearest cluster center.
pub async fn get_user_clusters(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<GetUserClustersResponse>, AppError> {
    let groups = user_service::clustered_articles(&state.ctx.pool, &user_id).await?;

    let clustered_articles = groups
        .into_iter()
        .enumerate()
        .map(|(cluster_id, articles)| {
            (
                cluster_id,
                articles.into_iter().map(ClusteredArticle::from).collect(),
            )
        })
        .collect();

    Ok(Json(GetUserClustersResponse {
        user_id,
        clustered_articles,
    }))
}
