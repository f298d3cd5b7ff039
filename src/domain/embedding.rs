use crate::domain::models::Article;
use crate::infrastructure::repository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;

/// Articles are embedded in batches of this size.
pub const EMBEDDING_BATCH_SIZE: usize = 32;

/// The embedding model is an external oracle: text in, fixed-dimension
/// vector out. Everything behind this trait is replaceable.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding oracle reached over HTTP (typically a GPU sidecar).
pub struct RemoteEmbedder {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteEmbedder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.base_url)
                .json(&EmbedRequest { texts })
                .send(),
        )
        .await
        .context("embedding request timed out")?
        .context("embedding HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding API error {}: {}", status, body);
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        if parsed.embeddings.len() != texts.len() {
            anyhow::bail!(
                "embedding API returned {} vectors for {} texts",
                parsed.embeddings.len(),
                texts.len()
            );
        }

        Ok(parsed.embeddings)
    }
}

/// The text an article is embedded from.
pub fn embedding_input(article: &Article) -> String {
    format!(
        "{} {}",
        article.title.as_deref().unwrap_or(""),
        article.description.as_deref().unwrap_or("")
    )
}

/// Compute and persist embeddings for articles that don't have one yet.
/// Returns how many were embedded.
pub async fn compute_embeddings(
    embedder: &dyn Embedder,
    pool: &SqlitePool,
    articles: &[Article],
) -> Result<usize> {
    let pending: Vec<&Article> = articles
        .iter()
        .filter(|article| article.embedding.is_none())
        .collect();

    if pending.is_empty() {
        tracing::debug!("All articles already have embeddings");
        return Ok(0);
    }

    let mut embedded = 0;
    for chunk in pending.chunks(EMBEDDING_BATCH_SIZE) {
        let texts: Vec<String> = chunk.iter().map(|article| embedding_input(article)).collect();
        let vectors = embedder.embed(&texts).await?;

        for (article, vector) in chunk.iter().zip(vectors) {
            let json = serde_json::to_string(&vector)?;
            repository::set_article_embedding(pool, article.id, &json).await?;
            embedded += 1;
        }
    }

    Ok(embedded)
}
