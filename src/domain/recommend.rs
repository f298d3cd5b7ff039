use crate::domain::models::Article;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;
use thiserror::Error;

/// Seed shared by the exploration shuffle and k-means init, so ranking and
/// clustering are reproducible run to run.
const SHUFFLE_SEED: u64 = 42;

pub const DEFAULT_CLUSTERS: usize = 10;
/// Below this many read articles a user's taste is too thin to cluster.
pub const MIN_CLUSTER_ARTICLES: usize = 10;
pub const DEFAULT_FILTER_RATIO: f64 = 0.5;
pub const DEFAULT_RANDOM_RATIO: f64 = 0.1;

const KMEANS_MAX_ITERATIONS: usize = 100;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("not enough articles with embeddings to cluster: {have} < {min}")]
    NotEnoughArticles { have: usize, min: usize },
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine distance, the metric that matches the directional nature of
/// sentence embeddings. Degenerate zero vectors get the maximum distance.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / denominator
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the center nearest to `point` by cosine distance.
pub fn nearest_center(point: &[f32], centers: &[Vec<f32>]) -> Option<usize> {
    centers
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            cosine_distance(point, a)
                .partial_cmp(&cosine_distance(point, b))
                .unwrap_or(Ordering::Equal)
        })
        .map(|(index, _)| index)
}

fn min_cosine_distance(point: &[f32], centers: &[Vec<f32>]) -> f32 {
    centers
        .iter()
        .map(|center| cosine_distance(point, center))
        .fold(f32::INFINITY, f32::min)
}

/// Plain Lloyd's k-means with seeded initialization. Clusters that go empty
/// keep their previous center.
pub fn kmeans(points: &[Vec<f32>], k: usize, seed: u64) -> Vec<Vec<f32>> {
    debug_assert!(k >= 1 && points.len() >= k);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centers: Vec<Vec<f32>> = points.choose_multiple(&mut rng, k).cloned().collect();
    let mut assignments = vec![usize::MAX; points.len()];

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    squared_euclidean(point, a)
                        .partial_cmp(&squared_euclidean(point, b))
                        .unwrap_or(Ordering::Equal)
                })
                .map(|(index, _)| index)
                .unwrap_or(0);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        for (j, center) in centers.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = points
                .iter()
                .zip(&assignments)
                .filter(|(_, assigned)| **assigned == j)
                .map(|(point, _)| point)
                .collect();
            if members.is_empty() {
                continue;
            }
            for (d, slot) in center.iter_mut().enumerate() {
                *slot = members.iter().map(|m| m[d]).sum::<f32>() / members.len() as f32;
            }
        }
    }

    centers
}

/// Derive a user's cluster centers from the articles they have read.
/// Refuses when fewer than [`MIN_CLUSTER_ARTICLES`] carry embeddings.
pub fn cluster_user_articles(
    articles: &[Article],
    k: usize,
) -> Result<Vec<Vec<f32>>, ClusterError> {
    let embeddings: Vec<Vec<f32>> = articles
        .iter()
        .filter_map(|article| article.embedding_vector())
        .collect();

    if embeddings.len() < MIN_CLUSTER_ARTICLES {
        return Err(ClusterError::NotEnoughArticles {
            have: embeddings.len(),
            min: MIN_CLUSTER_ARTICLES,
        });
    }

    let k = k.min(embeddings.len());
    Ok(kmeans(&embeddings, k, SHUFFLE_SEED))
}

fn date_key(article: &Article) -> chrono::DateTime<chrono::Utc> {
    article.pub_date.unwrap_or(article.updated)
}

/// Rank candidate articles against a user's cluster centers.
///
/// A deterministic shuffle holds out `random_ratio` of the input as
/// exploration picks, the rest are ordered by minimum cosine distance to
/// any center and cut to `filter_ratio`, and the union comes back sorted by
/// date. Input without any embeddings passes through unchanged.
pub fn filter_articles_with(
    mut articles: Vec<Article>,
    centers: &[Vec<f32>],
    filter_ratio: f64,
    random_ratio: f64,
) -> Vec<Article> {
    if articles.iter().all(|article| article.embedding_vector().is_none()) {
        return articles;
    }

    let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
    articles.shuffle(&mut rng);

    let n_random = (articles.len() as f64 * random_ratio) as usize;
    let random_pick: Vec<Article> = articles.drain(0..n_random).collect();

    let remaining = articles.len();
    let mut scored: Vec<(f32, Article)> = articles
        .into_iter()
        .filter_map(|article| {
            article
                .embedding_vector()
                .map(|vector| (min_cosine_distance(&vector, centers), article))
        })
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let n_keep = (remaining as f64 * filter_ratio) as usize;
    let mut result: Vec<Article> = scored
        .into_iter()
        .take(n_keep)
        .map(|(_, article)| article)
        .collect();
    result.extend(random_pick);

    result.sort_by(|a, b| date_key(b).cmp(&date_key(a)));
    result
}

pub fn filter_articles(articles: Vec<Article>, centers: &[Vec<f32>]) -> Vec<Article> {
    filter_articles_with(articles, centers, DEFAULT_FILTER_RATIO, DEFAULT_RANDOM_RATIO)
}
