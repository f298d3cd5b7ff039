use crate::domain::feed_service::FeedServiceError;
use crate::domain::user_service::UserServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error envelope for the HTTP surface. Each service error maps onto one
/// status code; SSRF rejections deliberately say nothing specific.
#[derive(Debug)]
pub enum AppError {
    Feed(FeedServiceError),
    User(UserServiceError),
    Database(sqlx::Error),
}

impl From<FeedServiceError> for AppError {
    fn from(err: FeedServiceError) -> Self {
        AppError::Feed(err)
    }
}

impl From<UserServiceError> for AppError {
    fn from(err: UserServiceError) -> Self {
        AppError::User(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Feed(FeedServiceError::Ssrf) => {
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }
            AppError::Feed(FeedServiceError::InvalidUrl(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "Invalid URL".to_string())
            }
            AppError::Feed(FeedServiceError::Upstream(msg)) => (
                StatusCode::BAD_GATEWAY,
                format!("Upstream feed error: {msg}"),
            ),
            AppError::User(UserServiceError::NotFound) => {
                (StatusCode::NOT_FOUND, "User not found".to_string())
            }
            AppError::User(UserServiceError::ClustersNotReady) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Clusters not ready. Please try again later.".to_string(),
            ),
            AppError::Feed(FeedServiceError::Database(_) | FeedServiceError::Rewrite(_))
            | AppError::User(UserServiceError::Database(_))
            | AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!("Request failed with {}: {:?}", status, self);
        } else {
            tracing::debug!("Request rejected with {}: {:?}", status, self);
        }

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(AppError::Feed(FeedServiceError::Ssrf)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(AppError::Feed(FeedServiceError::InvalidUrl("x".into()))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(AppError::Feed(FeedServiceError::Upstream("502".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(AppError::User(UserServiceError::NotFound)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::User(UserServiceError::ClustersNotReady)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::Database(sqlx::Error::RowNotFound)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
