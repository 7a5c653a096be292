use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy shared by the HTTP surface and the realtime gateway.
///
/// The HTTP layer maps each variant to a status code and the uniform
/// `{success: false, message}` envelope; the gateway surfaces the same
/// messages as `error` events without closing the connection.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] mongodb::error::Error),

    #[error("serialization error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::InvalidInput(_) | ChatError::InvalidState(_) => StatusCode::BAD_REQUEST,
            ChatError::Storage(_) | ChatError::Bson(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage details stay in the logs, not in client responses.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self}");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "success": false, "message": message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ChatError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ChatError::Forbidden("not a participant").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ChatError::NotFound("conversation").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ChatError::InvalidInput("empty content".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ChatError::InvalidState("edit window expired").status(),
            StatusCode::BAD_REQUEST
        );
    }
}
