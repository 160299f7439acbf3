use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_core::ChatError;
use chat_protocol::HttpErrorEnvelope;

pub type HttpResponse = Response;
pub type HttpResult<T = Response> = Result<T, HttpResponse>;

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

/// Translates pipeline errors at the HTTP edge; the pipeline itself is
/// status-code agnostic.
pub fn chat_error(err: &ChatError) -> HttpResponse {
    let status = match err {
        ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ChatError::Forbidden(_) | ChatError::Blocked => StatusCode::FORBIDDEN,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Conflict(_) => StatusCode::CONFLICT,
        ChatError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.code(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chat_core::RepoError;

    async fn parse(response: Response) -> (StatusCode, HttpErrorEnvelope) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        let envelope: HttpErrorEnvelope =
            serde_json::from_slice(&body).expect("error body should be valid json");
        (status, envelope)
    }

    #[tokio::test]
    async fn blocked_maps_to_forbidden_with_its_own_code() {
        let (status, envelope) = parse(chat_error(&ChatError::Blocked)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(envelope.code, "BLOCKED");
    }

    #[tokio::test]
    async fn every_kind_gets_a_distinct_status() {
        let cases = [
            (ChatError::bad_request("x"), StatusCode::BAD_REQUEST),
            (
                ChatError::Unauthorized("x".to_owned()),
                StatusCode::UNAUTHORIZED,
            ),
            (ChatError::forbidden("x"), StatusCode::FORBIDDEN),
            (ChatError::NotFound("message"), StatusCode::NOT_FOUND),
            (ChatError::Conflict("x".to_owned()), StatusCode::CONFLICT),
            (
                ChatError::Transient(RepoError::backend("down")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            let (status, envelope) = parse(chat_error(&err)).await;
            assert_eq!(status, expected, "wrong status for {envelope:?}");
            assert_eq!(envelope.code, err.code());
        }
    }
}
