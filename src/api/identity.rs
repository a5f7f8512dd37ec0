use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::api::responses::{ApiResponse, ErrorResponse};
use crate::models::{Caller, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Reads the caller set by the authentication gateway. A missing role header means `user`.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, String> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| format!("missing {} header", USER_ID_HEADER))?
        .to_str()
        .map_err(|_| format!("{} header is not valid text", USER_ID_HEADER))?;
    let user_id = Uuid::parse_str(user_id.trim())
        .map_err(|_| format!("{} header is not a UUID", USER_ID_HEADER))?;

    let role = match headers.get(USER_ROLE_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| format!("{} header is not valid text", USER_ROLE_HEADER))?
            .parse::<Role>()?,
        None => Role::User,
    };

    Ok(Caller { user_id, role })
}

/// Middleware attaching the [`Caller`] to the request extensions.
pub async fn identify(mut request: Request, next: Next) -> Response {
    match caller_from_headers(request.headers()) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(message) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(ErrorResponse::new("UNAUTHENTICATED", message))),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_from_headers() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());

        assert_eq!(caller_from_headers(&headers).unwrap(), Caller::user(id));

        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("Admin"));
        assert_eq!(caller_from_headers(&headers).unwrap(), Caller::admin(id));
    }

    #[test]
    fn test_rejects_bad_identity() {
        let headers = HeaderMap::new();
        assert!(caller_from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        assert!(caller_from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap());
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("root"));
        assert!(caller_from_headers(&headers).is_err());
    }
}
