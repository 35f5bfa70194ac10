//! Request identification.
//!
//! Every request gets an `x-request-id` (UUID v4) unless the caller sent
//! one. The id is echoed on the response and forwarded upstream.

use axum::http::{HeaderMap, HeaderValue, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuidV4> {
    SetRequestIdLayer::x_request_id(MakeRequestUuidV4)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Request id from `headers`, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_uuids() {
        let request = Request::new(());
        let id = MakeRequestUuidV4.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }

    #[test]
    fn test_request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), "unknown");
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc"));
        assert_eq!(request_id(&headers), "abc");
    }
}
