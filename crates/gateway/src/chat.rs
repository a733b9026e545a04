//! `POST /v1/chat`.

use axum::{
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};
use turnstile_pipeline::{
    PipelineError, PipelineStage, ResponseMetadata, TurnFailure, TurnRequest, TurnSuccess,
};

use crate::{REQUEST_ID_HEADER, SharedState};

/// Client-address headers, most trusted first.
const CLIENT_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSuccessBody {
    pub response: String,
    pub segments: Vec<String>,
    pub request_id: String,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFailureBody {
    pub error: &'static str,
    /// Fallback text the client can show in place of an answer
    pub response: String,
    pub error_type: &'static str,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub(crate) async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_default();

    // Oversized or unreadable bodies keep the JSON failure shape.
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            info!(
                request_id = %request_id,
                status = rejection.status().as_u16(),
                "Request body rejected: {rejection}"
            );
            let failure = TurnFailure {
                request_id,
                stage: PipelineStage::Parsing,
                error: PipelineError::MalformedInput(rejection.body_text()),
                retry_after_secs: None,
            };
            return failure_response(failure, state.dev_mode);
        }
    };

    let turn = TurnRequest {
        request_id,
        credential: bearer_token(&headers),
        client_key: client_key(&headers),
        body: body.to_vec(),
    };

    match state.orchestrator.handle(turn).await {
        Ok(success) => success_response(success),
        Err(failure) => failure_response(failure, state.dev_mode),
    }
}

fn success_response(success: TurnSuccess) -> Response {
    Json(ChatSuccessBody {
        response: success.response,
        segments: success.segments,
        request_id: success.request_id,
        metadata: success.metadata,
    })
    .into_response()
}

fn failure_response(failure: TurnFailure, dev_mode: bool) -> Response {
    let status =
        StatusCode::from_u16(failure.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ChatFailureBody {
        error: failure.error.title(),
        response: failure.error.user_message(),
        error_type: failure.error.error_type(),
        request_id: failure.request_id,
        detail: dev_mode.then(|| format!("{} (stage {})", failure.error, failure.stage)),
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = failure.retry_after_secs {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// `Authorization: Bearer <token>`, if present.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Rate-limit identity for the caller.
///
/// Takes the first address of `x-forwarded-for`, then `x-real-ip`, then
/// the edge header `cf-connecting-ip`. Without any of them (local
/// development) each request gets a random key.
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    for name in CLIENT_HEADERS {
        let candidate = headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = candidate {
            return addr.to_string();
        }
    }

    let key = format!("dev-{:08x}", rand::rng().random::<u32>());
    debug!(client_key = %key, "No client address headers, using dev fallback key");
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_wins_and_takes_first_hop() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
            ("cf-connecting-ip", "198.51.100.4"),
        ]);
        assert_eq!(client_key(&h), "203.0.113.9");
    }

    #[test]
    fn real_ip_then_edge_header() {
        let h = headers(&[("x-real-ip", "10.0.0.2"), ("cf-connecting-ip", "198.51.100.4")]);
        assert_eq!(client_key(&h), "10.0.0.2");

        let h = headers(&[("cf-connecting-ip", "198.51.100.4")]);
        assert_eq!(client_key(&h), "198.51.100.4");
    }

    #[test]
    fn empty_headers_fall_back_to_random_dev_key() {
        let h = headers(&[("x-forwarded-for", "  ")]);
        let a = client_key(&h);
        let b = client_key(&HeaderMap::new());
        assert!(a.starts_with("dev-"));
        assert!(b.starts_with("dev-"));
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Bearer tok-1")])).as_deref(),
            Some("tok-1")
        );
        assert_eq!(bearer_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
