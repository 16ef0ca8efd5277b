//! Frame Transport (C1, spec.md §4.1): the axum upgrade boundary.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::Response;

use super::base;
use super::endpoint::{Endpoint, GatewayContext};
use crate::auth::verifier::AuthVerifier;

/// Returns `true` if the client requested `permessage-deflate`.
///
/// The gateway never negotiates it either way — this crate's axum/
/// tungstenite build carries no deflate extension support, so the
/// server physically cannot set the RSV1 reserved bit the way a subset
/// of real clients mishandle (spec.md §4.1, §9). The check exists so a
/// client that assumes compression was silently granted is logged
/// rather than mysteriously confused by undecodable frames.
fn requested_permessage_deflate(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::SEC_WEBSOCKET_EXTENSIONS)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("permessage-deflate"))
        .unwrap_or(false)
}

/// Accept an upgrade request for one endpoint.
///
/// `query` is the raw query string (for token extraction in
/// [`crate::auth::verifier`]); `subprotocol` is the client's requested
/// `Sec-WebSocket-Protocol` value, if any.
pub fn accept(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    query: String,
    endpoint: Arc<dyn Endpoint>,
    ctx: GatewayContext,
    auth: Arc<AuthVerifier>,
) -> Response {
    if requested_permessage_deflate(&headers) {
        tracing::debug!("client requested permessage-deflate; gateway does not support compression");
    }

    let max_payload = endpoint.config().max_payload_bytes;
    let subprotocol = headers
        .get(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    ws.max_message_size(max_payload).on_upgrade(move |socket| async move {
        base::run_connection(socket, headers, query, subprotocol, endpoint, ctx, auth).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_permessage_deflate_request() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::SEC_WEBSOCKET_EXTENSIONS,
            "permessage-deflate; client_max_window_bits".parse().unwrap(),
        );
        assert!(requested_permessage_deflate(&headers));
    }

    #[test]
    fn absent_extensions_header_is_not_a_deflate_request() {
        assert!(!requested_permessage_deflate(&HeaderMap::new()));
    }
}
