//! Request/response handler for the proxy

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::io::Read;

use super::server::ProxyState;
use super::streaming::stream_stripped_response;
use crate::rewrite::rewrite_request;
use crate::strip::strip_tags;
use crate::variants::ResolvedModel;

/// Create a preview of JSON with nested objects/arrays replaced by "[object]"
fn json_preview(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut preview_map = serde_json::Map::new();
            for (key, val) in map {
                match val {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        preview_map
                            .insert(key.clone(), serde_json::Value::String("[object]".to_string()));
                    }
                    _ => {
                        preview_map.insert(key.clone(), val.clone());
                    }
                }
            }
            serde_json::to_string(&serde_json::Value::Object(preview_map))
                .unwrap_or_else(|_| "[failed to serialize]".to_string())
        }
        _ => serde_json::to_string(value).unwrap_or_else(|_| "[failed to serialize]".to_string()),
    }
}

/// Decompress response body based on Content-Encoding header
fn decompress_body(body_bytes: &[u8], content_encoding: Option<&str>) -> Result<Vec<u8>, String> {
    let encoding = match content_encoding {
        Some(enc) => enc,
        None => return Ok(body_bytes.to_vec()),
    };

    match encoding.to_lowercase().as_str() {
        "identity" => Ok(body_bytes.to_vec()),
        "gzip" => {
            use flate2::read::GzDecoder;
            let mut decoder = GzDecoder::new(body_bytes);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| format!("gzip decompression failed: {}", e))?;
            Ok(decompressed)
        }
        "deflate" => {
            use flate2::read::DeflateDecoder;
            let mut decoder = DeflateDecoder::new(body_bytes);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| format!("deflate decompression failed: {}", e))?;
            Ok(decompressed)
        }
        "br" => {
            let mut decompressed = Vec::new();
            brotli::BrotliDecompress(&mut std::io::Cursor::new(body_bytes), &mut decompressed)
                .map_err(|e| format!("brotli decompression failed: {}", e))?;
            Ok(decompressed)
        }
        "zstd" => {
            zstd::decode_all(body_bytes).map_err(|e| format!("zstd decompression failed: {}", e))
        }
        other => {
            tracing::warn!(
                encoding = other,
                "Unsupported Content-Encoding, returning original body"
            );
            Ok(body_bytes.to_vec())
        }
    }
}

/// Decide whether a client request header is forwarded upstream.
///
/// Host is never forwarded; Content-Length is recomputed because the body may
/// have changed; the client's Authorization survives unless an upstream
/// api_key replaces it. For a stripped streaming response Accept-Encoding is
/// dropped too — the stripper sees raw body bytes, and an encoding the client
/// negotiated but the upstream client cannot decode would hide the tags.
fn should_forward_header(
    name: &header::HeaderName,
    has_api_key: bool,
    stripped_stream: bool,
) -> bool {
    if *name == header::HOST || *name == header::CONTENT_LENGTH {
        return false;
    }
    if *name == header::AUTHORIZATION && has_api_key {
        return false;
    }
    if *name == header::ACCEPT_ENCODING && stripped_stream {
        return false;
    }
    true
}

/// Proxy request handler
pub struct ProxyHandler {
    state: ProxyState,
}

impl ProxyHandler {
    pub fn new(state: ProxyState) -> Self {
        Self { state }
    }

    /// Handle an incoming request: resolve the variant from the model
    /// identifier, rewrite the payload, forward, rewrite the response.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let path = uri.path();
        let query = uri.query();

        tracing::debug!(method = %method, path = %path, query = ?query, "Processing request");

        // Save headers before consuming the request
        let headers = req.headers().clone();

        let body_bytes = match to_bytes(req.into_body(), 1024 * 1024 * 100).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read request body");
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request body: {}", e),
                )
                    .into_response();
            }
        };

        // Malformed or absent JSON is forwarded as-is with no JSON-aware rewriting
        let mut request_json: Option<serde_json::Value> = if body_bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&body_bytes).ok()
        };

        let model_id = request_json
            .as_ref()
            .and_then(|json| json.get("model"))
            .and_then(|model| model.as_str())
            .unwrap_or_default()
            .to_string();
        let resolved = self.state.registry.resolve(&model_id);
        let tags = &resolved.variant.thinking.tags;
        tracing::debug!(
            "Using think tags for model '{}': START='{}', END='{}'",
            resolved.variant.name,
            tags.start,
            tags.end
        );

        let is_stream = match request_json.as_mut() {
            Some(json) => rewrite_request(json, &resolved),
            None => false,
        };
        tracing::debug!("Stream mode: {}", is_stream);

        // Build complete URL with query string as-is (don't parse/re-encode)
        let upstream_url = if let Some(q) = query {
            format!("{}{}?{}", self.state.config.upstream.base_url(), path, q)
        } else {
            format!("{}{}", self.state.config.upstream.base_url(), path)
        };

        let mut upstream_req = self.state.http_client.request(
            Method::from_bytes(method.as_str().as_bytes()).unwrap(),
            &upstream_url,
        );

        let stripped_stream = is_stream && resolved.variant.thinking.strip;
        for (name, value) in headers.iter() {
            if should_forward_header(name, self.state.config.upstream.api_key.is_some(), stripped_stream) {
                upstream_req = upstream_req.header(name, value);
            }
        }
        if let Some(ref api_key) = self.state.config.upstream.api_key {
            upstream_req = upstream_req.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
        }

        let outbound_body: Bytes = match request_json {
            Some(ref json) => {
                tracing::debug!(payload = %json_preview(json), "Rewritten request payload");
                serde_json::to_vec(json)
                    .map(Bytes::from)
                    .unwrap_or_else(|_| body_bytes.clone())
            }
            None => body_bytes.clone(),
        };
        upstream_req = upstream_req.body(outbound_body);

        let upstream_response = match upstream_req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to upstream");
                return (
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to connect to upstream: {}", e),
                )
                    .into_response();
            }
        };

        tracing::debug!(
            status = %upstream_response.status(),
            "Received response from upstream"
        );

        if is_stream {
            stream_stripped_response(upstream_response, resolved.variant.clone())
        } else {
            self.handle_non_streaming_response(upstream_response, &resolved)
                .await
        }
    }

    /// Handle a buffered response: decompress if needed, strip think-tag
    /// spans, forward with recomputed length.
    async fn handle_non_streaming_response(
        &self,
        upstream_response: reqwest::Response,
        resolved: &ResolvedModel,
    ) -> Response {
        let status = upstream_response.status();
        let headers = upstream_response.headers().clone();

        let raw_body = match upstream_response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read upstream response");
                return (
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to read upstream response: {}", e),
                )
                    .into_response();
            }
        };

        if status.is_client_error() || status.is_server_error() {
            tracing::error!(
                status = %status,
                body = %String::from_utf8_lossy(&raw_body),
                "Upstream returned error response"
            );
        }

        let content_encoding = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|ce| ce.to_str().ok());

        // Tags can only be stripped from plain bytes. If decoding fails the
        // body passes through untouched rather than failing the request.
        let (mut body, decoded) = match decompress_body(&raw_body, content_encoding) {
            Ok(decompressed) => (decompressed, content_encoding.is_some()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    content_encoding = ?content_encoding,
                    "Failed to decompress upstream body, passing through unstripped"
                );
                (raw_body.to_vec(), false)
            }
        };
        let decode_failed = !decoded && content_encoding.is_some();

        if resolved.variant.thinking.strip && !decode_failed {
            body = strip_tags(&body, &resolved.variant.thinking.tags);
        }

        tracing::debug!(
            "Non-streaming response content: {}",
            String::from_utf8_lossy(&body)
        );

        let mut response = Response::builder().status(status);
        for (name, value) in headers {
            if let Some(name) = name {
                // Recomputed from the rewritten body
                if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
                    continue;
                }
                // The client receives the decoded bytes
                if decoded && name == header::CONTENT_ENCODING {
                    continue;
                }
                response = response.header(name, value);
            }
        }
        response.body(Body::from(body)).unwrap().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ThinkingConfig, VariantConfig};
    use crate::strip::ThinkTags;
    use crate::variants::VariantRegistry;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_json_preview_flattens_nested() {
        let value = json!({
            "model": "m",
            "stream": false,
            "messages": [{"role": "user", "content": "hi"}]
        });
        let preview = json_preview(&value);
        assert!(preview.contains("\"model\":\"m\""));
        assert!(preview.contains("\"messages\":\"[object]\""));
        assert!(!preview.contains("hi"));
    }

    #[test]
    fn test_decompress_body_none_is_passthrough() {
        let body = b"plain bytes";
        assert_eq!(decompress_body(body, None).unwrap(), body);
        assert_eq!(decompress_body(body, Some("identity")).unwrap(), body);
    }

    #[test]
    fn test_decompress_body_gzip() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello gzip").unwrap();
        let compressed = encoder.finish().unwrap();

        let result = decompress_body(&compressed, Some("gzip")).unwrap();
        assert_eq!(result, b"hello gzip");
    }

    #[test]
    fn test_decompress_body_deflate() {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello deflate").unwrap();
        let compressed = encoder.finish().unwrap();

        let result = decompress_body(&compressed, Some("deflate")).unwrap();
        assert_eq!(result, b"hello deflate");
    }

    #[test]
    fn test_decompress_body_zstd() {
        let compressed = zstd::encode_all(&b"hello zstd"[..], 0).unwrap();
        let result = decompress_body(&compressed, Some("zstd")).unwrap();
        assert_eq!(result, b"hello zstd");
    }

    #[test]
    fn test_decompress_body_corrupt_gzip_errors() {
        let result = decompress_body(b"definitely not gzip", Some("gzip"));
        assert!(result.is_err());
    }

    #[test]
    fn test_decompress_body_unknown_encoding_passthrough() {
        let body = b"mystery bytes";
        assert_eq!(decompress_body(body, Some("snappy")).unwrap(), body);
    }

    #[test]
    fn test_should_forward_header_excludes_host() {
        assert!(!should_forward_header(&header::HOST, false, false));
        assert!(!should_forward_header(&header::CONTENT_LENGTH, false, false));
        // Arbitrary client headers pass through
        let custom = header::HeaderName::from_static("x-client-header");
        assert!(should_forward_header(&custom, false, false));
        assert!(should_forward_header(&custom, true, true));
    }

    #[test]
    fn test_should_forward_header_authorization() {
        assert!(should_forward_header(&header::AUTHORIZATION, false, false));
        assert!(!should_forward_header(&header::AUTHORIZATION, true, false));
    }

    #[test]
    fn test_should_forward_header_accept_encoding() {
        assert!(should_forward_header(&header::ACCEPT_ENCODING, false, false));
        assert!(!should_forward_header(&header::ACCEPT_ENCODING, false, true));
    }

    #[test]
    fn test_passthrough_variant_leaves_body_unchanged() {
        let registry = VariantRegistry::from_config(&[], &ThinkTags::default()).unwrap();
        let resolved = registry.resolve("unknown-model");
        assert!(!resolved.variant.thinking.strip);

        // Stripping disabled means the handler forwards the body untouched,
        // tags included
        let body = b"Visible <think>kept</think> content.";
        let out = if resolved.variant.thinking.strip {
            strip_tags(body, &resolved.variant.thinking.tags)
        } else {
            body.to_vec()
        };
        assert_eq!(out, body);
    }

    // The concrete request/response scenario, run through the pure pipeline
    // pieces the handler composes: resolve → rewrite → strip.
    #[test]
    fn test_resolution_rewrite_strip_pipeline() {
        let cfg = VariantConfig {
            name: "test-variant".to_string(),
            label: "t".to_string(),
            model_regex: "test-model".to_string(),
            inject_at_end: String::new(),
            weak_defaults: std::collections::HashMap::new(),
            weak_logit_bias: Vec::new(),
            thinking: ThinkingConfig {
                strip: true,
                start_tag: Some("<think>".to_string()),
                end_tag: Some("</think>".to_string()),
            },
            system_prompt_file: None,
        };
        let registry = VariantRegistry::from_config(&[cfg], &ThinkTags::default()).unwrap();

        let mut payload = json!({
            "model": "m@t",
            "stream": false,
            "messages": [{"role": "user", "content": "Hello"}]
        });
        let resolved = registry.resolve(payload["model"].as_str().unwrap());
        let is_stream = rewrite_request(&mut payload, &resolved);

        assert!(!is_stream);
        assert_eq!(payload["model"], "m");
        assert_eq!(resolved.variant.name, "test-variant");

        let upstream_body = b"Visible <think>secret thoughts</think> content.";
        let stripped = strip_tags(upstream_body, &resolved.variant.thinking.tags);
        assert_eq!(stripped, b"Visible  content.");
    }
}
