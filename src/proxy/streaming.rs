//! Streaming response handling
//!
//! Streamed upstream bodies flow through the tag stripper fragment by
//! fragment. Nothing is buffered beyond the stripper's bounded hold-back, so
//! the full response never sits in memory and confirmed-safe bytes reach the
//! client immediately.

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;

use crate::strip::stream::StreamTagStripper;
use crate::variants::Variant;

/// Forward a streamed upstream response, stripping think-tag spans on the fly
/// when the variant asks for it.
pub fn stream_stripped_response(
    upstream_response: reqwest::Response,
    variant: Arc<Variant>,
) -> Response {
    let status = upstream_response.status();
    let headers = upstream_response.headers().clone();

    let body = if variant.thinking.strip {
        let stripper = Arc::new(tokio::sync::Mutex::new(StreamTagStripper::new(
            variant.thinking.tags.clone(),
        )));

        let chunks = upstream_response.bytes_stream().then({
            let stripper = Arc::clone(&stripper);
            move |chunk_result| {
                let stripper = Arc::clone(&stripper);
                async move {
                    match chunk_result {
                        Ok(chunk) => Ok(Bytes::from(stripper.lock().await.push(&chunk))),
                        Err(e) => {
                            tracing::error!(error = %e, "Error reading upstream stream");
                            Err(std::io::Error::new(
                                std::io::ErrorKind::Other,
                                e.to_string(),
                            ))
                        }
                    }
                }
            }
        });

        // Held-back bytes that never completed a start tag are real content
        // and flush when the upstream closes the stream.
        let tail =
            futures::stream::once(async move { Ok(Bytes::from(stripper.lock().await.finish())) });

        Body::from_stream(chunks.chain(tail))
    } else {
        let passthrough = upstream_response.bytes_stream().map(|chunk_result| {
            chunk_result
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });
        Body::from_stream(passthrough)
    };

    let mut response = Response::builder().status(status);
    for (name, value) in headers {
        if let Some(name) = name {
            // Body length changes as spans are removed
            if name == header::CONTENT_LENGTH {
                continue;
            }
            response = response.header(name, value);
        }
    }
    response.body(body).unwrap().into_response()
}
