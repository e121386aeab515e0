use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::Instrument;

/// Wrap each request in a span carrying its method and path, and log the
/// status it finished with.
pub async fn request_span_middleware(req: Request<Body>, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        http.method = %req.method(),
        http.path = %req.uri().path(),
    );

    async move {
        let started = std::time::Instant::now();
        let response = next.run(req).await;
        let status = response.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), elapsed_ms = started.elapsed().as_millis(), "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), elapsed_ms = started.elapsed().as_millis(), "request finished");
        }
        response
    }
    .instrument(span)
    .await
}
