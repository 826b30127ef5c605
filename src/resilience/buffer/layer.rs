//! Tower integration: buffer, forward, retry, capture.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Layer, Service, ServiceExt};

use crate::resilience::buffer::body::read_body;
use crate::resilience::buffer::retry::{RetryContext, MAX_ATTEMPTS};
use crate::resilience::buffer::{BufferSpec, DefaultErrorHandler, ErrorHandler};

#[derive(Clone)]
pub struct BufferLayer {
    spec: Arc<BufferSpec>,
    errors: Arc<dyn ErrorHandler>,
}

impl BufferLayer {
    pub fn new(spec: BufferSpec) -> Self {
        Self::shared(Arc::new(spec))
    }

    /// Layer over a spec that is already compiled and shared.
    pub fn shared(spec: Arc<BufferSpec>) -> Self {
        Self {
            spec,
            errors: Arc::new(DefaultErrorHandler),
        }
    }

    pub fn with_error_handler(mut self, errors: Arc<dyn ErrorHandler>) -> Self {
        self.errors = errors;
        self
    }
}

impl<S> Layer<S> for BufferLayer {
    type Service = BufferService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BufferService {
            inner,
            spec: Arc::clone(&self.spec),
            errors: Arc::clone(&self.errors),
        }
    }
}

#[derive(Clone)]
pub struct BufferService<S> {
    inner: S,
    spec: Arc<BufferSpec>,
    errors: Arc<dyn ErrorHandler>,
}

impl<S> Service<Request> for BufferService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        let spec = Arc::clone(&self.spec);
        let errors = Arc::clone(&self.errors);
        Box::pin(async move { Ok(exchange(inner, spec, errors, req).await) })
    }
}

async fn exchange<S>(
    inner: S,
    spec: Arc<BufferSpec>,
    errors: Arc<dyn ErrorHandler>,
    req: Request,
) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    if is_upgrade(req.headers()) {
        return forward(inner, req).await;
    }

    let (parts, body) = req.into_parts();
    if let (Some(max), Some(len)) = (spec.max_request_body, content_length(&parts.headers)) {
        if len > max {
            tracing::info!(content_length = len, limit = max, "Request body over limit");
            return errors.handle(&super::BufferError::Oversize { limit: max });
        }
    }

    let had_body = parts.headers.contains_key(header::CONTENT_LENGTH)
        || parts.headers.contains_key(header::TRANSFER_ENCODING);
    let buffered = match read_body(body, spec.mem_request_body, spec.max_request_body).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer request body");
            return errors.handle(&e);
        }
    };

    let is_head = parts.method == Method::HEAD;
    let method = parts.method.to_string();
    let mut attempts: i64 = 0;
    loop {
        attempts += 1;
        let body = match buffered.to_body() {
            Ok(body) => body,
            Err(e) => return errors.handle(&e),
        };
        let mut attempt = rebuild(&parts, body);
        let headers = attempt.headers_mut();
        headers.remove(header::TRANSFER_ENCODING);
        if had_body || !buffered.is_empty() {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(buffered.len()));
        }

        let resp = forward(inner.clone(), attempt).await;
        if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
            return resp;
        }

        if let Some(retry) = &spec.retry {
            let ctx = RetryContext {
                attempts,
                response_code: i64::from(resp.status().as_u16()),
                method: method.clone(),
            };
            // The attempt that just finished is already counted.
            if attempts < MAX_ATTEMPTS && retry.eval(&ctx) {
                tracing::info!(
                    attempt = attempts,
                    status = %resp.status(),
                    method = %method,
                    "Retrying request"
                );
                metrics::counter!("proxy_buffer_retries_total").increment(1);
                continue;
            }
        }

        return capture(resp, is_head, &spec, errors.as_ref()).await;
    }
}

async fn forward<S>(inner: S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible>,
{
    match inner.oneshot(req).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    }
}

async fn capture(resp: Response, is_head: bool, spec: &BufferSpec, errors: &dyn ErrorHandler) -> Response {
    if !has_body(&resp, is_head) {
        return resp;
    }
    let (mut parts, body) = resp.into_parts();
    let buffered = match read_body(body, spec.mem_response_body, spec.max_response_body).await {
        Ok(b) => b,
        Err(super::BufferError::Oversize { limit }) => {
            tracing::warn!(limit, "Response body over limit");
            return errors.handle(&super::BufferError::ResponseOversize { limit });
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer response body");
            return errors.handle(&e);
        }
    };
    let body = match buffered.to_body() {
        Ok(body) => body,
        Err(e) => return errors.handle(&e),
    };
    parts.headers.remove(header::TRANSFER_ENCODING);
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(buffered.len()));
    Response::from_parts(parts, body)
}

fn has_body(resp: &Response, is_head: bool) -> bool {
    let status = resp.status();
    if is_head
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return false;
    }
    content_length(resp.headers()) != Some(0)
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn rebuild(parts: &Parts, body: Body) -> Request {
    let mut req = Request::new(body);
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    *req.extensions_mut() = parts.extensions.clone();
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::buffer::BufferSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::util::BoxCloneService;

    fn status_backend(
        statuses: Vec<u16>,
        seen: Arc<Mutex<Vec<(Option<String>, Vec<u8>)>>>,
    ) -> BoxCloneService<Request, Response, Infallible> {
        let calls = Arc::new(AtomicUsize::new(0));
        BoxCloneService::new(tower::service_fn(move |req: Request| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let status = statuses[n.min(statuses.len() - 1)];
            let seen = Arc::clone(&seen);
            async move {
                let cl = req
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .map(|v| v.to_str().unwrap().to_string());
                let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
                seen.lock().unwrap().push((cl, body.to_vec()));
                let mut resp = Response::new(Body::from("upstream"));
                *resp.status_mut() = StatusCode::from_u16(status).unwrap();
                Ok::<_, Infallible>(resp)
            }
        }))
    }

    fn post(body: &'static str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_retries_replay_the_same_body() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spec = BufferSpec::for_frontend(0, 0, "IsNetworkError() && Attempts() <= 2").unwrap();
        let svc = BufferLayer::new(spec).layer(status_backend(vec![502, 502, 200], Arc::clone(&seen)));

        let resp = svc.oneshot(post("payload")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for (cl, body) in seen.iter() {
            assert_eq!(cl.as_deref(), Some("7"));
            assert_eq!(body, b"payload");
        }
    }

    #[tokio::test]
    async fn test_current_attempt_counted_before_check() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spec =
            BufferSpec::for_frontend(0, 0, "Attempts() <= 2 && ResponseCode() == 502").unwrap();
        let svc = BufferLayer::new(spec)
            .layer(status_backend(vec![502, 502, 502, 200], Arc::clone(&seen)));

        let resp = svc.oneshot(post("x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_ceiling() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spec = BufferSpec::for_frontend(0, 0, "ResponseCode() == 503").unwrap();
        let svc = BufferLayer::new(spec).layer(status_backend(vec![503], Arc::clone(&seen)));

        let resp = svc.oneshot(post("x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(seen.lock().unwrap().len(), MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_declared_oversize_rejected_without_forwarding() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spec = BufferSpec::for_frontend(4, 0, "").unwrap();
        let svc = BufferLayer::new(spec).layer(status_backend(vec![200], Arc::clone(&seen)));

        let req = Request::builder()
            .method(Method::POST)
            .header(header::CONTENT_LENGTH, "10")
            .body(Body::from("0123456789"))
            .unwrap();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_streamed_oversize_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spec = BufferSpec::for_frontend(4, 0, "").unwrap();
        let svc = BufferLayer::new(spec).layer(status_backend(vec![200], Arc::clone(&seen)));

        let resp = svc.oneshot(post("0123456789")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_response_captured_with_length() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let svc = BufferLayer::new(BufferSpec::default()).layer(status_backend(vec![200], seen));
        let resp = svc.oneshot(post("")).await.unwrap();
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "8");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"upstream");
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(!is_upgrade(&headers));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_upgrade(&headers));
    }
}
