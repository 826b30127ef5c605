//! Tower integration.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

use crate::resilience::circuit_breaker::breaker::{Admission, CircuitBreaker};
use crate::resilience::NetworkError;

#[derive(Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S> Service<Request> for CircuitBreakerService<S>
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
        let breaker = Arc::clone(&self.breaker);
        let inner = self.inner.clone();
        Box::pin(async move {
            if breaker.admit() == Admission::Fallback {
                tracing::debug!(breaker = %breaker.id(), "Serving circuit breaker fallback");
                return Ok(breaker.spec().fallback.respond(&req));
            }
            let start = Instant::now();
            let resp = inner.oneshot(req).await?;
            let network_error = resp.extensions().get::<NetworkError>().is_some();
            breaker.record(resp.status().as_u16(), start.elapsed(), network_error);
            Ok(resp)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::breaker::BreakerState;
    use crate::resilience::circuit_breaker::spec::CircuitBreakerSpec;
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fallback_served_while_tripped() {
        let spec = CircuitBreakerSpec::from_json(&json!({
            "Condition": "NetworkErrorRatio() > 0.5",
            "Fallback": {"Type": "response", "Action": {"StatusCode": 418, "Body": "nope"}},
            "CheckPeriod": "1h"
        }))
        .unwrap();
        let breaker = Arc::new(CircuitBreaker::new("f1/cb", spec));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let backend = tower::service_fn(move |_req: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = StatusCode::BAD_GATEWAY;
                resp.extensions_mut().insert(NetworkError);
                Ok::<_, Infallible>(resp)
            }
        });
        let svc = CircuitBreakerLayer::new(Arc::clone(&breaker)).layer(backend);

        let resp = svc.clone().oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        breaker.check_now();
        assert_eq!(breaker.state(), BreakerState::Tripped);

        let resp = svc.clone().oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
