use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Liveness and readiness probes, served on the admin listener.
///
/// `/health` always answers `ok`; `/ready` asks the `is_ready` callback so the
/// main service can report itself unavailable while it drains.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();
        let res = route(req.method(), req.uri().path(), is_ready);
        Box::pin(async move { Ok(res) })
    }
}

fn route<E>(method: &Method, path: &str, is_ready: bool) -> Response<BoxBody<Bytes, E>> {
    if method != Method::GET {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let ok_body = || {
        Full::new(Bytes::from("ok\n"))
            .map_err(|e| match e {})
            .boxed()
    };

    match path {
        "/health" => Response::new(ok_body()),
        "/ready" if is_ready => Response::new(ok_body()),
        "/ready" => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response<BoxBody<Bytes, std::io::Error>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_probes() {
        let health = route::<std::io::Error>(&Method::GET, "/health", false);
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(body_of(health).await, "ok\n");

        let ready = route::<std::io::Error>(&Method::GET, "/ready", true);
        assert_eq!(ready.status(), StatusCode::OK);

        let draining = route::<std::io::Error>(&Method::GET, "/ready", false);
        assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);

        let missing = route::<std::io::Error>(&Method::GET, "/metrics", true);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let post = route::<std::io::Error>(&Method::POST, "/health", true);
        assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
