use crate::http::{make_boxed_body, make_boxed_error_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use http::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health`, `/ready` and a JSON `/status` document.
pub struct AdminService<R, S, E> {
    is_ready: R,
    status: S,
    _error: PhantomData<E>,
}

impl<R, S, E> AdminService<R, S, E>
where
    R: Fn() -> bool,
    S: Fn() -> String,
{
    pub fn new(is_ready: R, status: S) -> Self {
        Self {
            is_ready,
            status,
            _error: PhantomData,
        }
    }
}

impl<R, S, E> Service<Request<Incoming>> for AdminService<R, S, E>
where
    R: Fn() -> bool + Send + 'static,
    S: Fn() -> String + Send + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = route(req.uri().path(), &self.is_ready, &self.status);
        Box::pin(async move { Ok(res) })
    }
}

fn route<E: 'static>(
    path: &str,
    is_ready: impl Fn() -> bool,
    status: impl Fn() -> String,
) -> Response<BoxBody<Bytes, E>> {
    let ok_body = || make_boxed_body("ok\n");

    match path {
        "/health" => Response::new(ok_body()),
        "/ready" => match is_ready() {
            true => Response::new(ok_body()),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        "/status" => {
            let mut response = Response::new(make_boxed_body(status()));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::convert::Infallible;

    async fn body(response: Response<BoxBody<Bytes, Infallible>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_routes() {
        let status = || r#"{"public":{}}"#.to_string();

        let health = route::<Infallible>("/health", || false, status);
        assert_eq!(health.status(), StatusCode::OK);

        let not_ready = route::<Infallible>("/ready", || false, status);
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
        let ready = route::<Infallible>("/ready", || true, status);
        assert_eq!(body(ready).await, Bytes::from("ok\n"));

        let status_response = route::<Infallible>("/status", || true, status);
        assert_eq!(
            status_response.headers()[CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );
        assert_eq!(body(status_response).await, Bytes::from(r#"{"public":{}}"#));

        let missing = route::<Infallible>("/metrics", || true, status);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
