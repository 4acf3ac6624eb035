#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    extract::Request,
    http::{HeaderMap, Method, StatusCode, header, request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use softlink_store::{AppState, Capabilities, SoftLinkLayer, StorageService, db, store_router};
use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};
use tempfile::TempDir;
use tower::{Service, ServiceExt};

pub const ACCOUNT: &str = "AUTH_test";
pub const TOKEN: &str = "AUTH_tk0123456789";

/// A store on a fresh temp dir. Keep the struct alive for the test's duration.
pub struct TestStore {
    _dir: TempDir,
    pub router: Router,
}

pub async fn test_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let objects = dir.path().join("objects");
    std::fs::create_dir_all(&objects).unwrap();

    let db_url = format!("sqlite://{}", dir.path().join("meta.db").display());
    let pool = db::connect(&db_url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let storage = StorageService::new(Arc::new(pool), objects);
    let mut capabilities = Capabilities::new();
    SoftLinkLayer::new().register_info(&mut capabilities);

    TestStore {
        _dir: dir,
        router: store_router(AppState::new(storage, capabilities)),
    }
}

pub fn object_uri(path: &str) -> String {
    format!("/v1/{}/{}", ACCOUNT, path)
}

/// Request builder for `/v1/AUTH_test/{path}` carrying the auth token.
pub fn req(method: &str, path: &str) -> request::Builder {
    Request::builder()
        .method(method)
        .uri(object_uri(path))
        .header("x-auth-token", TOKEN)
}

pub async fn call<S>(svc: &S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone,
{
    svc.clone().oneshot(req).await.unwrap()
}

pub async fn body_bytes(resp: Response) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

pub async fn create_container<S>(svc: &S, name: &str)
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone,
{
    let resp = call(svc, req("PUT", name).body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED, "creating container {name}");
}

pub async fn put_object<S>(svc: &S, path: &str, content_type: &str, data: impl Into<Body>)
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone,
{
    let resp = call(
        svc,
        req("PUT", path)
            .header(header::CONTENT_TYPE, content_type)
            .body(data.into())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED, "uploading {path}");
}

/// `photos` and `archive` containers plus `photos/cat.jpg`, 1024 bytes of JPEG.
pub async fn cat_fixture(store: &TestStore) -> Vec<u8> {
    create_container(&store.router, "photos").await;
    create_container(&store.router, "archive").await;
    let jpeg: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    put_object(&store.router, "photos/cat.jpg", "image/jpeg", jpeg.clone()).await;
    jpeg
}

/// One call the middleware made against the store.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

/// Fail matching calls with `status` instead of reaching the store.
#[derive(Debug, Clone, Copy)]
pub struct Fault {
    pub method: &'static str,
    pub content_type: Option<&'static str>,
    pub status: StatusCode,
}

impl Fault {
    fn matches(&self, req: &Request) -> bool {
        req.method().as_str() == self.method
            && self.content_type.is_none_or(|expected| {
                req.headers()
                    .get(header::CONTENT_TYPE)
                    .is_some_and(|v| v.as_bytes() == expected.as_bytes())
            })
    }
}

/// Store wrapper that records every call and can inject failures.
#[derive(Clone)]
pub struct InstrumentedStore {
    inner: Router,
    calls: Arc<Mutex<Vec<Call>>>,
    fault: Option<Fault>,
}

impl InstrumentedStore {
    pub fn new(inner: Router) -> Self {
        Self {
            inner,
            calls: Arc::default(),
            fault: None,
        }
    }

    pub fn failing(inner: Router, fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::new(inner)
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.method.to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Service<Request> for InstrumentedStore {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        self.calls.lock().unwrap().push(Call {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            headers: req.headers().clone(),
        });

        let injected = self.fault.filter(|fault| fault.matches(&req));
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Some(fault) = injected {
                return Ok((fault.status, "injected failure").into_response());
            }
            inner.oneshot(req).await
        })
    }
}
