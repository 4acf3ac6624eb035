mod common;

use axum::{
    body::Body,
    http::{StatusCode, header},
};
use common::*;
use softlink_store::{
    SoftLinkLayer,
    softlink::{LINK_ERROR, LINK_POINTER, LINK_TARGET, ORIGINAL_CONTENT_LENGTH},
};
use tower::Layer;

fn link_request(source: &str, target: &str) -> axum::extract::Request {
    req("POST", source)
        .header(LINK_TARGET, target)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn linked_object_reads_through_to_payload() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // payload now lives at the destination
    let resp = call(&app, req("GET", "archive/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    // and the source path resolves to it
    let resp = call(&app, req("GET", "photos/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "1024");
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    let resp = call(&app, req("HEAD", "photos/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert!(resp.headers().get(LINK_POINTER).is_none());

    // the raw object at the source is an empty stub
    let resp = call(
        &store.router,
        req("HEAD", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "link");
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "0");
    assert_eq!(resp.headers()[ORIGINAL_CONTENT_LENGTH], "1024");
    assert_eq!(resp.headers()[LINK_POINTER], "archive/cat.jpg");

    let resp = call(
        &store.router,
        req("GET", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert!(body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn escaped_names_link_and_resolve() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    put_object(&store.router, "photos/a%20b.jpg", "image/jpeg", jpeg.clone()).await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    // same object, spelled encoded and decoded
    let resp = call(&app, link_request("photos/a%20b.jpg", "photos/a b.jpg")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers()[LINK_ERROR], "invalid-link-request");

    let resp = call(&app, link_request("photos/a%20b.jpg", "archive/a%20b.jpg")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = call(&app, req("GET", "photos/a%20b.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    let resp = call(
        &store.router,
        req("GET", "archive/a%20b.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    let resp = call(
        &store.router,
        req("HEAD", "photos/a%20b.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.headers()[LINK_POINTER], "archive/a b.jpg");
}

#[tokio::test]
async fn non_ascii_targets_link_and_resolve() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/gato%20%C3%B1.jpg")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = call(&app, req("GET", "photos/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    let resp = call(
        &store.router,
        req("GET", "archive/gato%20%C3%B1.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = call(
        &store.router,
        req("HEAD", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    let pointer = std::str::from_utf8(resp.headers()[LINK_POINTER].as_bytes()).unwrap();
    assert_eq!(pointer, "archive/gato ñ.jpg");
}

#[tokio::test]
async fn clients_cannot_write_link_metadata() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(
        &app,
        req("PUT", "archive/fake")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(LINK_POINTER, "photos/cat.jpg")
            .header(ORIGINAL_CONTENT_LENGTH, "1024")
            .header("x-object-meta-note", "kept")
            .body(Body::from("x"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let calls = instrumented.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].headers.get(LINK_POINTER).is_none());
    assert!(calls[0].headers.get(ORIGINAL_CONTENT_LENGTH).is_none());
    assert_eq!(calls[0].headers["x-object-meta-note"], "kept");

    // reads return the written body, not someone else's payload
    let resp = call(&app, req("GET", "archive/fake").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], b"x");

    let resp = call(
        &store.router,
        req("HEAD", "archive/fake").body(Body::empty()).unwrap(),
    )
    .await;
    assert!(resp.headers().get(LINK_POINTER).is_none());

    // an ordinary object, so it can be linked
    let resp = call(&app, link_request("archive/fake", "photos/fake")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = call(&app, req("GET", "archive/fake").body(Body::empty()).unwrap()).await;
    assert_eq!(&body_bytes(resp).await[..], b"x");

    let resp = call(&app, req("GET", "photos/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);
}

#[tokio::test]
async fn put_with_link_marker_also_creates_link() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(
        &app,
        req("PUT", "photos/cat.jpg")
            .header(LINK_TARGET, "/archive/2024/cat.jpg")
            .body(Body::from("ignored body"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = call(
        &store.router,
        req("HEAD", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.headers()[LINK_POINTER], "archive/2024/cat.jpg");

    let resp = call(&app, req("GET", "photos/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);
}

#[tokio::test]
async fn same_path_is_rejected_without_touching_the_store() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    for target in ["photos/cat.jpg", "/photos/cat.jpg"] {
        let resp = call(&app, link_request("photos/cat.jpg", target)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()[LINK_ERROR], "invalid-link-request");
        assert_eq!(resp.headers()[header::ETAG], "");
        let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
        assert!(body.contains("cannot be the same"), "{body}");
    }

    assert!(instrumented.calls().is_empty());
}

#[tokio::test]
async fn malformed_target_is_rejected_without_touching_the_store() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    for target in ["archive", "archive/", "", "/cat.jpg", "archive/%FF.jpg", "%2Fcat.jpg"] {
        let resp = call(&app, link_request("photos/cat.jpg", target)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "target `{target}`");
        assert_eq!(resp.headers()[LINK_ERROR], "invalid-link-request");
    }

    assert!(instrumented.calls().is_empty());
}

#[tokio::test]
async fn linking_a_link_is_rejected() {
    let store = test_store().await;
    cat_fixture(&store).await;
    create_container(&store.router, "other").await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    for target in ["archive/cat.jpg", "other/cat.jpg", "archive/elsewhere.jpg"] {
        let resp = call(&app, link_request("photos/cat.jpg", target)).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(resp.headers()[LINK_ERROR], "already-linked");
    }

    // nothing was copied by the rejected attempts
    let resp = call(&app, req("GET", "other/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn link_typed_object_without_pointer_is_rejected() {
    let store = test_store().await;
    cat_fixture(&store).await;
    put_object(&store.router, "photos/odd", "link", "").await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(&app, link_request("photos/odd", "archive/odd")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(resp.headers()[LINK_ERROR], "already-linked");
}

#[tokio::test]
async fn missing_source_reports_not_found() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(&app, link_request("photos/dog.jpg", "archive/dog.jpg")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()[LINK_ERROR], "source-not-found");
    assert_eq!(resp.headers()[header::ETAG], "");

    assert_eq!(instrumented.methods(), vec!["HEAD"]);
}

#[tokio::test]
async fn denied_source_keeps_store_status() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let instrumented = InstrumentedStore::failing(
        store.router.clone(),
        Fault {
            method: "HEAD",
            content_type: None,
            status: StatusCode::FORBIDDEN,
        },
    );
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers()[LINK_ERROR], "source-not-found");
    let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(body.contains("injected failure"), "{body}");
}

#[tokio::test]
async fn relocation_into_missing_container_leaves_source_untouched() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "nowhere/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()[LINK_ERROR], "relocation-failed");
    assert_eq!(instrumented.methods(), vec!["HEAD", "COPY"]);

    let resp = call(
        &store.router,
        req("GET", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert!(resp.headers().get(LINK_POINTER).is_none());
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);
}

#[tokio::test]
async fn injected_relocation_failure_writes_no_stub() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let instrumented = InstrumentedStore::failing(
        store.router.clone(),
        Fault {
            method: "COPY",
            content_type: None,
            status: StatusCode::SERVICE_UNAVAILABLE,
        },
    );
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.headers()[LINK_ERROR], "relocation-failed");
    assert!(!instrumented.methods().contains(&"PUT".to_string()));

    let resp = call(
        &store.router,
        req("GET", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    let resp = call(
        &store.router,
        req("HEAD", "archive/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_stub_write_is_a_partial_failure() {
    let store = test_store().await;
    let jpeg = cat_fixture(&store).await;
    let instrumented = InstrumentedStore::failing(
        store.router.clone(),
        Fault {
            method: "PUT",
            content_type: Some("link"),
            status: StatusCode::INSUFFICIENT_STORAGE,
        },
    );
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()[LINK_ERROR], "partial-link-failure");
    let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(body.contains("archive/cat.jpg"), "{body}");
    assert_eq!(instrumented.methods(), vec!["HEAD", "COPY", "PUT"]);

    // the copy landed
    let resp = call(
        &store.router,
        req("GET", "archive/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);

    // relocation copies, so the source still holds the original object
    let resp = call(
        &store.router,
        req("GET", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert!(resp.headers().get(LINK_POINTER).is_none());
    assert_eq!(&body_bytes(resp).await[..], &jpeg[..]);
}

#[tokio::test]
async fn secondary_calls_carry_only_what_they_need() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    let resp = call(
        &app,
        req("POST", "photos/cat.jpg")
            .header(LINK_TARGET, "archive/cat.jpg")
            .header(header::TRANSFER_ENCODING, "chunked")
            .header("x-copy-from", "photos/other.jpg")
            .header("x-object-meta-color", "grey")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let calls = instrumented.calls();
    assert_eq!(calls.len(), 3);
    for call in &calls {
        assert_eq!(call.path, "/v1/AUTH_test/photos/cat.jpg");
        assert_eq!(call.headers["x-auth-token"], TOKEN);
        assert!(call.headers.get(LINK_TARGET).is_none());
        assert!(call.headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(call.headers.get("x-copy-from").is_none());
    }

    let head = &calls[0];
    assert_eq!(head.method, "HEAD");
    assert_eq!(head.headers.len(), 1);

    let copy = &calls[1];
    assert_eq!(copy.method.as_str(), "COPY");
    assert_eq!(copy.headers["destination"], "archive/cat.jpg");
    assert_eq!(copy.headers["x-object-meta-color"], "grey");

    let stub = &calls[2];
    assert_eq!(stub.method, "PUT");
    assert_eq!(stub.headers[header::CONTENT_TYPE], "link");
    assert_eq!(stub.headers[header::CONTENT_LENGTH], "0");
    assert_eq!(stub.headers[ORIGINAL_CONTENT_LENGTH], "1024");
    assert_eq!(stub.headers[LINK_POINTER], "archive/cat.jpg");
}

#[tokio::test]
async fn resolution_forwards_the_client_headers() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let app = SoftLinkLayer::new().layer(store.router.clone());
    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());
    let resp = call(
        &app,
        req("GET", "photos/cat.jpg")
            .header(header::RANGE, "bytes=0-99")
            .header(header::IF_NONE_MATCH, "\"abc\"")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 0-99/1024");
    assert_eq!(body_bytes(resp).await.len(), 100);

    let calls = instrumented.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].path, "/v1/AUTH_test/photos/cat.jpg");
    assert_eq!(calls[1].method, "GET");
    assert_eq!(calls[1].path, "/v1/AUTH_test/archive/cat.jpg");
    assert_eq!(calls[1].headers[header::RANGE], "bytes=0-99");
    assert_eq!(calls[1].headers[header::IF_NONE_MATCH], "\"abc\"");
    assert_eq!(calls[1].headers["x-auth-token"], TOKEN);
}

#[tokio::test]
async fn dangling_link_reads_as_not_found() {
    let store = test_store().await;
    cat_fixture(&store).await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(&app, link_request("photos/cat.jpg", "archive/cat.jpg")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = call(&app, req("DELETE", "archive/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = call(&app, req("GET", "photos/cat.jpg").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(resp.headers().get(LINK_ERROR).is_none());
    let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(body.contains("cat.jpg"), "{body}");
    assert!(body.contains("archive"), "{body}");

    // the stub itself is still there
    let resp = call(
        &store.router,
        req("HEAD", "photos/cat.jpg").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[LINK_POINTER], "archive/cat.jpg");
}

#[tokio::test]
async fn resolution_follows_exactly_one_hop() {
    let store = test_store().await;
    create_container(&store.router, "photos").await;
    create_container(&store.router, "archive").await;

    // a payload that erroneously carries a pointer of its own
    let resp = call(
        &store.router,
        req("PUT", "archive/first.txt")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(LINK_POINTER, "archive/second.txt")
            .body(Body::from("first"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    put_object(&store.router, "archive/second.txt", "text/plain", "second").await;
    let resp = call(
        &store.router,
        req("PUT", "photos/link.txt")
            .header(header::CONTENT_TYPE, "link")
            .header(LINK_POINTER, "archive/first.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let app = SoftLinkLayer::new().layer(store.router.clone());
    let resp = call(&app, req("GET", "photos/link.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[LINK_POINTER], "archive/second.txt");
    assert_eq!(&body_bytes(resp).await[..], b"first");
}

#[tokio::test]
async fn ordinary_requests_pass_through() {
    let store = test_store().await;
    create_container(&store.router, "photos").await;
    let instrumented = InstrumentedStore::new(store.router.clone());
    let app = SoftLinkLayer::new().layer(instrumented.clone());

    put_object(&app, "photos/plain.txt", "text/plain", "hello").await;
    let resp = call(&app, req("GET", "photos/plain.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(&body_bytes(resp).await[..], b"hello");

    let resp = call(&app, req("GET", "photos").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = call(&app, req("DELETE", "photos/plain.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // one store call per client request: nothing to resolve or create
    assert_eq!(instrumented.methods(), vec!["PUT", "GET", "GET", "DELETE"]);
}

#[tokio::test]
async fn capability_is_announced() {
    let store = test_store().await;
    let app = SoftLinkLayer::new().layer(store.router.clone());

    let resp = call(
        &app,
        axum::extract::Request::builder()
            .uri("/info")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let info: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(info["softlink"]["link_header"], "X-Link-To");
    assert_eq!(info["softlink"]["max_depth"], 1);
}
