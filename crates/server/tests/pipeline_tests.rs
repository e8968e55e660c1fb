//! Integration tests for the request pipeline and streaming responder.

mod common;

use axum::http::StatusCode;
use common::{TEST_DOMAIN, TestServer, header};

#[tokio::test]
async fn unknown_host_is_forbidden() {
    let server = TestServer::new().await;
    let (status, _, body) = server.get("unknown.example", "/photo.jpg", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(String::from_utf8_lossy(&body), "forbidden domain");
}

#[tokio::test]
async fn unknown_extension_is_unsupported() {
    let server = TestServer::new().await;
    let (status, _, _) = server.get(TEST_DOMAIN, "/binary.exe", &[]).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, _, _) = server.get(TEST_DOMAIN, "/no-extension", &[]).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn malformed_options_are_bad_requests() {
    let server = TestServer::new().await;
    server.write_source("pic.jpg", b"jpeg");

    for query in ["width=abc", "size=2x", "q=101", "ss=x"] {
        let (status, _, _) = server
            .get(TEST_DOMAIN, &format!("/pic.jpg?{query}"), &[])
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "query: {query}");
    }
}

#[tokio::test]
async fn unknown_output_format_is_bad_request() {
    let server = TestServer::new().await;
    server.write_source("clip.mp4", b"mp4");
    let (status, _, _) = server
        .get(TEST_DOMAIN, "/clip.mp4?format=webm", &[])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_profile_is_bad_request() {
    let server = TestServer::new().await;
    server.write_source("clip.mp4", b"mp4");
    let (status, _, _) = server
        .get(TEST_DOMAIN, "/clip.mp4?profile=nope", &[])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_source_is_not_found() {
    let server = TestServer::new().await;
    let (status, _, _) = server.get(TEST_DOMAIN, "/ghost.mp4", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pass_through_serves_staged_bytes() {
    let server = TestServer::new().await;
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    server.write_source("videos/raw.mp4", &payload);

    let (status, headers, body) = server.get(TEST_DOMAIN, "/videos/raw.mp4", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "content-type"), "video/mp4");
    assert_eq!(header(&headers, "content-length"), "4096");
    assert_eq!(header(&headers, "accept-ranges"), "bytes");
    assert_eq!(header(&headers, "cache-control"), "public, max-age=86400");
    assert!(!header(&headers, "etag").is_empty());
    assert!(!header(&headers, "last-modified").is_empty());
    assert!(!header(&headers, "x-trace-id").is_empty());
    assert_eq!(body, payload);

    // The source is staged under the tenant cache root.
    assert!(server.cache_root.join("videos/raw.mp4").exists());
    // And its lock is gone.
    assert!(!server.cache_root.join("videos/raw.mp4.lock").exists());
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let server = TestServer::new().await;
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    server.write_source("raw.mp4", &payload);

    let (status, headers, body) = server
        .get(TEST_DOMAIN, "/raw.mp4", &[("range", "bytes=1000-1999")])
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&headers, "content-range"), "bytes 1000-1999/10000");
    assert_eq!(header(&headers, "content-length"), "1000");
    assert_eq!(body, payload[1000..2000].to_vec());
}

#[tokio::test]
async fn successive_ranges_reconstruct_the_body() {
    let server = TestServer::new().await;
    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
    server.write_source("tiles.mp4", &payload);

    let mut reassembled = Vec::new();
    for range in ["bytes=0-999", "bytes=1000-1999", "bytes=2000-"] {
        let (status, _, body) = server
            .get(TEST_DOMAIN, "/tiles.mp4", &[("range", range)])
            .await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        reassembled.extend(body);
    }
    assert_eq!(reassembled, payload);
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let server = TestServer::new().await;
    server.write_source("small.mp4", &[0u8; 100]);

    let (status, _, _) = server
        .get(TEST_DOMAIN, "/small.mp4", &[("range", "bytes=500-")])
        .await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn malformed_range_is_400() {
    let server = TestServer::new().await;
    server.write_source("small.mp4", &[0u8; 100]);

    let (status, _, _) = server
        .get(TEST_DOMAIN, "/small.mp4", &[("range", "bytes=zz-")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn etag_round_trip_yields_304() {
    let server = TestServer::new().await;
    server.write_source("cond.mp4", &[7u8; 256]);

    let (_, headers, _) = server.get(TEST_DOMAIN, "/cond.mp4", &[]).await;
    let etag = header(&headers, "etag").to_string();
    assert!(!etag.is_empty());

    let (status, headers, body) = server
        .get(TEST_DOMAIN, "/cond.mp4", &[("if-none-match", &etag)])
        .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert_eq!(header(&headers, "etag"), etag);

    // A different validator still yields the full body.
    let (status, _, _) = server
        .get(TEST_DOMAIN, "/cond.mp4", &[("if-none-match", "\"stale\"")])
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn if_modified_since_yields_304() {
    let server = TestServer::new().await;
    server.write_source("lm.mp4", &[1u8; 64]);

    let (_, headers, _) = server.get(TEST_DOMAIN, "/lm.mp4", &[]).await;
    let last_modified = header(&headers, "last-modified").to_string();

    let (status, _, _) = server
        .get(
            TEST_DOMAIN,
            "/lm.mp4",
            &[("if-modified-since", &last_modified)],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn download_forces_attachment_disposition() {
    let server = TestServer::new().await;
    server.write_source("report.pdf", b"%PDF-1.4");

    let (status, headers, _) = server
        .get(TEST_DOMAIN, "/report.pdf?download=true", &[])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        header(&headers, "content-disposition"),
        "attachment; filename=\"report.pdf\""
    );
}

#[tokio::test]
async fn debug_header_annotates_resolution() {
    let server = TestServer::new().await;
    server.write_source("dbg.mp4", &[0u8; 32]);

    let (status, headers, _) = server
        .get(TEST_DOMAIN, "/dbg.mp4", &[("x-debug", "1")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "x-debug-host"), TEST_DOMAIN);
    assert_eq!(header(&headers, "x-debug-extension"), "mp4");
    assert!(!header(&headers, "x-debug-mediatype").is_empty());
    assert!(!header(&headers, "x-debug-options").is_empty());
    assert_eq!(header(&headers, "x-debug-storage-0-type"), "local");
    assert_eq!(header(&headers, "x-debug-storage-success"), "storage-0");
    assert!(!header(&headers, "x-debug-staged-path").is_empty());

    // Without the header, no debug annotations leak.
    let (_, headers, _) = server.get(TEST_DOMAIN, "/dbg.mp4", &[]).await;
    assert!(header(&headers, "x-debug-host").is_empty());
}

#[tokio::test]
async fn traversal_paths_are_rejected() {
    let server = TestServer::new().await;
    let (status, _, _) = server
        .get(TEST_DOMAIN, "/..%2F..%2Fetc%2Fpasswd.jpg", &[])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let server = TestServer::new().await;
    let (status, headers, body) = server.get(TEST_DOMAIN, "/health", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(header(&headers, "content-type").starts_with("application/json"));
    assert_eq!(String::from_utf8_lossy(&body), "{\"status\":\"ok\"}");
}

#[tokio::test]
async fn metrics_endpoint_exposes_text_format() {
    let server = TestServer::new().await;
    server.write_source("m.mp4", &[0u8; 16]);
    let _ = server.get(TEST_DOMAIN, "/m.mp4", &[]).await;

    let (status, headers, body) = server.get(TEST_DOMAIN, "/prometheus/metrics", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(header(&headers, "content-type").starts_with("text/plain"));
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("refract_requests_total"));
}

#[tokio::test]
async fn reload_picks_up_new_tenants() {
    let server = TestServer::new().await;

    let (status, _, _) = server.get("late.example", "/a.jpg", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let project = server
        .state
        .metadata
        .create_project("late", server.cache_root.to_str().unwrap(), "")
        .await
        .unwrap();
    server
        .state
        .metadata
        .create_storage(
            project,
            "local",
            "",
            &format!("local://{}", server.storage_root.display()),
            1,
        )
        .await
        .unwrap();
    server
        .state
        .metadata
        .create_origin(project, "late.example", "")
        .await
        .unwrap();

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    let response = server
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/reload")
                .header("host", TEST_DOMAIN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Reload is asynchronous; wait for the new table to land.
    let mut admitted = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if server.state.lookup_tenant("late.example").await.is_some() {
            admitted = true;
            break;
        }
    }
    assert!(admitted, "reload did not publish the new tenant");

    server.write_source("fresh.mp4", &[9u8; 10]);
    let (status, _, _) = server.get("late.example", "/fresh.mp4", &[]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn second_request_hits_the_staging_cache() {
    let server = TestServer::new().await;
    server.write_source("twice.mp4", &[5u8; 128]);

    let (status, _, _) = server.get(TEST_DOMAIN, "/twice.mp4", &[]).await;
    assert_eq!(status, StatusCode::OK);

    // Remove the backing file; the staged copy must still serve.
    std::fs::remove_file(server.storage_root.join("twice.mp4")).unwrap();
    let (status, _, body) = server.get(TEST_DOMAIN, "/twice.mp4", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, vec![5u8; 128]);
}
