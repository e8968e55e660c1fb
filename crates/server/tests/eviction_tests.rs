//! End-to-end eviction tests against the application state.

mod common;

use common::{TEST_DOMAIN, TestServer};
use refract_server::eviction::run_eviction;
use std::time::Duration;

#[tokio::test]
async fn eviction_trims_cache_to_budget() {
    // 10 KB budget, 15 KB of staggered files.
    let server = TestServer::with_budget("10KB").await;

    let mut paths = Vec::new();
    for i in 0..15 {
        let path = server.cache_root.join(format!("artifact_{i:02}.bin"));
        std::fs::write(&path, vec![0u8; 1024]).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        paths.push(path);
    }

    run_eviction(&server.state).await;

    let total: u64 = paths.iter().filter(|p| p.exists()).count() as u64 * 1024;
    assert!(total <= 10 * 1024, "total {total} exceeds budget");

    // Survivors are the newest files; deletions form a prefix of the
    // mtime-sorted list.
    let first_survivor = paths.iter().position(|p| p.exists()).unwrap();
    for path in &paths[first_survivor..] {
        assert!(path.exists());
    }
    for path in &paths[..first_survivor] {
        assert!(!path.exists());
    }
}

#[tokio::test]
async fn eviction_spares_lock_files_and_within_budget_caches() {
    let server = TestServer::with_budget("100KB").await;

    std::fs::write(server.cache_root.join("a.bin"), vec![0u8; 1024]).unwrap();
    std::fs::write(server.cache_root.join("b.bin.lock"), b"").unwrap();

    run_eviction(&server.state).await;

    assert!(server.cache_root.join("a.bin").exists());
    assert!(server.cache_root.join("b.bin.lock").exists());
}

#[tokio::test]
async fn unlimited_budget_skips_the_tenant() {
    let server = TestServer::new().await;
    server.write_source("keep.mp4", &[0u8; 2048]);
    let _ = server.get(TEST_DOMAIN, "/keep.mp4", &[]).await;

    run_eviction(&server.state).await;

    assert!(server.cache_root.join("keep.mp4").exists());
}
