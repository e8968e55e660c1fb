//! Integration tests for the local filesystem driver.

use refract_core::StorageKind;
use refract_storage::{StorageDriver, StorageError, connect};
use tempfile::tempdir;

fn local_dsn(root: &std::path::Path) -> String {
    format!("local://{}", root.display())
}

#[tokio::test]
async fn fetches_file_to_disk() {
    let source = tempdir().unwrap();
    let cache = tempdir().unwrap();
    std::fs::create_dir_all(source.path().join("photos")).unwrap();
    std::fs::write(source.path().join("photos/cat.jpg"), b"jpeg-bytes").unwrap();

    let driver = connect(StorageKind::Local, &local_dsn(source.path())).unwrap();
    let dest = cache.path().join("staged/photos/cat.jpg");
    driver.fetch_to_disk("photos/cat.jpg", &dest).await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg-bytes");
}

#[tokio::test]
async fn missing_object_is_not_found() {
    let source = tempdir().unwrap();
    let cache = tempdir().unwrap();

    let driver = connect(StorageKind::Local, &local_dsn(source.path())).unwrap();
    let err = driver
        .fetch_to_disk("nope.png", &cache.path().join("nope.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn traversal_keys_are_rejected() {
    let source = tempdir().unwrap();
    let cache = tempdir().unwrap();

    let driver = connect(StorageKind::Local, &local_dsn(source.path())).unwrap();
    let err = driver
        .fetch_to_disk("../../etc/passwd", &cache.path().join("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey(_)));
}

#[tokio::test]
async fn stat_reports_size() {
    let source = tempdir().unwrap();
    std::fs::write(source.path().join("a.bin"), vec![0u8; 1234]).unwrap();

    let driver = connect(StorageKind::Local, &local_dsn(source.path())).unwrap();
    let meta = driver.stat("a.bin").await.unwrap();
    assert_eq!(meta.size, 1234);
    assert!(driver.exists("a.bin").await.unwrap());
    assert!(!driver.exists("b.bin").await.unwrap());
}
