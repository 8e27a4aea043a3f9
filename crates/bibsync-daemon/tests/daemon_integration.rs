//! Integration tests for the daemon against a real vault directory.

use bibsync_core::BibsyncConfig;
use bibsync_daemon::{Daemon, DaemonServices};
use bibsync_engine::{FsDocumentStore, MockImporter, Registry, SilentNotifier};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

fn config(root: &Path, bib: &Path) -> BibsyncConfig {
    BibsyncConfig {
        bibliography_path: Some(bib.to_path_buf()),
        debounce_ms: 100,
        import_on_startup: false,
        ..Default::default()
    }
    .resolve_paths(root)
}

async fn wait_for(path: &Path, expected: &str) -> bool {
    for _ in 0..50 {
        if tokio::fs::read_to_string(path).await.ok().as_deref() == Some(expected) {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_reconfigure_switches_bibliography() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bibsync_daemon=debug")
        .with_test_writer()
        .try_init();

    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let first = root.join("first.bib");
    let second = root.join("second.bib");
    std::fs::write(&first, "@misc{k1, title={First}}").unwrap();
    std::fs::write(&second, "@misc{k1, title={Second}}").unwrap();
    std::fs::write(root.join("k1.md"), "# k1\n").unwrap();

    let config = config(root, &first);
    let registry = Registry::load(&config.state_path).await.unwrap().into_shared();
    registry
        .write()
        .await
        .record_imports([("k1".to_string(), "k1.md".to_string())]);

    let daemon = Daemon::new(
        config.clone(),
        DaemonServices {
            registry,
            documents: Arc::new(FsDocumentStore::new(root)),
            importer: Some(Arc::new(MockImporter::new())),
            citations: None,
            notifier: Arc::new(SilentNotifier),
        },
    );
    let handle = daemon.handle();
    let running = tokio::spawn(daemon.run());

    handle.sync_now().await.unwrap();
    assert!(wait_for(&root.join("k1.md"), "---\ntitle: First\n---\n# k1\n").await);

    handle
        .reconfigure(BibsyncConfig {
            bibliography_path: Some(second.clone()),
            ..config
        })
        .await
        .unwrap();
    handle.sync_now().await.unwrap();
    assert!(wait_for(&root.join("k1.md"), "---\ntitle: Second\n---\n# k1\n").await);

    handle.shutdown().await.unwrap();
    running.await.unwrap().unwrap();
}
