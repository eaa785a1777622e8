//! 端到端同步场景：内存存储替身 + 临时目录

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use modsync_lib::core::digest::{bytes_digest, DigestAlgorithm};
use modsync_lib::core::{FailurePolicy, SyncConfig, SyncEngine, SyncMode};
use modsync_lib::storage::{write_atomic, DirectoryStore, ObjectListing, ObjectStore};
use modsync_lib::{ProgressReporter, SilentProgress, SyncError};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MANIFEST: &str = "mods_md5_info.json";

#[derive(Default)]
struct MemoryStore {
    objects: BTreeMap<String, Vec<u8>>,
    failing: HashSet<String>,
    /// 第 N 次列举调用失败（从 1 开始）
    fail_listing_on_call: Option<usize>,
    list_calls: AtomicUsize,
    downloads: AtomicUsize,
}

impl MemoryStore {
    fn with_objects(objects: &[(&str, &[u8])]) -> Self {
        Self {
            objects: objects
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    /// 按当前对象生成摘要清单，目录标记和清单自身除外
    fn with_manifest(mut self) -> Self {
        let entries: BTreeMap<&str, String> = self
            .objects
            .iter()
            .filter(|(k, _)| k.contains('.') && !k.ends_with('/'))
            .map(|(k, v)| (k.as_str(), bytes_digest(v, DigestAlgorithm::Md5)))
            .collect();
        let json = serde_json::to_vec(&entries).unwrap();
        self.objects.insert(MANIFEST.to_string(), json);
        self
    }

    fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self, marker: Option<&str>, max_keys: usize) -> Result<ObjectListing> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_listing_on_call == Some(call) {
            return Err(anyhow!("connection reset by peer"));
        }

        let remaining: Vec<String> = self
            .objects
            .keys()
            .filter(|k| marker.map_or(true, |m| k.as_str() > m))
            .cloned()
            .collect();
        let is_truncated = remaining.len() > max_keys;
        let keys: Vec<String> = remaining.into_iter().take(max_keys).collect();
        let next_marker = if is_truncated { keys.last().cloned() } else { None };
        Ok(ObjectListing {
            keys,
            next_marker,
            is_truncated,
        })
    }

    async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        if self.failing.contains(key) {
            return Err(anyhow!("503 slow down"));
        }
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {}", key))
    }

    async fn object_digest(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .objects
            .get(key)
            .map(|data| bytes_digest(data, DigestAlgorithm::Md5)))
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let data = self.read_object(key).await?;
        write_atomic(dest, &data).await?;
        Ok(data.len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
struct RecordingProgress {
    total: Mutex<Option<u64>>,
    positions: Mutex<Vec<u64>>,
    stopped: AtomicUsize,
}

impl ProgressReporter for RecordingProgress {
    fn start(&self, total: u64) {
        *self.total.lock().unwrap() = Some(total);
    }

    fn set_current(&self, current: u64) {
        self.positions.lock().unwrap().push(current);
    }

    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

fn config(root: &Path, mode: SyncMode) -> SyncConfig {
    let mut config = SyncConfig::new(root);
    config.mode = mode;
    config.scheduler.workers = 4;
    config.scheduler.retry_base_delay_ms = 1;
    config
}

fn local_entries(root: &Path) -> Vec<String> {
    let mut entries: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    entries.sort();
    entries
}

#[tokio::test]
async fn new_file_is_downloaded_and_extensionless_key_becomes_directory() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[("addon.zip", b"addon payload"), ("readme", b"")])
            .with_manifest(),
    );

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(
        std::fs::read(root.path().join("addon.zip")).unwrap(),
        b"addon payload"
    );
    assert!(root.path().join("readme").is_dir());
    assert!(!root.path().join(MANIFEST).exists());
    assert_eq!(report.directories, 1);
    assert_eq!(report.ignored, 0);
    assert_eq!(report.files_downloaded, 1);
    assert_eq!(store.downloads(), 1);
}

#[tokio::test]
async fn hidden_key_is_ignored_and_nothing_is_created() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_objects(&[(".cache", b"junk")]).with_manifest());

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.ignored, 1);
    assert!(report.is_noop());
    assert!(local_entries(root.path()).is_empty());
    assert_eq!(store.downloads(), 0);
}

#[tokio::test]
async fn matching_local_digest_skips_download() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mod.zip"), b"same bytes").unwrap();
    let store = Arc::new(MemoryStore::with_objects(&[("mod.zip", b"same bytes")]).with_manifest());

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.files_downloaded, 0);
    assert_eq!(store.downloads(), 0);
}

#[tokio::test]
async fn changed_local_file_is_replaced_with_remote_content() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("mod.zip"), b"old version").unwrap();
    let store = Arc::new(MemoryStore::with_objects(&[("mod.zip", b"new version")]).with_manifest());

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.files_downloaded, 1);
    assert_eq!(
        std::fs::read(root.path().join("mod.zip")).unwrap(),
        b"new version"
    );
    assert!(!root.path().join(".mod.zip.part").exists());
}

#[tokio::test]
async fn listing_failure_on_second_page_aborts_before_any_transfer() {
    let root = tempfile::tempdir().unwrap();
    let mut store = MemoryStore::with_objects(&[
        ("a.zip", b"a"),
        ("b.zip", b"b"),
        ("c.zip", b"c"),
    ])
    .with_manifest();
    store.fail_listing_on_call = Some(2);
    let store = Arc::new(store);

    let mut config = config(root.path(), SyncMode::Manifest);
    config.max_keys = 2;
    let engine = SyncEngine::new(store.clone(), config);
    let result = engine.run(&SilentProgress).await;

    match result {
        Err(SyncError::Listing { marker, .. }) => assert_eq!(marker.as_deref(), Some("b.zip")),
        other => panic!("expected listing error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(store.downloads(), 0);
    assert!(local_entries(root.path()).is_empty());
}

#[tokio::test]
async fn second_run_is_a_noop() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[
            ("pack/", b""),
            ("pack/mod.info", b"name=pack"),
            ("pack/media/scripts", b""),
            ("pack/media/scripts/items.txt", b"item Axe"),
        ])
        .with_manifest(),
    );

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let first = engine.run(&SilentProgress).await.unwrap();
    assert_eq!(first.files_downloaded, 2);

    let second = engine.run(&SilentProgress).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.files_skipped, 2);
    assert_eq!(store.downloads(), 2);
}

#[tokio::test]
async fn every_regular_file_key_is_present_after_a_run() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[
            ("a/b/c.lua", b"print(1)"),
            ("a/d.png", b"\x89PNG"),
            ("e.txt", b"hello"),
        ])
        .with_manifest(),
    );

    let engine = SyncEngine::new(store, config(root.path(), SyncMode::Manifest));
    engine.run(&SilentProgress).await.unwrap();

    for (key, body) in [
        ("a/b/c.lua", &b"print(1)"[..]),
        ("a/d.png", &b"\x89PNG"[..]),
        ("e.txt", &b"hello"[..]),
    ] {
        assert_eq!(std::fs::read(root.path().join(key)).unwrap(), body, "{}", key);
    }
}

#[tokio::test]
async fn ignored_keys_never_touch_the_filesystem() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[
            (".DS_Store", b"x"),
            ("pack/.hidden", b"x"),
            ("../escape.zip", b"x"),
            ("ok.zip", b"ok"),
        ])
        .with_manifest(),
    );

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.ignored, 3);
    assert_eq!(local_entries(root.path()), vec!["ok.zip".to_string()]);
    assert!(!root.path().parent().unwrap().join("escape.zip").exists());
    assert_eq!(store.downloads(), 1);
}

#[tokio::test]
async fn directories_exist_before_files_are_written() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[("empty_dir", b""), ("pack/", b""), ("pack/a.zip", b"a")])
            .with_manifest(),
    );

    let engine = SyncEngine::new(store, config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.directories, 2);
    assert!(root.path().join("empty_dir").is_dir());
    assert!(root.path().join("pack").is_dir());
    assert!(root.path().join("pack/a.zip").is_file());
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_total() {
    let root = tempfile::tempdir().unwrap();
    let objects: Vec<(String, Vec<u8>)> = (0..20)
        .map(|i| (format!("mod{:02}.zip", i), vec![i as u8; 256]))
        .collect();
    let refs: Vec<(&str, &[u8])> = objects
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_slice()))
        .collect();
    let store = Arc::new(MemoryStore::with_objects(&refs).with_manifest());
    let progress = RecordingProgress::default();

    let engine = SyncEngine::new(store, config(root.path(), SyncMode::Manifest));
    engine.run(&progress).await.unwrap();

    let positions = progress.positions.lock().unwrap().clone();
    assert_eq!(*progress.total.lock().unwrap(), Some(20));
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(positions.last(), Some(&20));
    assert_eq!(progress.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_mods_root_is_a_local_state_error() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("Zomboid/mods");
    let store = Arc::new(MemoryStore::with_objects(&[("a.zip", b"a")]).with_manifest());

    let engine = SyncEngine::new(store.clone(), config(&root, SyncMode::Manifest));
    let result = engine.run(&SilentProgress).await;

    assert!(matches!(result, Err(SyncError::LocalState(_))));
    assert_eq!(store.downloads(), 0);
}

#[tokio::test]
async fn missing_manifest_fails_before_any_transfer() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_objects(&[("a.zip", b"a")]));

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let result = engine.run(&SilentProgress).await;

    assert!(matches!(result, Err(SyncError::Manifest { .. })));
    assert_eq!(store.downloads(), 0);
}

#[tokio::test]
async fn abort_policy_reports_first_failure_after_all_tasks_finish() {
    let root = tempfile::tempdir().unwrap();
    let mut store =
        MemoryStore::with_objects(&[("bad.zip", b"x"), ("good.zip", b"y")]).with_manifest();
    store.failing.insert("bad.zip".to_string());
    let store = Arc::new(store);

    let mut config = config(root.path(), SyncMode::Manifest);
    config.scheduler.max_retries = 1;
    let engine = SyncEngine::new(store, config);
    let result = engine.run(&SilentProgress).await;

    match result {
        Err(SyncError::Transfer { key, failed, .. }) => {
            assert_eq!(key, "bad.zip");
            assert_eq!(failed, 1);
        }
        other => panic!("expected transfer error, got {:?}", other.map(|_| ())),
    }
    assert!(root.path().join("good.zip").is_file());
}

#[tokio::test]
async fn continue_policy_collects_failures_into_the_report() {
    let root = tempfile::tempdir().unwrap();
    let mut store =
        MemoryStore::with_objects(&[("bad.zip", b"x"), ("good.zip", b"y")]).with_manifest();
    store.failing.insert("bad.zip".to_string());
    let store = Arc::new(store);

    let mut config = config(root.path(), SyncMode::Manifest);
    config.scheduler.max_retries = 0;
    config.scheduler.failure_policy = FailurePolicy::Continue;
    let engine = SyncEngine::new(store, config);
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.files_downloaded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, "bad.zip");
    assert!(matches!(
        report.into_result(),
        Err(SyncError::PartialFailure { failed: 1, total: 2 })
    ));
}

#[tokio::test]
async fn local_listing_mode_only_fetches_missing_files() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("present.zip"), b"stale but present").unwrap();
    let store = Arc::new(MemoryStore::with_objects(&[
        ("present.zip", b"fresh"),
        ("missing.zip", b"fresh"),
    ]));

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::LocalListing));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.files_downloaded, 1);
    assert_eq!(store.downloads(), 1);
    assert_eq!(
        std::fs::read(root.path().join("present.zip")).unwrap(),
        b"stale but present"
    );
    assert_eq!(std::fs::read(root.path().join("missing.zip")).unwrap(), b"fresh");
}

#[tokio::test]
async fn object_digest_mode_mirrors_a_directory_store() {
    let bucket = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(bucket.path().join("pack/media")).unwrap();
    std::fs::write(bucket.path().join("pack/mod.info"), b"name=pack").unwrap();
    std::fs::write(bucket.path().join("pack/media/icon.png"), b"png").unwrap();
    let root = tempfile::tempdir().unwrap();

    let store = Arc::new(DirectoryStore::new(bucket.path()).unwrap());
    let engine = SyncEngine::new(store, config(root.path(), SyncMode::ObjectDigest));

    let first = engine.run(&SilentProgress).await.unwrap();
    assert_eq!(first.files_downloaded, 2);
    assert_eq!(
        std::fs::read(root.path().join("pack/media/icon.png")).unwrap(),
        b"png"
    );

    std::fs::write(bucket.path().join("pack/mod.info"), b"name=pack v2").unwrap();
    let second = engine.run(&SilentProgress).await.unwrap();
    assert_eq!(second.files_downloaded, 1);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(
        std::fs::read(root.path().join("pack/mod.info")).unwrap(),
        b"name=pack v2"
    );
}

#[tokio::test]
async fn ignore_patterns_exclude_matching_keys() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[("pack/notes.bak", b"x"), ("pack/mod.info", b"y")])
            .with_manifest(),
    );

    let mut config = config(root.path(), SyncMode::Manifest);
    config.ignore_patterns = vec!["**/*.bak".to_string()];
    let engine = SyncEngine::new(store.clone(), config);
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.ignored, 1);
    assert!(!root.path().join("pack/notes.bak").exists());
    assert!(root.path().join("pack/mod.info").is_file());
}

#[tokio::test]
async fn empty_bucket_is_a_noop() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());

    let engine = SyncEngine::new(store, config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.keys_listed, 0);
}

#[tokio::test]
async fn key_ending_in_part_is_not_clobbered_by_a_temp_file() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.zip"), b"stale").unwrap();
    std::fs::write(root.path().join("a.zip.part"), b"current").unwrap();
    let store = Arc::new(
        MemoryStore::with_objects(&[("a.zip", b"fresh"), ("a.zip.part", b"current")])
            .with_manifest(),
    );

    let engine = SyncEngine::new(store.clone(), config(root.path(), SyncMode::Manifest));
    let report = engine.run(&SilentProgress).await.unwrap();

    assert_eq!(report.files_downloaded, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(std::fs::read(root.path().join("a.zip")).unwrap(), b"fresh");
    assert_eq!(std::fs::read(root.path().join("a.zip.part")).unwrap(), b"current");
}
