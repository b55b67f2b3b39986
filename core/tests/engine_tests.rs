mod common;

use common::{write_blank_png, write_noise_png};
use image::GrayImage;
use simcore::{Config, Descriptor, DescriptorStore, Engine, Extractor, GradientGridExtractor, SearchError};
use std::fs;
use std::sync::{mpsc, Arc, Barrier, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn corpus(root: &std::path::Path) {
    write_noise_png(&root.join("img1.png"), 1);
    write_noise_png(&root.join("nested/img2.png"), 2);
    write_blank_png(&root.join("blank.png"));
    fs::write(root.join("corrupt.jpg"), b"\xff\xd8 not really a jpeg").unwrap();
    fs::write(root.join("readme.txt"), b"ignored").unwrap();
}

#[test]
fn rebuild_indexes_only_usable_images() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();

    let report = engine.rebuild_report(&root).unwrap();
    assert_eq!(report.candidates, 4);
    assert_eq!(report.indexed, 2);
    assert_eq!(report.skipped, 2);

    let ids: Vec<String> = engine.store().load_all().map(|s| s.identity).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"img1.png".to_string()));
    assert!(ids.contains(&"nested/img2.png".to_string()));

    let meta = engine.store().meta().unwrap().unwrap();
    assert_eq!(meta.num_records, 2);
    assert_eq!(meta.dimension, 128);
}

#[test]
fn search_finds_the_same_image_first() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    engine.rebuild(&root).unwrap();

    let outcome = engine.search(&root.join("img1.png"), 5, 4).unwrap();
    assert!(outcome.query_descriptors > 0);
    assert_eq!(outcome.scanned, 2);
    assert_eq!(outcome.results[0].identity, "img1.png");
    assert_eq!(outcome.results[0].score as usize, outcome.query_descriptors);

    let again = engine.search(&root.join("img1.png"), 5, 4).unwrap();
    assert_eq!(outcome.results, again.results);
}

#[test]
fn search_bytes_matches_search_by_path() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    engine.rebuild(&root).unwrap();

    let bytes = fs::read(root.join("nested/img2.png")).unwrap();
    let by_bytes = engine.search_bytes(&bytes, 5, 4).unwrap();
    let by_path = engine.search(&root.join("nested/img2.png"), 5, 4).unwrap();
    assert_eq!(by_bytes.results, by_path.results);
    assert_eq!(by_bytes.results[0].identity, "nested/img2.png");
}

#[test]
fn rebuild_drops_records_of_removed_images() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    assert_eq!(engine.rebuild(&root).unwrap(), 2);

    fs::remove_file(root.join("nested/img2.png")).unwrap();
    assert_eq!(engine.rebuild(&root).unwrap(), 1);
    let ids: Vec<String> = engine.store().load_all().map(|s| s.identity).collect();
    assert_eq!(ids, vec!["img1.png"]);
}

#[test]
fn missing_corpus_root_keeps_existing_records() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    engine.rebuild(&root).unwrap();

    let err = engine.rebuild(&dir.path().join("gone")).unwrap_err();
    assert!(matches!(err, SearchError::CorpusRootMissing { .. }));
    assert_eq!(engine.store().record_count(), 2);
}

#[test]
fn empty_corpus_rebuilds_to_nothing_and_searches_cleanly() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("empty");
    fs::create_dir_all(&root).unwrap();
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    assert_eq!(engine.rebuild(&root).unwrap(), 0);
    assert!(engine.store().is_empty());

    let query = dir.path().join("q.png");
    write_noise_png(&query, 9);
    let outcome = engine.search(&query, 5, 4).unwrap();
    assert!(outcome.results.is_empty());
}

#[test]
fn featureless_query_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();

    let blank = dir.path().join("blank.png");
    write_blank_png(&blank);
    let err = engine.search(&blank, 5, 4).unwrap_err();
    assert!(matches!(err, SearchError::NoFeatures { .. }));

    let err = engine.search(&dir.path().join("missing.png"), 5, 4).unwrap_err();
    assert!(matches!(err, SearchError::NoFeatures { .. }));

    let err = engine.search_descriptors(&[], 5, 4).unwrap_err();
    assert!(matches!(err, SearchError::NoFeatures { .. }));
}

#[test]
fn query_dimension_must_match_store() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    engine.rebuild(&root).unwrap();
    let err = engine.search_descriptors(&[vec![0.0; 4]], 5, 4).unwrap_err();
    assert!(matches!(err, SearchError::DimensionMismatch { expected: 128, actual: 4 }));
}

#[test]
fn ensure_index_builds_once() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    let first = engine.ensure_index(&root).unwrap();
    assert_eq!(first.map(|r| r.indexed), Some(2));
    assert!(engine.ensure_index(&root).unwrap().is_none());

    let stats = engine.stats(Some(&root)).unwrap();
    assert_eq!(stats.corpus_images, Some(4));
    assert_eq!(stats.records, 2);
}

#[test]
fn open_existing_refuses_to_create_a_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("never-built");
    let err = Engine::open_existing(&path, Config::default()).err().unwrap();
    assert!(matches!(err, SearchError::StoreMissing { .. }));
    assert!(!path.exists());
}

#[test]
fn concurrent_ensure_index_builds_once() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let engine = Engine::open(dir.path().join("store"), Config::default()).unwrap();
    let barrier = Barrier::new(2);

    let built: Vec<bool> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    engine.ensure_index(&root).unwrap().is_some()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(built.iter().filter(|b| **b).count(), 1);
    assert_eq!(engine.store().record_count(), 2);
}

/// Delegates to the built-in extractor and records the size of the rayon
/// pool each call runs on.
struct PoolRecorder {
    inner: GradientGridExtractor,
    seen: Mutex<Vec<usize>>,
}

impl Extractor for PoolRecorder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn extract(&self, image: &GrayImage) -> Vec<Descriptor> {
        self.seen.lock().unwrap().push(rayon::current_num_threads());
        self.inner.extract(image)
    }
}

#[test]
fn configured_thread_count_drives_the_worker_pool() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    corpus(&root);
    let mut config = Config::default();
    config.index.threads = 3;
    let recorder = Arc::new(PoolRecorder { inner: GradientGridExtractor::default(), seen: Mutex::new(Vec::new()) });
    let store = DescriptorStore::open(dir.path().join("store")).unwrap();
    let engine = Engine::with_extractor(store, recorder.clone(), config).unwrap();
    assert_eq!(engine.threads(), 3);

    engine.rebuild(&root).unwrap();
    let seen = recorder.seen.lock().unwrap().clone();
    // blank.png and img1/img2 decode; corrupt.jpg never reaches the extractor
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|&n| n == 3), "{seen:?}");
}

/// Blocks every extraction until `open` is called, signalling once when the
/// first extraction starts.
struct Gated {
    inner: GradientGridExtractor,
    started: Mutex<Option<mpsc::Sender<()>>>,
    released: (Mutex<bool>, Condvar),
}

impl Gated {
    fn close(&self, started: mpsc::Sender<()>) {
        *self.released.0.lock().unwrap() = false;
        *self.started.lock().unwrap() = Some(started);
    }

    fn open(&self) {
        *self.released.0.lock().unwrap() = true;
        self.released.1.notify_all();
    }
}

impl Extractor for Gated {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn extract(&self, image: &GrayImage) -> Vec<Descriptor> {
        if let Some(tx) = self.started.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let (lock, cvar) = &self.released;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
        drop(open);
        self.inner.extract(image)
    }
}

#[test]
fn search_during_rebuild_waits_for_the_new_index() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    write_noise_png(&root.join("img1.png"), 1);
    let gated = Arc::new(Gated {
        inner: GradientGridExtractor::default(),
        started: Mutex::new(None),
        released: (Mutex::new(true), Condvar::new()),
    });
    let store = DescriptorStore::open(dir.path().join("store")).unwrap();
    let engine = Engine::with_extractor(store, gated.clone(), Config::default()).unwrap();
    assert_eq!(engine.rebuild(&root).unwrap(), 1);

    write_noise_png(&root.join("img2.png"), 2);
    let (tx, rx) = mpsc::channel();
    gated.close(tx);

    let outcome = thread::scope(|s| {
        let rebuild = s.spawn(|| engine.rebuild(&root));
        rx.recv().unwrap();
        // the store has been cleared and the rebuild is parked inside extraction
        let search = s.spawn(|| engine.search_descriptors(&[vec![0.0; 128]], 5, 0));
        thread::sleep(Duration::from_millis(100));
        let waited = !search.is_finished();
        gated.open();
        assert!(waited, "search ran while the rebuild held the store");
        assert_eq!(rebuild.join().unwrap().unwrap(), 2);
        search.join().unwrap().unwrap()
    });
    assert_eq!(outcome.scanned, 2);
    assert_eq!(outcome.skipped, 0);
}
