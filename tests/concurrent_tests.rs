use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use driftmq::settings::HierarchicalRepository;
use driftmq::{FsSequentialFileFactory, SequentialFileFactory};
use tempfile::tempdir;

#[test]
fn test_concurrent_readers_with_interleaved_writer() {
    let repo: Arc<HierarchicalRepository<u64>> = Arc::new(HierarchicalRepository::new());
    repo.set_default(0);
    repo.add_match("queues.#", 1).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let num_readers = 8;

    let mut readers = Vec::new();
    for reader_id in 0..num_readers {
        let repo = Arc::clone(&repo);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            let key = format!("queues.orders.{}", reader_id);
            let mut reads = 0u64;
            while !stop.load(Ordering::Relaxed) {
                // Every observable value must come from some prefix of the
                // writer's history: the broad match, an exact override, or
                // the default once the broad match is removed.
                let value = repo.get_match(&key).expect("default always present");
                assert!(value <= 3, "impossible value {}", value);
                reads += 1;
            }
            reads
        }));
    }

    // Writer interleaves adds and removes of patterns the readers resolve.
    for round in 0..200 {
        repo.add_match("queues.orders.*", 2).unwrap();
        if round % 3 == 0 {
            repo.add_match("queues.orders.1", 3).unwrap();
            repo.remove_match("queues.orders.1");
        }
        repo.remove_match("queues.orders.*");
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        let reads = reader.join().expect("reader panicked");
        assert!(reads > 0);
    }

    // The final state is the broad match alone.
    assert_eq!(repo.get_match("queues.orders.0"), Some(1));
}

#[test]
fn test_get_after_add_observes_the_mutation() {
    let repo: Arc<HierarchicalRepository<u64>> = Arc::new(HierarchicalRepository::new());

    for i in 0..100 {
        let pattern = format!("queues.q{}", i);
        repo.add_match(&pattern, i).unwrap();
        assert_eq!(repo.get_match(&pattern), Some(i));
        repo.remove_match(&pattern);
        assert_eq!(repo.get_match(&pattern), None);
    }
}

#[test]
fn test_multithreaded_journal_writes_all_land() {
    let dir = tempdir().unwrap();
    let factory = Arc::new(FsSequentialFileFactory::new(
        dir.path(),
        false,
        64 * 1024,
        Duration::from_millis(5),
        false,
        None,
    ));
    factory.create_dirs().unwrap();
    factory.start();

    let num_writers = 4;
    let writes_per_thread = 250;
    let record = b"0123456789abcdef";

    let mut writers = Vec::new();
    for writer_id in 0..num_writers {
        let factory = Arc::clone(&factory);
        writers.push(thread::spawn(move || {
            let file = factory.create_sequential_file(&format!("writer-{}.dmq", writer_id));
            file.open().unwrap();
            for _ in 0..writes_per_thread {
                file.write(Bytes::from_static(record), false, None);
            }
        }));
    }
    for writer in writers {
        writer.join().expect("writer panicked");
    }
    factory.stop();

    let mut names = factory.list_files("dmq").unwrap();
    names.sort();
    assert_eq!(names.len(), num_writers);
    for name in names {
        let len = std::fs::metadata(dir.path().join(&name)).unwrap().len();
        assert_eq!(len, (record.len() * writes_per_thread) as u64);
    }
}
