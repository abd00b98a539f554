//! Admission ordering with more jobs than worker slots.
//!
//! Workers start through a wrapper that sleeps before running the real
//! `docpool` worker, so every job takes at least that long. Kept in its own
//! test binary for the same reason as the readiness test: the wrapper is a
//! freshly written script.

use docpool::component::Converter;
use docpool::document::WorkItem;
use docpool::settings::PoolConfig;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

const WORKER_DELAY: Duration = Duration::from_millis(400);

#[test]
fn test_third_job_waits_for_a_finished_worker() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("slow-worker");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\nsleep {:.1}\nexec '{}' \"$@\"\n",
            WORKER_DELAY.as_secs_f64(),
            env!("CARGO_BIN_EXE_docpool")
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let converter = Converter::with_config(
        PoolConfig::new()
            .with_max_process_count(2)
            .with_program(&script)
            .with_ready_timeout(Duration::from_secs(20)),
    );
    let item = WorkItem::text("a.txt", "same\u{0c}input");

    let start = Instant::now();
    let mut finished: Vec<Duration> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| {
                    converter.convert(&item).unwrap();
                    start.elapsed()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    finished.sort();

    // The last job could only launch once a slot was freed, and a slot is
    // freed only when its job has returned; it then needs a full delay of
    // its own.
    let margin = WORKER_DELAY - Duration::from_millis(100);
    assert!(
        finished[2] >= finished[0] + margin,
        "jobs finished at {:?}",
        finished
    );
    assert!(finished[0] >= WORKER_DELAY);

    let stats = converter.dispatcher().stats();
    assert_eq!(stats.launches, 3);
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.peak_workers, 2);
}
