//! End-to-end tests of the worker pool through the library API.
//!
//! Remote jobs run in the built `docpool` binary, launched through its
//! hidden `internal-worker` command.

use docpool::component::{Analyzer, Capability, Converter, Renderer};
use docpool::document::{DocumentKind, WorkItem};
use docpool::error::{JobError, PoolError};
use docpool::memory::{MAX_JOB_OUTPUT, MemorySize};
use docpool::settings::{JobSettings, PoolConfig, keys};
use std::time::Duration;

const SAMPLE: &str = "Quarterly report\n\nRevenue grew   \n\u{0c}\u{0c}A line that is definitely longer than twenty characters\n";

fn workers(max: usize) -> PoolConfig {
    PoolConfig::new()
        .with_max_process_count(max)
        .with_program(env!("CARGO_BIN_EXE_docpool"))
        .with_ready_timeout(Duration::from_secs(20))
}

#[test]
fn test_remote_analysis_matches_local() {
    let item = WorkItem::text("report.txt", SAMPLE);
    let settings = JobSettings::new().with(keys::MAX_LINE_WIDTH, 20i64);

    let local = Analyzer::with_config(PoolConfig::local_only());
    local.copy_settings(settings.clone());
    let remote = Analyzer::with_config(workers(1));
    remote.copy_settings(settings);

    let expected = local.analyze(&item).unwrap();
    let actual = remote.analyze(&item).unwrap();
    assert_eq!(actual, expected);
    assert!(actual.records().iter().any(|f| f.code == "long-line"));
    assert!(actual.records().iter().any(|f| f.code == "blank-page"));

    let stats = remote.dispatcher().stats();
    assert_eq!(stats.launches, 1);
    assert_eq!(stats.live_workers, 0);
}

#[test]
fn test_settings_reach_the_worker() {
    let item = WorkItem::text("page.txt", "hello\u{0c}world");
    let settings = JobSettings::new()
        .with(keys::RESOLUTION, 36i64)
        .with(keys::PAPER_SIZE, "letter");

    let local = Renderer::with_config(PoolConfig::local_only());
    local.copy_settings(settings.clone());
    let remote = Renderer::with_config(workers(1));
    remote.copy_settings(settings.clone());

    let expected = local.render(&item, 1, 2).unwrap();
    let actual = remote.render(&item, 1, 2).unwrap();
    assert_eq!(actual, expected);
    assert_eq!(actual.records()[0].dpi, 36);
    assert_eq!(actual.records()[0].width, 306);

    // The caller's settings are untouched by the copy.
    assert_eq!(remote.settings(), settings);
}

#[test]
fn test_high_resolution_render_matches_local() {
    // Eight letter pages at 300 dpi: 2550 x 3300 pixels each, far more than
    // the input size alone would reserve for the worker.
    let item = WorkItem::text("deck.txt", &("page\u{0c}".repeat(7) + "page"));
    let settings = JobSettings::new()
        .with(keys::RESOLUTION, 300i64)
        .with(keys::PAPER_SIZE, "letter");

    let local = Renderer::with_config(PoolConfig::local_only());
    local.copy_settings(settings.clone());
    let remote = Renderer::with_config(
        workers(1).with_memory_base(MemorySize::from_mib(128)),
    );
    remote.copy_settings(settings);

    let expected = local.render(&item, 1, 8).unwrap();
    let actual = remote.render(&item, 1, 8).unwrap();
    assert_eq!(actual.len(), 8);
    assert_eq!((actual.records()[0].width, actual.records()[0].height), (2550, 3300));
    assert_eq!(actual, expected);
}

#[test]
fn test_oversized_render_rejected_before_launch() {
    let renderer = Renderer::with_config(workers(1));
    renderer.copy_settings(
        JobSettings::new()
            .with(keys::RESOLUTION, 600i64)
            .with(keys::PAPER_SIZE, "legal"),
    );
    let item = WorkItem::text("huge.txt", &("x\u{0c}".repeat(59) + "x"));

    let err = renderer.render(&item, 1, 60).unwrap_err();
    assert!(matches!(
        err.as_job(),
        Some(JobError::OutputTooLarge { limit, .. }) if *limit == MAX_JOB_OUTPUT.as_bytes()
    ));
    assert_eq!(renderer.dispatcher().stats().launches, 0);
}

#[test]
fn test_three_calls_with_two_slots() {
    let converter = Converter::with_config(workers(2));
    converter.copy_settings(JobSettings::new().with(keys::OUTPUT_FORMAT, "markdown"));
    let item = WorkItem::text("notes.md", "# One\u{0c}# Two");

    let outputs: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| scope.spawn(|| converter.convert(&item)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect()
    });

    assert_eq!(outputs.len(), 3);
    for output in &outputs {
        assert_eq!(output, b"# One\n\n---\n\n# Two");
    }

    let stats = converter.dispatcher().stats();
    assert_eq!(stats.launches, 3);
    assert_eq!(stats.completed, 3);
    assert!(stats.peak_workers <= 2);
    assert_eq!(stats.live_workers, 0);
}

#[test]
fn test_unsupported_input_launches_nothing() {
    let renderer = Renderer::with_config(workers(2));
    let image = WorkItem::new("scan.png", DocumentKind::Image, vec![0x89, b'P', b'N', b'G']);

    let err = renderer.render(&image, 1, 1).unwrap_err();
    assert!(matches!(
        err.as_job(),
        Some(JobError::UnsupportedInput { component, kind }) if component == "renderer" && kind == "image"
    ));
    assert_eq!(renderer.dispatcher().stats().launches, 0);
}

#[test]
fn test_worker_error_is_raised_unchanged() {
    // Valid text kind, invalid UTF-8: passes validation, fails in the engine.
    let item = WorkItem::new("broken.txt", DocumentKind::Text, vec![b'o', b'k', 0xff, 0xfe]);

    let local_err = Converter::with_config(PoolConfig::local_only())
        .convert(&item)
        .unwrap_err();
    let remote = Converter::with_config(workers(1));
    let remote_err = remote.convert(&item).unwrap_err();

    assert!(matches!(remote_err, PoolError::Job(JobError::Engine { .. })));
    assert_eq!(remote_err.as_job(), local_err.as_job());
    assert_eq!(remote.dispatcher().stats().launches, 1);
    assert_eq!(remote.dispatcher().stats().failed, 1);
}

#[test]
fn test_page_range_checked_before_launch() {
    let renderer = Renderer::with_config(workers(1));
    let item = WorkItem::text("two.txt", "a\u{0c}b");
    let err = renderer.render(&item, 2, 5).unwrap_err();
    assert_eq!(
        err.as_job(),
        Some(&JobError::InvalidPageRange {
            begin: 2,
            end: 5,
            pages: 2
        })
    );
    assert_eq!(renderer.dispatcher().stats().launches, 0);
}
