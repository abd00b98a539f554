//! The document engine boundary.
//!
//! An [`Engine`] is the native collaborator this crate coordinates: it takes a
//! flat list of command-line style switches, consumes the input bytes and
//! emits either an output byte stream or a sequence of page rasters. Engines
//! are not reentrant and behave like process-wide singletons, so every
//! in-process use goes through an [`EngineHost`].
//!
//! # Lifecycle
//!
//! The host creates a fresh engine for each job, runs it, and drops it before
//! releasing its lock. Nothing survives between jobs, which mirrors how a
//! worker process hosts exactly one engine for exactly one job.

pub mod text;

use crate::error::JobError;
use crate::result::PageRaster;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

pub use text::TextEngine;

/// Receives engine output.
pub trait EngineSink {
    /// Append bytes to the output stream.
    fn write(&mut self, bytes: &[u8]);

    /// Deliver a rendered page. Engines that never rasterize need not be
    /// paired with a sink that handles this.
    fn page(&mut self, raster: PageRaster);
}

/// A single-use document engine.
pub trait Engine {
    fn run(
        &mut self,
        args: &[String],
        input: &[u8],
        sink: &mut dyn EngineSink,
    ) -> Result<(), JobError>;
}

/// Sink that collects everything in memory.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub bytes: Vec<u8>,
    pub pages: Vec<PageRaster>,
}

impl EngineSink for CollectSink {
    fn write(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn page(&mut self, raster: PageRaster) {
        self.pages.push(raster);
    }
}

type EngineFactory = Box<dyn Fn() -> Result<Box<dyn Engine>, JobError> + Send + Sync>;

/// Owner of the in-process engine.
///
/// All local callers serialize on the host's mutex.
pub struct EngineHost {
    lock: Mutex<()>,
    factory: EngineFactory,
    runs: AtomicUsize,
}

impl EngineHost {
    /// Host an engine built by `factory` for every run.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Engine>, JobError> + Send + Sync + 'static,
    {
        Self {
            lock: Mutex::new(()),
            factory: Box::new(factory),
            runs: AtomicUsize::new(0),
        }
    }

    /// Host for the built-in [`TextEngine`].
    pub fn text() -> Self {
        Self::new(|| Ok(Box::new(TextEngine::new()) as Box<dyn Engine>))
    }

    /// The process's shared text engine host.
    ///
    /// Components built with `Default` use this so that every local caller in
    /// the process contends on the same lock.
    pub fn shared() -> Arc<EngineHost> {
        static SHARED: OnceLock<Arc<EngineHost>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(EngineHost::text())).clone()
    }

    /// Create an engine, run one job on it, and tear it down.
    pub fn run(
        &self,
        args: &[String],
        input: &[u8],
        sink: &mut dyn EngineSink,
    ) -> Result<(), JobError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut engine = (self.factory)()?;
        tracing::trace!(args = ?args, input_bytes = input.len(), "Engine run");
        let result = engine.run(args, input, sink);
        drop(engine);
        self.runs.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Number of completed engine runs.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("runs", &self.runs())
            .finish_non_exhaustive()
    }
}
