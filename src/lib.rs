//! docpool - process-isolated worker pool for a single-instance document engine.
//!
//! The engine behind the [`component`]s can only run one job per process.
//! Each component owns a [`pool::Dispatcher`] that either runs jobs in this
//! process (one at a time, under the engine lock) or launches a sibling
//! worker process per job, bounded by the component's pool size.
//!
//! ```no_run
//! use docpool::component::Analyzer;
//! use docpool::document::WorkItem;
//! use docpool::settings::{PoolConfig, keys};
//!
//! let analyzer = Analyzer::with_config(PoolConfig::new().with_max_process_count(4));
//! analyzer.set(keys::MAX_LINE_WIDTH, 80i64);
//! let findings = analyzer.analyze(&WorkItem::text("notes.txt", "hello"))?;
//! # Ok::<(), docpool::error::PoolError>(())
//! ```

pub mod component;
pub mod document;
pub mod engine;
pub mod error;
pub mod logging;
pub mod memory;
pub mod pool;
pub mod result;
pub mod settings;

pub use component::{Analyzer, Capability, ComponentKind, Converter, Renderer};
pub use document::{DocumentKind, WorkItem};
pub use error::{JobError, PoolError, Result};
pub use result::{Finding, JobResult, PageRaster};
pub use settings::{JobSettings, PoolConfig};
