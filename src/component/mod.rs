//! Capability components.
//!
//! Each component ([`Analyzer`], [`Renderer`], [`Converter`]) is a facade over
//! the document engine. Callers share one instance across threads; every job
//! goes through the instance's [`Dispatcher`], which either runs it in-process
//! under the engine lock or hands it to a freshly launched worker process.
//! The result looks the same either way.

mod analyzer;
mod converter;
mod renderer;

pub use analyzer::Analyzer;
pub use converter::Converter;
pub use renderer::Renderer;

use crate::document::{DocumentKind, WorkItem};
use crate::engine::EngineHost;
use crate::error::{JobError, PoolError, Result};
use crate::pool::dispatch::Dispatcher;
use crate::result::{Finding, JobResult, PageRaster};
use crate::settings::{JobSettings, PoolConfig, SettingValue};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Which capability a component (or worker) exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Analyzer,
    Renderer,
    Converter,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzer => "analyzer",
            Self::Renderer => "renderer",
            Self::Converter => "converter",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "analyzer" => Ok(Self::Analyzer),
            "renderer" => Ok(Self::Renderer),
            "converter" => Ok(Self::Converter),
            other => Err(format!(
                "unknown component '{}', expected analyzer, renderer or converter",
                other
            )),
        }
    }
}

/// One job, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub enum JobCall<'a> {
    Analyze {
        item: &'a WorkItem,
    },
    Render {
        item: &'a WorkItem,
        begin_page: u32,
        end_page: u32,
    },
    Convert {
        item: &'a WorkItem,
    },
}

impl<'a> JobCall<'a> {
    pub fn item(&self) -> &'a WorkItem {
        match *self {
            Self::Analyze { item } | Self::Render { item, .. } | Self::Convert { item } => item,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyze { .. } => "analyze",
            Self::Render { .. } => "render",
            Self::Convert { .. } => "convert",
        }
    }
}

/// Output of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Findings(JobResult<Finding>),
    Pages(JobResult<PageRaster>),
    Converted(Vec<u8>),
}

impl JobOutput {
    pub fn into_findings(self) -> Result<JobResult<Finding>> {
        match self {
            Self::Findings(result) => Ok(result),
            other => Err(mismatch("findings", &other)),
        }
    }

    pub fn into_pages(self) -> Result<JobResult<PageRaster>> {
        match self {
            Self::Pages(result) => Ok(result),
            other => Err(mismatch("pages", &other)),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Converted(bytes) => Ok(bytes),
            other => Err(mismatch("converted bytes", &other)),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Findings(_) => "findings",
            Self::Pages(_) => "pages",
            Self::Converted(_) => "converted bytes",
        }
    }
}

fn mismatch(expected: &str, got: &JobOutput) -> PoolError {
    PoolError::Transport(format!("expected {}, got {}", expected, got.label()))
}

/// The contract every component exports, locally and from a worker.
pub trait Capability: Send + Sync {
    fn kind(&self) -> ComponentKind;

    /// Snapshot of the current settings.
    fn settings(&self) -> JobSettings;

    /// Replace the settings wholesale.
    fn copy_settings(&self, settings: JobSettings);

    /// Whether this component can be hosted by a worker process.
    fn supports_standalone(&self) -> bool {
        true
    }

    /// Check a call before any work is started.
    fn validate(&self, call: &JobCall<'_>) -> std::result::Result<(), JobError>;

    /// Rough size of the output `call` will produce, used to size a worker.
    /// Only meaningful for calls that passed [`Capability::validate`].
    fn expected_output_bytes(&self, call: &JobCall<'_>) -> u64 {
        call.item().size_bytes()
    }

    /// Run a call in this process.
    fn run_local(&self, call: &JobCall<'_>) -> std::result::Result<JobOutput, JobError>;

    /// Run a call wherever the component's pool decides.
    fn invoke(&self, call: &JobCall<'_>) -> Result<JobOutput>;
}

/// Default-constructed, local-only component of `kind`, as hosted by a
/// worker process.
pub fn standalone(kind: ComponentKind) -> Box<dyn Capability> {
    let config = PoolConfig::local_only();
    match kind {
        ComponentKind::Analyzer => Box::new(Analyzer::with_config(config)),
        ComponentKind::Renderer => Box::new(Renderer::with_config(config)),
        ComponentKind::Converter => Box::new(Converter::with_config(config)),
    }
}

/// State shared by the three facades.
#[derive(Debug)]
struct ComponentCore {
    settings: RwLock<JobSettings>,
    host: Arc<EngineHost>,
    dispatcher: Dispatcher,
}

impl ComponentCore {
    fn new(config: PoolConfig, host: Arc<EngineHost>) -> Self {
        Self {
            settings: RwLock::new(JobSettings::new()),
            host,
            dispatcher: Dispatcher::new(config),
        }
    }

    fn settings(&self) -> JobSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn copy_settings(&self, settings: JobSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    fn set(&self, key: &str, value: SettingValue) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value);
    }
}

fn unsupported_call(kind: ComponentKind, call: &JobCall<'_>) -> JobError {
    JobError::UnsupportedCall {
        component: kind.to_string(),
        call: call.name().to_string(),
    }
}

/// Reject document kinds the engine cannot read.
fn require_textual(kind: ComponentKind, item: &WorkItem) -> std::result::Result<(), JobError> {
    match item.kind {
        DocumentKind::Text | DocumentKind::Markdown => Ok(()),
        other => Err(JobError::UnsupportedInput {
            component: kind.to_string(),
            kind: other.to_string(),
        }),
    }
}

/// Setting value restricted to `allowed`.
fn choice(
    settings: &JobSettings,
    key: &str,
    default: &str,
    allowed: &[&str],
) -> std::result::Result<String, JobError> {
    let value = settings.text_or(key, default).to_ascii_lowercase();
    if allowed.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(JobError::invalid_setting(
            key,
            format!("'{}' is not one of {}", value, allowed.join(", ")),
        ))
    }
}

/// Integer setting restricted to `range`.
fn bounded(
    settings: &JobSettings,
    key: &str,
    default: i64,
    range: std::ops::RangeInclusive<i64>,
) -> std::result::Result<i64, JobError> {
    let value = settings.int_or(key, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(JobError::invalid_setting(
            key,
            format!("{} is outside {}..={}", value, range.start(), range.end()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::keys;

    #[test]
    fn test_kind_parse_and_display() {
        for kind in [
            ComponentKind::Analyzer,
            ComponentKind::Renderer,
            ComponentKind::Converter,
        ] {
            assert_eq!(kind.to_string().parse::<ComponentKind>().unwrap(), kind);
        }
        assert_eq!("Renderer".parse::<ComponentKind>().unwrap(), ComponentKind::Renderer);
        assert!("printer".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ComponentKind::Converter).unwrap(),
            r#""converter""#
        );
    }

    #[test]
    fn test_output_mismatch_is_transport_error() {
        let err = JobOutput::Converted(vec![1]).into_findings().unwrap_err();
        assert!(matches!(err, PoolError::Transport(_)));
        assert!(err.to_string().contains("converted bytes"));
    }

    #[test]
    fn test_standalone_is_local_only() {
        let component = standalone(ComponentKind::Renderer);
        assert_eq!(component.kind(), ComponentKind::Renderer);
        assert!(component.settings().is_empty());
        let item = WorkItem::text("a.txt", "hi");
        let pages = component
            .invoke(&JobCall::Render {
                item: &item,
                begin_page: 1,
                end_page: 1,
            })
            .unwrap()
            .into_pages()
            .unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_choice_and_bounded() {
        let settings = JobSettings::new()
            .with(keys::PAPER_SIZE, "Letter")
            .with(keys::RESOLUTION, 9000i64);
        assert_eq!(
            choice(&settings, keys::PAPER_SIZE, "a4", &["a4", "letter"]).unwrap(),
            "letter"
        );
        assert!(matches!(
            bounded(&settings, keys::RESOLUTION, 72, 18..=600),
            Err(JobError::InvalidSetting { .. })
        ));
    }
}
