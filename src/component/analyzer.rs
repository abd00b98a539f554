//! Document analysis.

use super::{
    Capability, ComponentCore, ComponentKind, JobCall, JobOutput, bounded, require_textual,
    unsupported_call,
};
use crate::document::WorkItem;
use crate::engine::{CollectSink, EngineHost};
use crate::error::{JobError, Result};
use crate::pool::dispatch::Dispatcher;
use crate::result::{Finding, JobResult};
use crate::settings::{JobSettings, PoolConfig, SettingValue, keys};
use std::sync::Arc;

/// Produces [`Finding`]s for a document.
///
/// Honors `language` and `max_line_width`.
#[derive(Debug)]
pub struct Analyzer {
    core: ComponentCore,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_host(config, EngineHost::shared())
    }

    /// Use a specific engine host for in-process runs.
    pub fn with_host(config: PoolConfig, host: Arc<EngineHost>) -> Self {
        Self {
            core: ComponentCore::new(config, host),
        }
    }

    pub fn set(&self, key: &str, value: impl Into<SettingValue>) {
        self.core.set(key, value.into());
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.core.dispatcher
    }

    /// Analyze `item`.
    pub fn analyze(&self, item: &WorkItem) -> Result<JobResult<Finding>> {
        self.invoke(&JobCall::Analyze { item })?.into_findings()
    }

    fn engine_args(&self, settings: &JobSettings) -> std::result::Result<Vec<String>, JobError> {
        let language = settings.text_or(keys::LANGUAGE, "en");
        let width = bounded(settings, keys::MAX_LINE_WIDTH, 100, 1..=100_000)?;
        Ok(vec![
            "-sDEVICE=analyze".to_string(),
            format!("-l{}", language),
            format!("-dMaxLineWidth={}", width),
        ])
    }
}

impl Capability for Analyzer {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Analyzer
    }

    fn settings(&self) -> JobSettings {
        self.core.settings()
    }

    fn copy_settings(&self, settings: JobSettings) {
        self.core.copy_settings(settings);
    }

    fn validate(&self, call: &JobCall<'_>) -> std::result::Result<(), JobError> {
        let JobCall::Analyze { item } = *call else {
            return Err(unsupported_call(self.kind(), call));
        };
        require_textual(self.kind(), item)?;
        self.engine_args(&self.core.settings()).map(|_| ())
    }

    fn run_local(&self, call: &JobCall<'_>) -> std::result::Result<JobOutput, JobError> {
        self.validate(call)?;
        let args = self.engine_args(&self.core.settings())?;

        let mut sink = CollectSink::default();
        self.core.host.run(&args, &call.item().bytes, &mut sink)?;

        let text = String::from_utf8_lossy(&sink.bytes);
        let findings = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<Finding>(line)
                    .map_err(|e| JobError::engine(format!("unreadable finding: {}", e)))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(JobOutput::Findings(JobResult::new(findings)))
    }

    fn invoke(&self, call: &JobCall<'_>) -> Result<JobOutput> {
        self.core.dispatcher.dispatch(self, call)
    }
}
