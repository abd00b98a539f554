//! Format conversion.

use super::{
    Capability, ComponentCore, ComponentKind, JobCall, JobOutput, choice, require_textual,
    unsupported_call,
};
use crate::document::WorkItem;
use crate::engine::{CollectSink, EngineHost};
use crate::error::{JobError, Result};
use crate::pool::dispatch::Dispatcher;
use crate::settings::{JobSettings, PoolConfig, SettingValue, keys};
use std::sync::Arc;

const OUTPUT_FORMATS: &[&str] = &["text", "html", "markdown"];

/// Converts a document to `output_format`.
#[derive(Debug)]
pub struct Converter {
    core: ComponentCore,
}

impl Default for Converter {
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_host(config, EngineHost::shared())
    }

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

    pub fn convert(&self, item: &WorkItem) -> Result<Vec<u8>> {
        self.invoke(&JobCall::Convert { item })?.into_bytes()
    }

    fn engine_args(&self, settings: &JobSettings) -> std::result::Result<Vec<String>, JobError> {
        let format = choice(settings, keys::OUTPUT_FORMAT, "text", OUTPUT_FORMATS)?;
        let language = settings.text_or(keys::LANGUAGE, "en");
        Ok(vec![
            "-sDEVICE=convert".to_string(),
            format!("-sOutputFormat={}", format),
            format!("-l{}", language),
        ])
    }
}

impl Capability for Converter {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Converter
    }

    fn settings(&self) -> JobSettings {
        self.core.settings()
    }

    fn copy_settings(&self, settings: JobSettings) {
        self.core.copy_settings(settings);
    }

    fn validate(&self, call: &JobCall<'_>) -> std::result::Result<(), JobError> {
        let JobCall::Convert { item } = *call else {
            return Err(unsupported_call(self.kind(), call));
        };
        require_textual(self.kind(), item)?;
        self.engine_args(&self.core.settings()).map(|_| ())
    }

    /// Escaping can turn one input byte into six output bytes.
    fn expected_output_bytes(&self, call: &JobCall<'_>) -> u64 {
        call.item().size_bytes().saturating_mul(6)
    }

    fn run_local(&self, call: &JobCall<'_>) -> std::result::Result<JobOutput, JobError> {
        self.validate(call)?;
        let args = self.engine_args(&self.core.settings())?;

        let mut sink = CollectSink::default();
        self.core.host.run(&args, &call.item().bytes, &mut sink)?;
        Ok(JobOutput::Converted(sink.bytes))
    }

    fn invoke(&self, call: &JobCall<'_>) -> Result<JobOutput> {
        self.core.dispatcher.dispatch(self, call)
    }
}
