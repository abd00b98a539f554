//! Page rendering.

use super::{
    Capability, ComponentCore, ComponentKind, JobCall, JobOutput, bounded, choice, require_textual,
    unsupported_call,
};
use crate::document::WorkItem;
use crate::engine::text::raster_page_bytes;
use crate::engine::{CollectSink, EngineHost};
use crate::error::{JobError, Result};
use crate::memory::MAX_JOB_OUTPUT;
use crate::pool::dispatch::Dispatcher;
use crate::result::{JobResult, PageRaster};
use crate::settings::{JobSettings, PoolConfig, SettingValue, keys};
use std::sync::Arc;

const PAPER_SIZES: &[&str] = &["a4", "letter", "legal"];

/// Rasterizes a page range of a document.
///
/// Honors `resolution` (dpi) and `paper_size`.
#[derive(Debug)]
pub struct Renderer {
    core: ComponentCore,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl Renderer {
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

    /// Render pages `begin_page..=end_page` (1-based) of `item`.
    pub fn render(
        &self,
        item: &WorkItem,
        begin_page: u32,
        end_page: u32,
    ) -> Result<JobResult<PageRaster>> {
        self.invoke(&JobCall::Render {
            item,
            begin_page,
            end_page,
        })?
        .into_pages()
    }

    fn engine_args(
        &self,
        settings: &JobSettings,
        begin_page: u32,
        end_page: u32,
    ) -> std::result::Result<Vec<String>, JobError> {
        let dpi = bounded(settings, keys::RESOLUTION, 72, 18..=600)?;
        let paper = choice(settings, keys::PAPER_SIZE, "a4", PAPER_SIZES)?;
        Ok(vec![
            "-sDEVICE=raster".to_string(),
            format!("-r{}", dpi),
            format!("-sPAPERSIZE={}", paper),
            format!("-dFirstPage={}", begin_page),
            format!("-dLastPage={}", end_page),
        ])
    }

    /// Pixel bytes a render of `begin_page..=end_page` produces.
    fn raster_bytes(
        &self,
        settings: &JobSettings,
        begin_page: u32,
        end_page: u32,
    ) -> std::result::Result<u64, JobError> {
        let dpi = bounded(settings, keys::RESOLUTION, 72, 18..=600)?;
        let paper = choice(settings, keys::PAPER_SIZE, "a4", PAPER_SIZES)?;
        let per_page = raster_page_bytes(&paper, dpi as u32)?;
        let pages = u64::from(end_page.saturating_sub(begin_page)) + 1;
        Ok(per_page.saturating_mul(pages))
    }
}

impl Capability for Renderer {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Renderer
    }

    fn settings(&self) -> JobSettings {
        self.core.settings()
    }

    fn copy_settings(&self, settings: JobSettings) {
        self.core.copy_settings(settings);
    }

    fn validate(&self, call: &JobCall<'_>) -> std::result::Result<(), JobError> {
        let JobCall::Render {
            item,
            begin_page,
            end_page,
        } = *call
        else {
            return Err(unsupported_call(self.kind(), call));
        };
        require_textual(self.kind(), item)?;

        let pages = item.page_count();
        if begin_page < 1 || begin_page > end_page || end_page > pages {
            return Err(JobError::InvalidPageRange {
                begin: begin_page,
                end: end_page,
                pages,
            });
        }
        let settings = self.core.settings();
        self.engine_args(&settings, begin_page, end_page)?;

        let bytes = self.raster_bytes(&settings, begin_page, end_page)?;
        if bytes > MAX_JOB_OUTPUT.as_bytes() {
            return Err(JobError::OutputTooLarge {
                bytes,
                limit: MAX_JOB_OUTPUT.as_bytes(),
            });
        }
        Ok(())
    }

    fn expected_output_bytes(&self, call: &JobCall<'_>) -> u64 {
        match *call {
            JobCall::Render {
                begin_page,
                end_page,
                ..
            } => self
                .raster_bytes(&self.core.settings(), begin_page, end_page)
                .unwrap_or(0),
            _ => 0,
        }
    }

    fn run_local(&self, call: &JobCall<'_>) -> std::result::Result<JobOutput, JobError> {
        self.validate(call)?;
        let JobCall::Render {
            item,
            begin_page,
            end_page,
        } = *call
        else {
            return Err(unsupported_call(self.kind(), call));
        };
        let args = self.engine_args(&self.core.settings(), begin_page, end_page)?;

        let mut sink = CollectSink::default();
        self.core.host.run(&args, &item.bytes, &mut sink)?;
        Ok(JobOutput::Pages(JobResult::new(sink.pages)))
    }

    fn invoke(&self, call: &JobCall<'_>) -> Result<JobOutput> {
        self.core.dispatcher.dispatch(self, call)
    }
}
