//! Control channel messages between parent and worker.
//!
//! Messages are JSON-serialized and newline-delimited. A session is:
//! `Lookup`, `CopySettings`, one job request, `Exit`.

use crate::component::ComponentKind;
use crate::document::{WorkItem, base64_bytes};
use crate::error::JobError;
use crate::result::{Finding, JobResult, PageRaster};
use crate::settings::JobSettings;
use serde::{Deserialize, Serialize};

/// Bumped whenever a message shape changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Request from parent to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Bind the session to the worker's exported capability.
    Lookup { kind: ComponentKind, version: u32 },

    /// Replace the worker's settings with the caller's.
    CopySettings { settings: JobSettings },

    Analyze { item: WorkItem },

    Render {
        item: WorkItem,
        begin_page: u32,
        end_page: u32,
    },

    Convert { item: WorkItem },

    /// End of session.
    Exit,
}

/// Response from worker to parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Lookup accepted; names the capability the worker serves.
    Bound { kind: ComponentKind },

    /// Request without a return value completed.
    Done,

    Findings { result: JobResult<Finding> },

    Pages { result: JobResult<PageRaster> },

    Converted {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },

    /// The job failed; carries the error exactly as raised in the worker.
    Failed { error: JobError },

    /// The worker could not execute the request at all.
    Fault { message: String },
}

impl Request {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lookup { .. } => "lookup",
            Self::CopySettings { .. } => "copy_settings",
            Self::Analyze { .. } => "analyze",
            Self::Render { .. } => "render",
            Self::Convert { .. } => "convert",
            Self::Exit => "exit",
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl Response {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::keys;

    #[test]
    fn test_request_line_format() {
        let req = Request::Render {
            item: WorkItem::text("a.txt", "hello"),
            begin_page: 1,
            end_page: 1,
        };
        let line = req.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains(r#""type":"render""#));

        match Request::from_line(&line).unwrap() {
            Request::Render {
                item,
                begin_page,
                end_page,
            } => {
                assert_eq!(item.bytes, b"hello");
                assert_eq!((begin_page, end_page), (1, 1));
            }
            other => panic!("Expected Render, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_carries_kind_and_version() {
        let line = Request::Lookup {
            kind: ComponentKind::Analyzer,
            version: PROTOCOL_VERSION,
        }
        .to_line()
        .unwrap();
        assert!(line.contains(r#""kind":"analyzer""#));
        assert!(matches!(
            Request::from_line(&line).unwrap(),
            Request::Lookup {
                kind: ComponentKind::Analyzer,
                version: PROTOCOL_VERSION
            }
        ));
    }

    #[test]
    fn test_copy_settings_line() {
        let settings = JobSettings::new().with(keys::RESOLUTION, 150i64);
        let line = Request::CopySettings {
            settings: settings.clone(),
        }
        .to_line()
        .unwrap();
        match Request::from_line(&line).unwrap() {
            Request::CopySettings { settings: back } => assert_eq!(back, settings),
            other => panic!("Expected CopySettings, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_response_preserves_error() {
        let error = JobError::UnsupportedInput {
            component: "renderer".into(),
            kind: "image".into(),
        };
        let line = Response::Failed {
            error: error.clone(),
        }
        .to_line()
        .unwrap();
        match Response::from_line(&line).unwrap() {
            Response::Failed { error: back } => assert_eq!(back, error),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_converted_bytes_are_base64() {
        let line = Response::Converted {
            data: vec![0xde, 0xad],
        }
        .to_line()
        .unwrap();
        assert!(line.contains(r#""data":"3q0=""#));
    }

    #[test]
    fn test_unknown_message_is_error() {
        assert!(Request::from_line(r#"{"type":"shutdown_everything"}"#).is_err());
        assert!(Response::from_line("not json").is_err());
    }
}
