//! Work items: the documents a job runs against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Page separator inside text-like documents (form feed).
pub const PAGE_BREAK: char = '\u{0c}';

/// The broad kind of a document, used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Text,
    Markdown,
    Image,
    Binary,
}

impl DocumentKind {
    /// Guess the kind from a file extension, falling back to content sniffing.
    pub fn detect(path: &Path, bytes: &[u8]) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("md" | "markdown") => Self::Markdown,
            Some("txt" | "text") => Self::Text,
            Some("png" | "jpg" | "jpeg" | "gif" | "pgm" | "tif" | "tiff") => Self::Image,
            _ if std::str::from_utf8(bytes).is_ok() => Self::Text,
            _ => Self::Binary,
        }
    }

    /// Whether the document body is text the engine can page through.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Markdown)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Image => "image",
            Self::Binary => "binary",
        };
        write!(f, "{}", name)
    }
}

/// Input data for one job.
///
/// The caller keeps ownership; a worker receives a serialized copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub name: String,
    pub kind: DocumentKind,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, kind: DocumentKind, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes,
        }
    }

    /// A text document built from a string.
    pub fn text(name: impl Into<String>, body: &str) -> Self {
        Self::new(name, DocumentKind::Text, body.as_bytes().to_vec())
    }

    /// Load a document from disk, detecting its kind.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let kind = DocumentKind::detect(path, &bytes);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, kind, bytes))
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Number of pages; an empty text document still has one (blank) page.
    /// Non-text documents report zero.
    pub fn page_count(&self) -> u32 {
        if !self.kind.is_textual() {
            return 0;
        }
        String::from_utf8_lossy(&self.bytes)
            .split(PAGE_BREAK)
            .count() as u32
    }
}

/// Serde adapter carrying bytes as base64 text on the JSON wire.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
