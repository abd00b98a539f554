//! Job results.

use crate::document::base64_bytes;
use serde::{Deserialize, Serialize};

/// Ordered records produced by a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult<R> {
    records: Vec<R>,
}

impl<R> JobResult<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<R> Default for JobResult<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R> IntoIterator for JobResult<R> {
    type Item = R;
    type IntoIter = std::vec::IntoIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Severity of an analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One analysis finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub page: u32,
    /// 1-based line within the page, 0 for page-level findings.
    pub line: u32,
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

/// An 8-bit grayscale page raster (0 = black, 255 = white).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRaster {
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    #[serde(with = "base64_bytes")]
    pub pixels: Vec<u8>,
}

impl PageRaster {
    /// Encode as a binary PGM (P5) image.
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }

    /// Fraction of non-white pixels.
    pub fn ink_coverage(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let inked = self.pixels.iter().filter(|&&p| p < 255).count();
        inked as f64 / self.pixels.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgm_header() {
        let raster = PageRaster {
            page: 1,
            width: 2,
            height: 1,
            dpi: 72,
            pixels: vec![0, 255],
        };
        let pgm = raster.to_pgm();
        assert!(pgm.starts_with(b"P5\n2 1\n255\n"));
        assert_eq!(&pgm[pgm.len() - 2..], &[0, 255]);
        assert!((raster.ink_coverage() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_result_keeps_order() {
        let result = JobResult::new(vec![3, 1, 2]);
        assert_eq!(result.records(), &[3, 1, 2]);
        assert_eq!(result.into_records(), vec![3, 1, 2]);
        assert!(JobResult::<u8>::default().is_empty());
    }
}
