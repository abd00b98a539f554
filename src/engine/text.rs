//! Built-in engine for text-like documents.
//!
//! Accepted switches:
//!
//! | Switch | Meaning |
//! |---|---|
//! | `-sDEVICE=analyze\|raster\|convert` | what to produce (required) |
//! | `-r<dpi>` | raster resolution, 18..=600 |
//! | `-sPAPERSIZE=a4\|letter\|legal` | raster page size |
//! | `-l<lang>` | document language |
//! | `-dFirstPage=<n>` / `-dLastPage=<n>` | raster page range (1-based) |
//! | `-dMaxLineWidth=<n>` | analysis line width limit |
//! | `-sOutputFormat=text\|html\|markdown` | conversion target |
//!
//! The analyze device writes one JSON [`Finding`] per line to the output
//! stream. The raster device emits one [`PageRaster`] per selected page. The
//! convert device writes the converted document.

use super::{Engine, EngineSink};
use crate::document::PAGE_BREAK;
use crate::error::JobError;
use crate::result::{Finding, PageRaster, Severity};

/// Page margin in points.
const MARGIN_PT: u32 = 36;
/// Character cell in points.
const CELL_W_PT: u32 = 6;
const CELL_H_PT: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Device {
    Analyze,
    Raster,
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Html,
    Markdown,
}

#[derive(Debug, Clone)]
struct Switches {
    device: Device,
    dpi: u32,
    paper: (u32, u32),
    language: String,
    first_page: Option<u32>,
    last_page: Option<u32>,
    max_line_width: usize,
    format: OutputFormat,
}

impl Switches {
    fn parse(args: &[String]) -> Result<Self, JobError> {
        let mut device = None;
        let mut switches = Switches {
            device: Device::Analyze,
            dpi: 72,
            paper: paper_points("a4")?,
            language: "en".to_string(),
            first_page: None,
            last_page: None,
            max_line_width: 100,
            format: OutputFormat::Text,
        };

        for arg in args {
            if let Some(v) = arg.strip_prefix("-sDEVICE=") {
                device = Some(match v {
                    "analyze" => Device::Analyze,
                    "raster" => Device::Raster,
                    "convert" => Device::Convert,
                    other => return Err(JobError::engine(format!("unknown device '{}'", other))),
                });
            } else if let Some(v) = arg.strip_prefix("-sPAPERSIZE=") {
                switches.paper = paper_points(v)?;
            } else if let Some(v) = arg.strip_prefix("-sOutputFormat=") {
                switches.format = match v {
                    "text" => OutputFormat::Text,
                    "html" => OutputFormat::Html,
                    "markdown" => OutputFormat::Markdown,
                    other => {
                        return Err(JobError::engine(format!("unknown output format '{}'", other)));
                    }
                };
            } else if let Some(v) = arg.strip_prefix("-dFirstPage=") {
                switches.first_page = Some(parse_number(arg, v)?);
            } else if let Some(v) = arg.strip_prefix("-dLastPage=") {
                switches.last_page = Some(parse_number(arg, v)?);
            } else if let Some(v) = arg.strip_prefix("-dMaxLineWidth=") {
                switches.max_line_width = parse_number(arg, v)? as usize;
            } else if let Some(v) = arg.strip_prefix("-r") {
                let dpi = parse_number(arg, v)?;
                if !(18..=600).contains(&dpi) {
                    return Err(JobError::engine(format!("resolution {} out of range", dpi)));
                }
                switches.dpi = dpi;
            } else if let Some(v) = arg.strip_prefix("-l") {
                switches.language = v.to_string();
            } else {
                return Err(JobError::engine(format!("unknown switch '{}'", arg)));
            }
        }

        switches.device = device.ok_or_else(|| JobError::engine("no -sDEVICE given"))?;
        Ok(switches)
    }
}

fn parse_number(arg: &str, value: &str) -> Result<u32, JobError> {
    value
        .parse()
        .map_err(|_| JobError::engine(format!("bad numeric switch '{}'", arg)))
}

fn paper_points(name: &str) -> Result<(u32, u32), JobError> {
    match name.to_ascii_lowercase().as_str() {
        "a4" => Ok((595, 842)),
        "letter" => Ok((612, 792)),
        "legal" => Ok((612, 1008)),
        other => Err(JobError::engine(format!("unknown paper size '{}'", other))),
    }
}

/// Pixel dimensions of one raster page.
fn page_pixels(paper: (u32, u32), dpi: u32) -> (u32, u32) {
    let scale = |pt: u32| (pt as u64 * dpi as u64 / 72) as u32;
    (scale(paper.0), scale(paper.1))
}

/// Bytes of pixel data the raster device produces per page of `paper` at
/// `dpi`.
pub fn raster_page_bytes(paper: &str, dpi: u32) -> Result<u64, JobError> {
    let (width, height) = page_pixels(paper_points(paper)?, dpi);
    Ok(width as u64 * height as u64)
}

/// Reference engine over UTF-8 text with form-feed page breaks.
#[derive(Debug, Default)]
pub struct TextEngine {
    _private: (),
}

impl TextEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for TextEngine {
    fn run(
        &mut self,
        args: &[String],
        input: &[u8],
        sink: &mut dyn EngineSink,
    ) -> Result<(), JobError> {
        let switches = Switches::parse(args)?;
        let text = std::str::from_utf8(input)
            .map_err(|e| JobError::engine(format!("input is not UTF-8: {}", e)))?;
        let pages: Vec<&str> = text.split(PAGE_BREAK).collect();

        match switches.device {
            Device::Analyze => analyze(&pages, &switches, sink),
            Device::Raster => raster(&pages, &switches, sink),
            Device::Convert => convert(&pages, &switches, sink),
        }
    }
}

fn analyze(pages: &[&str], sw: &Switches, sink: &mut dyn EngineSink) -> Result<(), JobError> {
    let mut emit = |finding: Finding| -> Result<(), JobError> {
        let mut line = serde_json::to_vec(&finding)
            .map_err(|e| JobError::engine(format!("cannot encode finding: {}", e)))?;
        line.push(b'\n');
        sink.write(&line);
        Ok(())
    };

    for (idx, page) in pages.iter().enumerate() {
        let page_no = idx as u32 + 1;
        let words = page.split_whitespace().count();

        if words == 0 {
            emit(Finding {
                page: page_no,
                line: 0,
                severity: Severity::Warning,
                code: "blank-page".into(),
                message: "page has no text".into(),
            })?;
            continue;
        }

        emit(Finding {
            page: page_no,
            line: 0,
            severity: Severity::Info,
            code: "word-count".into(),
            message: format!("{} words", words),
        })?;

        for (line_idx, line) in page.lines().enumerate() {
            let line_no = line_idx as u32 + 1;
            let width = line.chars().count();
            if width > sw.max_line_width {
                emit(Finding {
                    page: page_no,
                    line: line_no,
                    severity: Severity::Warning,
                    code: "long-line".into(),
                    message: format!("{} characters exceeds {}", width, sw.max_line_width),
                })?;
            }
            if line.ends_with([' ', '\t']) {
                emit(Finding {
                    page: page_no,
                    line: line_no,
                    severity: Severity::Info,
                    code: "trailing-whitespace".into(),
                    message: "line ends with whitespace".into(),
                })?;
            }
            if sw.language == "en" && !line.is_ascii() {
                emit(Finding {
                    page: page_no,
                    line: line_no,
                    severity: Severity::Info,
                    code: "non-ascii".into(),
                    message: "non-ASCII characters in an English document".into(),
                })?;
            }
            if line.contains('\u{fffd}') {
                emit(Finding {
                    page: page_no,
                    line: line_no,
                    severity: Severity::Error,
                    code: "replacement-char".into(),
                    message: "line contains U+FFFD from a lossy decode".into(),
                })?;
            }
        }
    }
    Ok(())
}

fn raster(pages: &[&str], sw: &Switches, sink: &mut dyn EngineSink) -> Result<(), JobError> {
    let total = pages.len() as u32;
    let first = sw.first_page.unwrap_or(1);
    let last = sw.last_page.unwrap_or(total);
    if first == 0 || first > last || last > total {
        return Err(JobError::engine(format!(
            "page range {}..={} outside 1..={}",
            first, last, total
        )));
    }

    let scale = |pt: u32| (pt as u64 * sw.dpi as u64 / 72) as u32;
    let (width, height) = page_pixels(sw.paper, sw.dpi);
    let (margin, cell_w, cell_h) = (scale(MARGIN_PT), scale(CELL_W_PT), scale(CELL_H_PT));

    for page_no in first..=last {
        let mut pixels = vec![255u8; width as usize * height as usize];
        let text = pages[(page_no - 1) as usize];

        for (row, line) in text.lines().enumerate() {
            let top = margin + row as u32 * cell_h;
            if top + cell_h > height.saturating_sub(margin) {
                break;
            }
            for (col, ch) in line.chars().enumerate() {
                let left = margin + col as u32 * cell_w;
                if left + cell_w > width.saturating_sub(margin) {
                    break;
                }
                if ch.is_whitespace() {
                    continue;
                }
                // Glyph box inset by a sixth of the cell so neighbours stay apart.
                let inset_x = (cell_w / 6).max(1);
                let inset_y = (cell_h / 6).max(1);
                for y in (top + inset_y)..(top + cell_h - inset_y) {
                    let offset = y as usize * width as usize;
                    for x in (left + inset_x)..(left + cell_w - inset_x) {
                        pixels[offset + x as usize] = 0;
                    }
                }
            }
        }

        sink.page(PageRaster {
            page: page_no,
            width,
            height,
            dpi: sw.dpi,
            pixels,
        });
    }
    Ok(())
}

fn convert(pages: &[&str], sw: &Switches, sink: &mut dyn EngineSink) -> Result<(), JobError> {
    let normalized: Vec<String> = pages.iter().map(|p| normalize_page(p)).collect();
    let out = match sw.format {
        OutputFormat::Text => normalized.join(&PAGE_BREAK.to_string()),
        OutputFormat::Markdown => normalized.join("\n\n---\n\n"),
        OutputFormat::Html => {
            let mut html = format!(
                "<!DOCTYPE html>\n<html lang=\"{}\">\n<body>\n",
                escape_html(&sw.language)
            );
            for (idx, page) in normalized.iter().enumerate() {
                html.push_str(&format!("<section class=\"page\" data-page=\"{}\">\n", idx + 1));
                for para in page.split("\n\n").filter(|p| !p.trim().is_empty()) {
                    html.push_str("<p>");
                    html.push_str(&escape_html(para.trim()).replace('\n', "<br>\n"));
                    html.push_str("</p>\n");
                }
                html.push_str("</section>\n");
            }
            html.push_str("</body>\n</html>\n");
            html
        }
    };
    sink.write(out.as_bytes());
    Ok(())
}

/// Expand tabs to four spaces, strip trailing whitespace, trim trailing blank lines.
fn normalize_page(page: &str) -> String {
    let lines: Vec<String> = page
        .lines()
        .map(|l| l.replace('\t', "    ").trim_end().to_string())
        .collect();
    let end = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map_or(0, |i| i + 1);
    lines[..end].join("\n")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
