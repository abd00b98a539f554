//! Memory sizes and the worker memory ceiling policy.
//!
//! Engines hold the whole input and output in memory, so a worker's ceiling
//! grows with the job: a fixed base allowance, one MiB per started MiB of
//! input, and room for twice the expected output (the output itself plus its
//! encoded form while it is written to the control channel).

use std::fmt;
use std::str::FromStr;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Memory size in bytes with parsing and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemorySize(u64);

impl MemorySize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * MIB)
    }

    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Size in MiB, truncated.
    pub const fn as_mib(&self) -> u64 {
        self.0 / MIB
    }

    /// Size in whole MiB, rounded up.
    pub const fn as_mib_ceil(&self) -> u64 {
        self.0.div_ceil(MIB)
    }
}

/// Default base allowance for a worker process.
pub const DEFAULT_WORKER_BASE: MemorySize = MemorySize::from_mib(1024);

/// Largest output a single job may produce, in bytes.
pub const MAX_JOB_OUTPUT: MemorySize = MemorySize::from_mib(2048);

/// Output bytes reserved per expected output byte.
const OUTPUT_RESERVE_FACTOR: u64 = 2;

/// Compute a worker's memory ceiling in MiB for a job reading `input_bytes`
/// and expected to produce `output_bytes`.
///
/// `base + ceil(input_bytes / 1 MiB) + ceil(2 * output_bytes / 1 MiB)`.
pub fn worker_ceiling_mib(base: MemorySize, input_bytes: u64, output_bytes: u64) -> u64 {
    let reserve = output_bytes.saturating_mul(OUTPUT_RESERVE_FACTOR);
    base.as_mib()
        + MemorySize::from_bytes(input_bytes).as_mib_ceil()
        + MemorySize::from_bytes(reserve).as_mib_ceil()
}

/// Errors that can occur when parsing a memory size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryParseError(String);

impl fmt::Display for MemoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid memory size: {}", self.0)
    }
}

impl std::error::Error for MemoryParseError {}

impl FromStr for MemorySize {
    type Err = MemoryParseError;

    /// Parse "512", "512M", "1.5G", "2GiB". A bare number is MiB.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemoryParseError("empty string".into()));
        }

        let num_end = s
            .chars()
            .position(|c| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        if num_end == 0 {
            return Err(MemoryParseError(format!("no numeric value in '{}'", s)));
        }

        let (num_str, suffix) = s.split_at(num_end);
        let value: f64 = num_str
            .parse()
            .map_err(|_| MemoryParseError(format!("invalid number: '{}'", num_str)))?;

        let multiplier = match suffix.trim().to_lowercase().as_str() {
            "" | "m" | "mb" | "mib" => MIB,
            "b" => 1,
            "k" | "kb" | "kib" => 1024,
            "g" | "gb" | "gib" => GIB,
            other => {
                return Err(MemoryParseError(format!("unknown suffix: '{}'", other)));
            }
        };

        Ok(MemorySize((value * multiplier as f64) as u64))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= GIB {
            let gib = self.0 as f64 / GIB as f64;
            if gib.fract() < 0.01 {
                write!(f, "{} GiB", self.0 / GIB)
            } else {
                write!(f, "{:.1} GiB", gib)
            }
        } else if self.as_mib() > 0 {
            write!(f, "{} MiB", self.as_mib())
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_rounds_input_up() {
        let base = MemorySize::from_mib(1024);
        assert_eq!(worker_ceiling_mib(base, 0, 0), 1024);
        assert_eq!(worker_ceiling_mib(base, 1, 0), 1025);
        assert_eq!(worker_ceiling_mib(base, MIB, 0), 1025);
        assert_eq!(worker_ceiling_mib(base, MIB + 1, 0), 1026);
        assert_eq!(worker_ceiling_mib(base, 300 * MIB, 0), 1324);
    }

    #[test]
    fn test_ceiling_reserves_twice_the_output() {
        let base = MemorySize::from_mib(64);
        assert_eq!(worker_ceiling_mib(base, 23, MIB), 64 + 1 + 2);
        assert_eq!(worker_ceiling_mib(base, 23, 1), 64 + 1 + 1);
        // 12 legal pages at 600 dpi.
        let pages = 12 * 5100 * 8400;
        assert!(worker_ceiling_mib(base, 23, pages) * MIB > 2 * pages);
        assert_eq!(worker_ceiling_mib(base, 0, u64::MAX), 64 + u64::MAX / MIB + 1);
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!("512".parse::<MemorySize>().unwrap().as_mib(), 512);
        assert_eq!("512M".parse::<MemorySize>().unwrap().as_mib(), 512);
        assert_eq!("1.5G".parse::<MemorySize>().unwrap().as_mib(), 1536);
        assert_eq!("2GiB".parse::<MemorySize>().unwrap().as_mib(), 2048);
        assert_eq!("4096b".parse::<MemorySize>().unwrap().as_bytes(), 4096);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<MemorySize>().is_err());
        assert!("lots".parse::<MemorySize>().is_err());
        assert!("12X".parse::<MemorySize>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(MemorySize::from_mib(2048).to_string(), "2 GiB");
        assert_eq!(MemorySize::from_mib(512).to_string(), "512 MiB");
        assert_eq!(MemorySize::from_mib(1536).to_string(), "1.5 GiB");
        assert_eq!(MemorySize::from_bytes(10).to_string(), "10 bytes");
    }
}
