//! Protocol identifiers: `{PREFIX}-{YEAR}-{NNNNNN}`.
//!
//! The sequence is fixed-width, so the lexicographic maximum of a series is
//! also its numeric maximum. Persistence backends rely on that to find the
//! last issued protocol with a plain `ORDER BY protocol DESC`.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Width of the zero-padded sequence component.
pub const SEQUENCE_WIDTH: usize = 6;

const MAX_SEQUENCE: u32 = 999_999;

/// One protocol series, identified by prefix and year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSeries {
    prefix: String,
    year: i32,
}

impl ProtocolSeries {
    pub fn new(prefix: impl Into<String>, year: i32) -> Result<Self, ProtocolError> {
        let prefix = prefix.into().trim().to_ascii_uppercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ProtocolError::InvalidPrefix(prefix));
        }
        Ok(Self { prefix, year })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// The shared leading part of every protocol in this series, e.g. `DF-2026-`.
    pub fn series_prefix(&self) -> String {
        format!("{}-{}-", self.prefix, self.year)
    }

    pub fn format(&self, sequence: u32) -> Result<String, ProtocolError> {
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(ProtocolError::SequenceExhausted(sequence));
        }
        Ok(format!(
            "{}{:0width$}",
            self.series_prefix(),
            sequence,
            width = SEQUENCE_WIDTH
        ))
    }

    /// Parse the trailing sequence of a protocol belonging to this series.
    pub fn sequence_of(&self, protocol: &str) -> Option<u32> {
        protocol
            .strip_prefix(&self.series_prefix())
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
    }

    /// Compute the protocol that follows `last`, the maximal protocol already
    /// issued in this series. Starts at 1 when nothing was issued or the last
    /// value cannot be parsed.
    pub fn next_after(&self, last: Option<&str>) -> Result<String, ProtocolError> {
        let next = match last.and_then(|p| self.sequence_of(p)) {
            Some(n) => n
                .checked_add(1)
                .ok_or(ProtocolError::SequenceExhausted(n))?,
            None => 1,
        };
        self.format(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> ProtocolSeries {
        ProtocolSeries::new("DF", 2026).unwrap()
    }

    #[test]
    fn test_first_protocol() {
        assert_eq!(series().next_after(None).unwrap(), "DF-2026-000001");
    }

    #[test]
    fn test_increment() {
        assert_eq!(
            series().next_after(Some("DF-2026-000041")).unwrap(),
            "DF-2026-000042"
        );
    }

    #[test]
    fn test_unparseable_last_restarts_at_one() {
        assert_eq!(
            series().next_after(Some("DF-2026-abc")).unwrap(),
            "DF-2026-000001"
        );
        assert_eq!(
            series().next_after(Some("XX-2026-000009")).unwrap(),
            "DF-2026-000001"
        );
    }

    #[test]
    fn test_lexicographic_order_matches_numeric() {
        let s = series();
        let mut issued: Vec<String> = [9, 10, 100, 2].iter().map(|n| s.format(*n).unwrap()).collect();
        issued.sort();
        assert_eq!(issued.last().map(String::as_str), Some("DF-2026-000100"));
    }

    #[test]
    fn test_prefix_validation() {
        assert!(ProtocolSeries::new("", 2026).is_err());
        assert!(ProtocolSeries::new("D-F", 2026).is_err());
        assert_eq!(ProtocolSeries::new(" df ", 2026).unwrap().prefix(), "DF");
    }

    #[test]
    fn test_sequence_exhausted() {
        assert_eq!(
            series().next_after(Some("DF-2026-999999")),
            Err(ProtocolError::SequenceExhausted(1_000_000))
        );
        // Rows written outside the service may carry wider sequences
        assert_eq!(
            series().next_after(Some("DF-2026-4294967295")),
            Err(ProtocolError::SequenceExhausted(u32::MAX))
        );
    }
}
