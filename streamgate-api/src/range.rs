//! Single byte-range parsing for the `Range` request header
//!
//! Anything that is not a satisfiable single range (multi-range, malformed,
//! start past the end, `end <= start`) yields `None`, and the caller serves
//! the full resource instead of failing the request.

/// Half-open byte range `[start, end)` inside a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Build a range, rejecting `start > end`
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Number of bytes covered
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// `Content-Range` header value for a resource of `total` bytes
    #[must_use]
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end.saturating_sub(1), total)
    }
}

/// Parse a `Range` header value against a resource of `size` bytes
///
/// `bytes=a-b` is inclusive and becomes `[a, b + 1)`, clamped to `size`.
/// `bytes=a-` runs to the end and `bytes=-n` selects the last `n` bytes.
#[must_use]
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let (unit, set) = header.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || set.contains(',') {
        return None;
    }

    let (first, last) = set.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        let suffix: u64 = last.parse().ok()?;
        (size.saturating_sub(suffix), size)
    } else {
        let start: u64 = first.parse().ok()?;
        let end = if last.is_empty() {
            size
        } else {
            last.parse::<u64>().ok()?.checked_add(1)?.min(size)
        };
        (start, end)
    };

    if start >= size {
        return None;
    }

    ByteRange::new(start, end).filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusive_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some(ByteRange { start: 0, end: 100 }));
        assert_eq!(parse_range("bytes=5-5", 1000), Some(ByteRange { start: 5, end: 6 }));
    }

    #[test]
    fn test_open_and_suffix_ranges() {
        assert_eq!(parse_range("bytes=100-", 1000), Some(ByteRange { start: 100, end: 1000 }));
        assert_eq!(parse_range("bytes=-100", 1000), Some(ByteRange { start: 900, end: 1000 }));
        assert_eq!(parse_range("bytes=-5000", 1000), Some(ByteRange { start: 0, end: 1000 }));
    }

    #[test]
    fn test_end_is_clamped_to_size() {
        let range = parse_range("bytes=900-5000", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 1000 });
        assert_eq!(range.len(), 100);
        assert_eq!(range.content_range(1000), "bytes 900-999/1000");
    }

    #[test]
    fn test_degenerate_ranges_fall_back() {
        assert_eq!(parse_range("bytes=50-10", 1000), None);
        assert_eq!(parse_range("bytes=1000-1001", 1000), None);
        assert_eq!(parse_range("bytes=-0", 1000), None);
        assert_eq!(parse_range("bytes=0-", 0), None);
    }

    #[test]
    fn test_malformed_headers_fall_back() {
        assert_eq!(parse_range("bytes=abc-def", 1000), None);
        assert_eq!(parse_range("items=0-10", 1000), None);
        assert_eq!(parse_range("bytes=0-10,20-30", 1000), None);
        assert_eq!(parse_range("bytes", 1000), None);
        assert_eq!(parse_range("bytes=-", 1000), None);
    }

    #[test]
    fn test_unit_is_case_insensitive() {
        assert_eq!(parse_range(" Bytes=1-2 ", 10), Some(ByteRange { start: 1, end: 3 }));
    }

    #[test]
    fn test_new_rejects_inverted() {
        assert!(ByteRange::new(10, 5).is_none());
        assert!(ByteRange::new(5, 5).unwrap().is_empty());
    }
}
