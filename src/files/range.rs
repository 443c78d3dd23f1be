//! `Range: bytes=...` parsing for a single range.

/// How a `Range` header applies to a resource of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve the whole resource (no header, multi-range, or unparsable).
    Full,
    /// Serve the inclusive byte range `start..=end`.
    Partial { start: u64, end: u64 },
    /// None of the range lies within the resource.
    Unsatisfiable,
}

/// Interpret a `Range` header value against a resource of `len` bytes.
pub fn parse_range(header: Option<&str>, len: u64) -> RangeOutcome {
    let Some(value) = header else {
        return RangeOutcome::Full;
    };
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix form: the final `n` bytes.
        let Ok(n) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if n == 0 || len == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: len.saturating_sub(n),
            end: len - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        len.saturating_sub(1)
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(len.saturating_sub(1)),
            _ => return RangeOutcome::Full,
        }
    };
    if start >= len {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ranges() {
        assert_eq!(parse_range(Some("bytes=0-4"), 10), RangeOutcome::Partial { start: 0, end: 4 });
        assert_eq!(parse_range(Some("bytes=6-"), 10), RangeOutcome::Partial { start: 6, end: 9 });
        assert_eq!(parse_range(Some("bytes=-3"), 10), RangeOutcome::Partial { start: 7, end: 9 });
        assert_eq!(parse_range(Some("bytes=-30"), 10), RangeOutcome::Partial { start: 0, end: 9 });
        assert_eq!(parse_range(Some("bytes=5-100"), 10), RangeOutcome::Partial { start: 5, end: 9 });
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(parse_range(Some("bytes=10-"), 10), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=-0"), 10), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=0-1"), 0), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn falls_back_to_full() {
        assert_eq!(parse_range(None, 10), RangeOutcome::Full);
        assert_eq!(parse_range(Some("bytes=0-1,4-5"), 10), RangeOutcome::Full);
        assert_eq!(parse_range(Some("items=0-1"), 10), RangeOutcome::Full);
        assert_eq!(parse_range(Some("bytes=5-2"), 10), RangeOutcome::Full);
        assert_eq!(parse_range(Some("bytes=x-2"), 10), RangeOutcome::Full);
    }
}
