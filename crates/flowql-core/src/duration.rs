//! Duration literal parsing: an integer followed by a unit suffix
//! (`ns|ms|s|m|h|d|w`), per spec §4.1/§6.1.

use std::time::Duration;

/// Parses a duration literal's numeric+unit pair (the lexer has already
/// split the token into these two parts). Returns `None` on an unknown
/// unit; the caller (lexer) turns that into a `LexError`.
///
/// `μs` (and its ASCII spelling `us`) is accepted as a lexical alias for
/// microseconds, per the Open Question resolution in SPEC_FULL.md §9: no
/// operator currently consumes it, but the lexer must not reject it.
pub fn from_amount_and_unit(amount: u64, unit: &str) -> Option<Duration> {
    let nanos: u128 = match unit {
        "ns" => amount as u128,
        "us" | "\u{3bc}s" => amount as u128 * 1_000,
        "ms" => amount as u128 * 1_000_000,
        "s" => amount as u128 * 1_000_000_000,
        "m" => amount as u128 * 60 * 1_000_000_000,
        "h" => amount as u128 * 60 * 60 * 1_000_000_000,
        "d" => amount as u128 * 24 * 60 * 60 * 1_000_000_000,
        "w" => amount as u128 * 7 * 24 * 60 * 60 * 1_000_000_000,
        _ => return None,
    };
    let secs = (nanos / 1_000_000_000) as u64;
    let subsec_nanos = (nanos % 1_000_000_000) as u32;
    Some(Duration::new(secs, subsec_nanos))
}

/// Recognized duration unit suffixes, longest-first so the lexer's greedy
/// match doesn't stop at `m` before checking `ms`.
pub const UNITS: &[&str] = &["ns", "ms", "us", "\u{3bc}s", "s", "m", "h", "d", "w"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds() {
        assert_eq!(from_amount_and_unit(5, "s"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn milliseconds() {
        assert_eq!(from_amount_and_unit(250, "ms"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn days_and_weeks() {
        assert_eq!(from_amount_and_unit(1, "d"), Some(Duration::from_secs(86_400)));
        assert_eq!(from_amount_and_unit(1, "w"), Some(Duration::from_secs(7 * 86_400)));
    }

    #[test]
    fn unknown_unit() {
        assert_eq!(from_amount_and_unit(1, "y"), None);
    }

    #[test]
    fn microsecond_alias() {
        assert_eq!(from_amount_and_unit(1, "us"), Some(Duration::from_micros(1)));
        assert_eq!(from_amount_and_unit(1, "\u{3bc}s"), Some(Duration::from_micros(1)));
    }
}
