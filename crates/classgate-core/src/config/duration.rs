//! Go-style duration strings (`300ms`, `15m`, `1h30m`, `1.5h`).
//!
//! Parsing is strict: no whitespace, no unit words, every number needs a
//! unit, and the total must be positive. A bad value must fail startup
//! rather than silently become a zero timeout.

use std::time::Duration;

use super::ConfigError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parse a Go-style duration string.
///
/// # Errors
///
/// Returns `ConfigError::InvalidDuration` for anything that is not a
/// sequence of `<number><unit>` pairs adding up to a positive duration.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    if input.is_empty() {
        return Err(invalid());
    }

    let mut rest = input;
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);

        let scale = unit_nanos(unit).ok_or_else(invalid)?;
        let nanos = scaled(number, scale).ok_or_else(invalid)?;
        total = total.checked_add(nanos).ok_or_else(invalid)?;
        rest = tail;
    }

    if total == 0 {
        return Err(invalid());
    }

    u64::try_from(total)
        .map(Duration::from_nanos)
        .map_err(|_| invalid())
}

/// Multiply a decimal number like `1`, `1.5` or `.25` by a unit in nanoseconds.
fn scaled(number: &str, unit: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit)?;

    if !frac.is_empty() {
        let digits = u32::try_from(frac.len()).ok()?;
        let denominator = 10u128.checked_pow(digits)?;
        let numerator: u128 = frac.parse().ok()?;
        nanos = nanos.checked_add(numerator.checked_mul(unit)? / denominator)?;
    }

    Some(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("720h").unwrap(), Duration::from_secs(720 * 3600));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn test_compound_and_fraction() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_human_phrasing() {
        assert!(parse_duration("1 hour").is_err());
        assert!(parse_duration("1hour").is_err());
        assert!(parse_duration("1h ").is_err());
        assert!(parse_duration(" 1h").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "10", "h", "-1h", "1.2.3s", ".s", "1d", "0s", "0h0m"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_overflow() {
        assert!(parse_duration("99999999999999999999999999h").is_err());
    }
}
