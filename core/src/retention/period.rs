//! Retention period grammar: `^[0-9]+[dhms]$`, where `d` means 24 hours. An
//! empty string defaults to 30 days.

use std::time::Duration;

use crate::error::{CResult, Error};

const DEFAULT_PERIOD: &str = "30d";

pub fn parse_period(input: &str) -> CResult<Duration> {
    let input = if input.is_empty() { DEFAULT_PERIOD } else { input };
    if input.len() < 2 {
        return Err(Error::InvalidPeriod(input.to_string()));
    }
    let (digits, unit) = input.split_at(input.len() - 1);
    let count: u64 = digits.parse().map_err(|_| Error::InvalidPeriod(input.to_string()))?;
    let seconds = match unit {
        "s" => count,
        "m" => count * 60,
        "h" => count * 3600,
        "d" => count * 86400,
        _ => return Err(Error::InvalidPeriod(input.to_string())),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_period("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_period("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_period("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_period("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn empty_string_defaults_to_thirty_days() {
        assert_eq!(parse_period("").unwrap(), Duration::from_secs(30 * 86400));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_period("d").is_err());
        assert!(parse_period("30x").is_err());
        assert!(parse_period("x30d").is_err());
    }
}
