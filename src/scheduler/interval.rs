use std::time::Duration;
use thiserror::Error;

/// Rejected `agg` interval strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("interval is empty")]
    Empty,
    #[error("interval {0:?} has no unit (use s, m or h)")]
    MissingUnit(String),
    #[error("interval {0:?} does not start with a whole number")]
    InvalidNumber(String),
    #[error("unknown unit {0:?} in interval (use s, m or h)")]
    UnknownUnit(String),
    #[error("interval must be greater than zero")]
    Zero,
}

/// Parse `{integer}{unit}` where unit is `s`, `m` or `h`, e.g. `"30s"` or `"5m"`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use gator::scheduler::parse_interval;
///
/// assert_eq!(parse_interval("5s"), Ok(Duration::from_secs(5)));
/// assert!(parse_interval("5x").is_err());
/// ```
pub fn parse_interval(input: &str) -> Result<Duration, IntervalError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(IntervalError::Empty);
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| IntervalError::MissingUnit(input.to_owned()))?;
    let (number, unit) = input.split_at(split);

    if number.is_empty() {
        return Err(IntervalError::InvalidNumber(input.to_owned()));
    }
    let value: u64 = number
        .parse()
        .map_err(|_| IntervalError::InvalidNumber(input.to_owned()))?;

    let secs_per_unit = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        other => return Err(IntervalError::UnknownUnit(other.to_owned())),
    };

    if value == 0 {
        return Err(IntervalError::Zero);
    }
    let secs = value
        .checked_mul(secs_per_unit)
        .ok_or_else(|| IntervalError::InvalidNumber(input.to_owned()))?;
    Ok(Duration::from_secs(secs))
}
