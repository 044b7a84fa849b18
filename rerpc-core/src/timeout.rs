//! `grpc-timeout` encoding and parsing.
//!
//! The header carries a positive integer of at most eight digits followed by
//! a unit: `H` (hours), `M` (minutes), `S` (seconds), `m` (milliseconds),
//! `u` (microseconds) or `n` (nanoseconds). The timeout is advisory for the
//! remote peer; local deadlines are enforced by [`CallContext`](crate::CallContext).

use std::time::Duration;

/// Largest value the eight-digit field can hold, plus one.
const MAX_TIMEOUT_VALUE: u128 = 100_000_000;

/// Units from finest to coarsest, with their length in nanoseconds.
const UNITS: [(char, u128); 6] = [
    ('n', 1),
    ('u', 1_000),
    ('m', 1_000_000),
    ('S', 1_000_000_000),
    ('M', 60 * 1_000_000_000),
    ('H', 60 * 60 * 1_000_000_000),
];

/// Errors encoding or parsing a `grpc-timeout` value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout {0:?} is too long to encode")]
    TooLong(Duration),
    #[error("invalid grpc-timeout value {0:?}")]
    Invalid(String),
}

/// Encode a duration as a `grpc-timeout` value.
///
/// Uses the finest unit whose value fits in eight digits, truncating toward
/// zero.
pub fn encode_timeout(timeout: Duration) -> Result<String, TimeoutError> {
    let nanos = timeout.as_nanos();
    UNITS
        .iter()
        .map(|&(unit, size)| (unit, nanos / size))
        .find(|&(_, value)| value < MAX_TIMEOUT_VALUE)
        .map(|(unit, value)| format!("{value}{unit}"))
        .ok_or(TimeoutError::TooLong(timeout))
}

/// Parse a `grpc-timeout` value.
pub fn decode_timeout(value: &str) -> Result<Duration, TimeoutError> {
    let invalid = || TimeoutError::Invalid(value.to_string());

    let unit = value.chars().last().ok_or_else(invalid)?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit {
        'n' => Duration::from_nanos(amount),
        'u' => Duration::from_micros(amount),
        'm' => Duration::from_millis(amount),
        'S' => Duration::from_secs(amount),
        'M' => Duration::from_secs(amount * 60),
        'H' => Duration::from_secs(amount * 60 * 60),
        _ => return Err(invalid()),
    };
    Ok(duration)
}
