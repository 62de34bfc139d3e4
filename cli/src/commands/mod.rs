//! CLI command implementations.

pub mod config;
pub mod init;
pub mod latest;
pub mod version;

use std::time::Duration;

/// Formats an error as `<phase>: <message>`.
///
/// Core errors name the phase they failed in; anything else is reported
/// under `command`.
pub fn describe_error(err: &anyhow::Error) -> String {
    let phase = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<churl_core::Error>())
        .map(|core| core.phase().as_str())
        .unwrap_or("command");
    format!("{}: {:#}", phase, err)
}

/// Parses durations such as `2s`, `500ms`, `1m` or `1m30s`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration '{}'", input))?;
        if digits == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid number in duration '{}'", input))?;

        let unit_len = rest[digits..]
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len() - digits);
        let unit = &rest[digits..digits + unit_len];
        let scale = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(format!("unknown unit '{}' in duration '{}'", unit, input)),
        };

        let too_large = || format!("duration '{}' is too large", input);
        let part = Duration::try_from_secs_f64(value * scale).map_err(|_| too_large())?;
        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = &rest[digits + unit_len..];
    }

    Ok(total)
}
