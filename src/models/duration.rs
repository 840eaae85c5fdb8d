//! Kubernetes-style duration strings
//!
//! Flux resources carry intervals as Go duration strings (`10m`, `1m30s`,
//! `500ms`). Only the units that appear in practice are accepted.

use anyhow::{Context, Result};
use std::time::Duration;

/// Parse a duration such as `30s`, `1h30m` or `250ms`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Invalid duration format: empty string");
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .with_context(|| format!("Invalid duration format: {} (missing unit)", s))?;
        if digits == 0 {
            anyhow::bail!("Invalid duration format: {}", s);
        }
        let value: f64 = rest[..digits]
            .parse()
            .with_context(|| format!("Invalid duration: {}", s))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let seconds = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => anyhow::bail!("Invalid duration unit '{}' in {}", unit, s),
        };
        total += Duration::from_secs_f64(seconds);
    }

    Ok(total)
}
