//! Duration strings in configuration files
//!
//! Accepts `500ms`, `1s`, `1m30s`, `2h` style strings (units `ns`, `us`,
//! `µs`, `ms`, `s`, `m`, `h`, combinable) or a bare integer of nanoseconds.
//! A negative value parses as zero so that the defaulting rules treat it
//! like an unset value.

use anyhow::{anyhow, bail, Result};
use serde::{de, Deserializer, Serializer};
use std::{fmt, time::Duration};

const NANOS_PER_UNIT: [(&str, u128); 8] = [
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
];

/// Parse a duration string
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let (negative, mut rest) = match trimmed.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        bail!("Invalid duration: {:?}", input);
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            bail!("Invalid duration: {:?}", input);
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let Some(&(_, scale)) = NANOS_PER_UNIT.iter().find(|(name, _)| *name == unit) else {
            bail!("Unknown unit {:?} in duration {:?}", unit, input);
        };

        let term = scaled(number, scale).ok_or_else(|| {
            anyhow!("Invalid number {:?} in duration {:?}", number, input)
        })?;
        total = total
            .checked_add(term)
            .ok_or_else(|| anyhow!("Duration out of range: {:?}", input))?;
        rest = tail;
    }

    if negative {
        return Ok(Duration::ZERO);
    }
    let secs = u64::try_from(total / 1_000_000_000)
        .map_err(|_| anyhow!("Duration out of range: {:?}", input))?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}

fn scaled(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(scale)?;

    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().ok()?;
        let divisor = 10u128.checked_pow(fraction.len() as u32)?;
        value = value.checked_add(digits.checked_mul(scale)? / divisor)?;
    }
    Some(value)
}

/// Format a duration the way [`parse_duration`] reads it back
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    if d < Duration::from_secs(1) {
        let nanos = d.subsec_nanos();
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{}ns", nanos)
        };
    }

    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }

    let fraction = d.subsec_nanos();
    if fraction == 0 {
        out.push_str(&format!("{}s", seconds));
    } else {
        let digits = format!("{:09}", fraction);
        out.push_str(&format!("{}.{}s", seconds, digits.trim_end_matches('0')));
    }
    out
}

/// Serde adapter: `#[serde(with = "crate::duration::serde_format")]`
pub mod serde_format {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> de::Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration string such as \"30s\" or integer nanoseconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(v.max(0) as u64))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Duration, E> {
            Ok(Duration::ZERO)
        }
    }
}
