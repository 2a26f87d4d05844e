//! Free-space thresholds: either a percentage of the filesystem or an
//! absolute byte size (`"20%"`, `"50GiB"`, `"500MB"`, `"1048576"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Percent(f64),
    Bytes(u64),
}

impl Threshold {
    /// True when `free` bytes out of `total` satisfy this minimum.
    pub fn is_satisfied(&self, free: u64, total: u64) -> bool {
        match *self {
            Threshold::Percent(pct) => {
                if total == 0 {
                    return false;
                }
                (free as f64 / total as f64) * 100.0 >= pct
            }
            Threshold::Bytes(min) => free >= min,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Percent(pct) => write!(f, "{pct}%"),
            Threshold::Bytes(bytes) => write!(f, "{}", format_bytes(*bytes)),
        }
    }
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            let value: f64 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentage '{s}'"))?;
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("percentage '{s}' must be between 0 and 100"));
            }
            return Ok(Threshold::Percent(value));
        }

        let split = raw
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(raw.len());
        let (number, unit) = raw.split_at(split);
        let number: f64 = number
            .parse()
            .map_err(|_| format!("invalid size '{s}'; expected e.g. \"20%\" or \"50GiB\""))?;
        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "kb" => 1_000,
            "mb" => 1_000_000,
            "gb" => 1_000_000_000,
            "tb" => 1_000_000_000_000,
            "kib" | "k" => 1 << 10,
            "mib" | "m" => 1 << 20,
            "gib" | "g" => 1 << 30,
            "tib" | "t" => 1 << 40,
            other => return Err(format!("unknown size unit '{other}' in '{s}'")),
        };
        Ok(Threshold::Bytes((number * multiplier as f64) as u64))
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Human-readable binary size (`1.5GiB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("20%", Threshold::Percent(20.0))]
    #[case(" 7.5% ", Threshold::Percent(7.5))]
    #[case("50GiB", Threshold::Bytes(50 << 30))]
    #[case("500MB", Threshold::Bytes(500_000_000))]
    #[case("1024", Threshold::Bytes(1024))]
    fn parses_thresholds(#[case] raw: &str, #[case] expected: Threshold) {
        assert_eq!(raw.parse::<Threshold>(), Ok(expected));
    }

    #[rstest]
    #[case("120%")]
    #[case("lots")]
    #[case("10 parsecs")]
    fn rejects_bad_thresholds(#[case] raw: &str) {
        assert!(raw.parse::<Threshold>().is_err(), "{raw} should not parse");
    }

    #[test]
    fn percent_threshold_checks_ratio() {
        let t = Threshold::Percent(20.0);
        assert!(t.is_satisfied(200, 1000));
        assert!(!t.is_satisfied(199, 1000));
        assert!(!t.is_satisfied(0, 0));
    }

    #[test]
    fn byte_threshold_checks_absolute_free_space() {
        let t = Threshold::Bytes(1 << 30);
        assert!(t.is_satisfied(1 << 30, 1 << 40));
        assert!(!t.is_satisfied((1 << 30) - 1, 1 << 40));
    }

    #[test]
    fn format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(3 << 29), "1.5GiB");
    }
}
