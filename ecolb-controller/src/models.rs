//! Telemetry reports, per-host samples, ranked hosts and static bindings.
//!
//! Wire format of a report is a single UTF-8 datagram
//! `hostId,score,utilization`, e.g. `h2,85.5000,42.10`.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;

/// Why a telemetry datagram was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected 3 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error("empty host id")]
    EmptyHost,
    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// One decoded telemetry report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub host_id: String,
    pub score: f64,
    pub utilization: f64,
}

impl Report {
    pub fn new(host_id: impl Into<String>, score: f64, utilization: f64) -> Self {
        Self { host_id: host_id.into(), score, utilization }
    }

    /// Decode a datagram. Utilization is clamped to [0,100]; a negative or
    /// non-finite score is rejected.
    pub fn decode(payload: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::NotUtf8)?;
        let fields: Vec<&str> = text.trim().split(',').collect();
        if fields.len() != 3 {
            return Err(ParseError::FieldCount(fields.len()));
        }

        let host_id = fields[0].trim();
        if host_id.is_empty() {
            return Err(ParseError::EmptyHost);
        }

        let score = parse_number("score", fields[1])?;
        if score < 0.0 {
            return Err(ParseError::InvalidNumber { field: "score", value: fields[1].to_string() });
        }
        let utilization = parse_number("utilization", fields[2])?.clamp(0.0, 100.0);

        Ok(Self { host_id: host_id.to_string(), score, utilization })
    }

    /// Encode with the fixed-point precision the agents use.
    pub fn encode(&self) -> String {
        format!("{},{:.4},{:.2}", self.host_id, self.score, self.utilization)
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, ParseError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber { field, value: raw.to_string() }),
    }
}

/// Latest known state of a host. Overwritten on every report, never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSample {
    pub host_id: String,
    pub score: f64,
    pub utilization: f64,
    pub observed_at: OffsetDateTime,
}

/// One position of a ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHost {
    pub host_id: String,
    pub score: f64,
    pub utilization: f64,
}

impl From<&HostSample> for RankedHost {
    fn from(s: &HostSample) -> Self {
        Self { host_id: s.host_id.clone(), score: s.score, utilization: s.utilization }
    }
}

/// Ordered hosts, length bounded by the configured fan-out.
pub type RankedList = Vec<RankedHost>;

/// Link-layer address, parsed from `aa:bb:cc:dd:ee:ff` (any separator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if hex.len() != 12 {
            return Err(format!("bad mac length: {s:?}"));
        }
        let mut out = [0u8; 6];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| format!("bad mac hex: {s:?}"))?;
        }
        Ok(MacAddr(out))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Static network identity of a backend host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Binding {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: u16,
}

/// host id -> binding, loaded once at startup.
pub type Bindings = HashMap<String, Binding>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_agent_report() {
        let r = Report::decode(b"h2,85.5000,42.10").unwrap();
        assert_eq!(r.host_id, "h2");
        assert!((r.score - 85.5).abs() < 0.01);
        assert!((r.utilization - 42.10).abs() < 0.01);
    }

    #[test]
    fn encode_then_decode_keeps_values() {
        let sent = Report::new("h2", 85.5, 42.1);
        let wire = sent.encode();
        assert_eq!(wire, "h2,85.5000,42.10");

        let got = Report::decode(wire.as_bytes()).unwrap();
        assert_eq!(got.host_id, "h2");
        assert!((got.score - 85.5).abs() < 0.01);
        assert!((got.utilization - 42.10).abs() < 0.01);
    }

    #[test]
    fn tolerates_whitespace_and_trailing_newline() {
        let r = Report::decode(b" h3 , 12.5 , 7\n").unwrap();
        assert_eq!(r.host_id, "h3");
        assert_eq!(r.score, 12.5);
        assert_eq!(r.utilization, 7.0);
    }

    #[test]
    fn clamps_utilization() {
        assert_eq!(Report::decode(b"h1,1.0,140").unwrap().utilization, 100.0);
        assert_eq!(Report::decode(b"h1,1.0,-3").unwrap().utilization, 0.0);
    }

    #[test]
    fn rejects_malformed_reports() {
        assert_eq!(Report::decode(b"h1,1.0"), Err(ParseError::FieldCount(2)));
        assert_eq!(Report::decode(b"h1,1.0,2,3"), Err(ParseError::FieldCount(4)));
        assert_eq!(Report::decode(b" ,1.0,2"), Err(ParseError::EmptyHost));
        assert!(matches!(
            Report::decode(b"h1,abc,2"),
            Err(ParseError::InvalidNumber { field: "score", .. })
        ));
        assert!(matches!(
            Report::decode(b"h1,-1,2"),
            Err(ParseError::InvalidNumber { field: "score", .. })
        ));
        assert!(matches!(
            Report::decode(b"h1,1,NaN"),
            Err(ParseError::InvalidNumber { field: "utilization", .. })
        ));
        assert_eq!(Report::decode(&[0xff, 0xfe, b',']), Err(ParseError::NotUtf8));
    }

    #[test]
    fn mac_roundtrips_through_display() {
        let mac: MacAddr = "08:00:00:00:02:02".parse().unwrap();
        assert_eq!(mac.0, [0x08, 0, 0, 0, 0x02, 0x02]);
        assert_eq!(mac.to_string(), "08:00:00:00:02:02");
        assert!("08:00:00".parse::<MacAddr>().is_err());
    }
}
