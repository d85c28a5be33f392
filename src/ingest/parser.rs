//! # Payload parser
//! Turns one per-resource JSON document into canonical [`Slot`]s.
//!
//! The document carries two maps keyed by staff id: `masters` (name + service label)
//! and `times` (open timestamps). The remote sends `[]` instead of `{}` when a map
//! has no data. Every malformed record, name, label or timestamp is reported and
//! skipped; the rest of the payload still yields slots.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use metrics::histogram;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;
use crate::model::{Domain, LabType, RawPayload, ResourceId, Slot};

const PERFORMANCE_MARKER: &str = "выполнение";
const DEFENCE_MARKER: &str = "защита";

const DOMAIN_MARKERS: [(&str, Domain); 3] = [
    ("механик", Domain::Mechanics),
    ("виртуал", Domain::Virtual),
    ("электр", Domain::Electricity),
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// `<lab number> (<auditorium>) <lab name>`
static RE_STAFF_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s*\(\s*(\d+)\s*\)\s*(\S.*?)\s*$").unwrap()
});

#[derive(Debug, Deserialize)]
struct SlotDocument {
    #[serde(default)]
    masters: MapOrList,
    #[serde(default)]
    times: MapOrList,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MapOrList {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl Default for MapOrList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl MapOrList {
    fn into_map(self, resource: ResourceId, field: &str) -> Result<BTreeMap<String, Value>, ParseError> {
        match self {
            Self::Map(m) => Ok(m),
            Self::List(l) if l.is_empty() => Ok(BTreeMap::new()),
            Self::List(_) => Err(ParseError::Payload {
                resource,
                message: format!("`{field}` is a non-empty list"),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Master {
    username: String,
    #[serde(rename = "serviceName")]
    service_name: String,
}

/// Parsed `(lab number, auditorium, name)` triple of a staff record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffName {
    pub lab_number: u32,
    pub auditorium: u32,
    pub lab_name: String,
}

pub fn parse_staff_name(s: &str) -> Result<StaffName, ParseError> {
    let bad = || ParseError::Name {
        fragment: s.to_string(),
    };
    let caps = RE_STAFF_NAME.captures(s).ok_or_else(bad)?;
    Ok(StaffName {
        lab_number: caps[1].parse().map_err(|_| bad())?,
        auditorium: caps[2].parse().map_err(|_| bad())?,
        lab_name: caps[3].to_string(),
    })
}

/// Service label → lab type, plus the domain when the label names one.
pub fn classify_service(label: &str) -> Result<(LabType, Option<Domain>), ParseError> {
    let lower = label.to_lowercase();
    let lab_type = if lower.contains(PERFORMANCE_MARKER) {
        LabType::Performance
    } else if lower.contains(DEFENCE_MARKER) {
        LabType::Defence
    } else {
        return Err(ParseError::ServiceType {
            fragment: label.to_string(),
        });
    };
    let domain = DOMAIN_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, d)| *d);
    Ok((lab_type, domain))
}

/// RFC 3339 (wall time kept as sent) or a plain `YYYY-MM-DD[ T]HH:MM[:SS]`.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Parse one payload. A document that is not a slot document at all is the only
/// payload-level error (see [`ParseError::is_payload`]).
pub fn parse(payload: &RawPayload) -> (Vec<Slot>, Vec<ParseError>) {
    let t0 = std::time::Instant::now();
    let out = parse_inner(payload);
    histogram!("watcher_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    out
}

fn parse_inner(payload: &RawPayload) -> (Vec<Slot>, Vec<ParseError>) {
    let resource = payload.resource;
    let doc: SlotDocument = match serde_json::from_str(&payload.body) {
        Ok(d) => d,
        Err(e) => {
            return (
                Vec::new(),
                vec![ParseError::Payload {
                    resource,
                    message: e.to_string(),
                }],
            )
        }
    };

    let (masters, mut times) = match (
        doc.masters.into_map(resource, "masters"),
        doc.times.into_map(resource, "times"),
    ) {
        (Ok(m), Ok(t)) => (m, t),
        (Err(e), _) | (_, Err(e)) => return (Vec::new(), vec![e]),
    };

    let mut slots = Vec::new();
    let mut errors = Vec::new();

    for (staff_key, raw_master) in masters {
        let master: Master = match serde_json::from_value(raw_master.clone()) {
            Ok(m) => m,
            Err(_) => {
                errors.push(ParseError::Record {
                    fragment: raw_master.to_string(),
                });
                continue;
            }
        };
        let name = match parse_staff_name(&master.username) {
            Ok(n) => n,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        let (lab_type, domain) = match classify_service(&master.service_name) {
            Ok(c) => c,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let stamps = match times.remove(&staff_key) {
            Some(Value::Array(v)) => v,
            Some(Value::Null) | None => continue,
            Some(other) => {
                errors.push(ParseError::Timestamp {
                    fragment: other.to_string(),
                });
                continue;
            }
        };

        for stamp in stamps {
            let parsed = stamp.as_str().and_then(parse_timestamp);
            match parsed {
                Some(date_time) => slots.push(Slot {
                    id: resource,
                    lab_number: name.lab_number,
                    lab_name: name.lab_name.clone(),
                    auditorium: name.auditorium,
                    lab_type,
                    domain,
                    date_time,
                }),
                None => errors.push(ParseError::Timestamp {
                    fragment: stamp.as_str().map_or_else(|| stamp.to_string(), str::to_string),
                }),
            }
        }
    }

    (slots, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_name_pattern() {
        let n = parse_staff_name(" 12 (305) Free fall acceleration ").unwrap();
        assert_eq!(n.lab_number, 12);
        assert_eq!(n.auditorium, 305);
        assert_eq!(n.lab_name, "Free fall acceleration");

        assert!(parse_staff_name("Free fall").is_err());
        assert!(parse_staff_name("12 305 Free fall").is_err());
        assert!(parse_staff_name("12 (305)").is_err());
        assert!(parse_staff_name("99999999999 (1) Overflow").is_err());
    }

    #[test]
    fn service_labels() {
        assert_eq!(
            classify_service("Выполнение лабораторной работы").unwrap(),
            (LabType::Performance, None)
        );
        assert_eq!(
            classify_service("Защита ЛР (Электричество)").unwrap(),
            (LabType::Defence, Some(Domain::Electricity))
        );
        assert_eq!(
            classify_service("ЗАЩИТА, механика").unwrap(),
            (LabType::Defence, Some(Domain::Mechanics))
        );
        assert!(classify_service("Консультация").is_err());
    }

    #[test]
    fn timestamp_formats() {
        let want = NaiveDateTime::parse_from_str("2025-10-20 14:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_timestamp("2025-10-20 14:30"), Some(want));
        assert_eq!(parse_timestamp("2025-10-20T14:30:00"), Some(want));
        assert_eq!(parse_timestamp("2025-10-20T14:30:00+03:00"), Some(want));
        assert_eq!(parse_timestamp("20.10.2025 14:30"), None);
    }

    #[test]
    fn non_empty_list_is_payload_error() {
        let p = RawPayload {
            resource: ResourceId(1),
            body: r#"{"masters": [1], "times": []}"#.into(),
        };
        let (slots, errs) = parse(&p);
        assert!(slots.is_empty());
        assert_eq!(errs.len(), 1);
        assert!(errs[0].is_payload());
    }
}
