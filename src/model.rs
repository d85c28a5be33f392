//! # Data model
//! Canonical records shared by the ingest pipeline and the match engine.
//!
//! Slots are immutable once built; their dedup identity is a SHA-256 digest over
//! every field, so two slots with identical content are the same slot.

use std::fmt;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Remote identifier of one pollable lab/auditorium/type combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ResourceId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Unparsed response body for one resource at one point in time.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub resource: ResourceId,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabType {
    Performance,
    Defence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Mechanics,
    Virtual,
    Electricity,
}

/// The "auditorium-or-domain" half of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabTarget {
    Auditorium(u32),
    Domain(Domain),
}

/// One concrete bookable timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub id: ResourceId,
    pub lab_number: u32,
    pub lab_name: String,
    pub auditorium: u32,
    pub lab_type: LabType,
    pub domain: Option<Domain>,
    pub date_time: NaiveDateTime,
}

/// Deterministic dedup key of a [`Slot`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey(String);

impl SlotKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Slot {
    pub fn key(&self) -> SlotKey {
        let mut h = Sha256::new();
        h.update(self.id.0.to_be_bytes());
        h.update(self.lab_number.to_be_bytes());
        h.update(self.lab_name.as_bytes());
        h.update([0u8]);
        h.update(self.auditorium.to_be_bytes());
        h.update([self.lab_type as u8]);
        h.update([self.domain.map_or(0xff, |d| d as u8)]);
        h.update(self.date_time.format("%Y-%m-%dT%H:%M:%S%.f").to_string().as_bytes());
        SlotKey(hex::encode(h.finalize()))
    }

    /// Domain slots are addressed by domain, everything else by auditorium.
    pub fn target(&self) -> LabTarget {
        match self.domain {
            Some(d) => LabTarget::Domain(d),
            None => LabTarget::Auditorium(self.auditorium),
        }
    }

    pub fn weekday(&self) -> Weekday {
        self.date_time.weekday()
    }
}

/// Wall-clock window, start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Read-only projection of one subscription, supplied by the subscriber store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberInterest {
    pub user_id: i64,
    pub lab_number: u32,
    pub target: LabTarget,
    #[serde(default)]
    pub weekday: Option<Weekday>,
    #[serde(default)]
    pub preferred_times: Vec<TimeRange>,
}

impl SubscriberInterest {
    /// Lab, target and (optional) weekday must agree. Preferred times never gate.
    pub fn matches(&self, slot: &Slot) -> bool {
        self.lab_number == slot.lab_number
            && self.target == slot.target()
            && self.weekday.map_or(true, |w| w == slot.weekday())
    }

    /// First preferred range containing the slot's time of day.
    pub fn preferred_range_for(&self, slot: &Slot) -> Option<TimeRange> {
        let t = slot.date_time.time();
        self.preferred_times.iter().copied().find(|r| r.contains(t))
    }
}

/// One dispatchable event: a subscriber and the slot it matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub matched_range: Option<TimeRange>,
    pub slot: Slot,
}

impl Notification {
    pub fn for_interest(interest: &SubscriberInterest, slot: &Slot) -> Self {
        Self {
            user_id: interest.user_id,
            matched_range: interest.preferred_range_for(slot),
            slot: slot.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slot(minute: u32) -> Slot {
        Slot {
            id: ResourceId(7),
            lab_number: 3,
            lab_name: "Pendulum".into(),
            auditorium: 210,
            lab_type: LabType::Performance,
            domain: None,
            date_time: NaiveDate::from_ymd_opt(2025, 10, 20)
                .unwrap()
                .and_hms_opt(10, minute, 0)
                .unwrap(),
        }
    }

    #[test]
    fn key_is_stable_and_content_sensitive() {
        assert_eq!(slot(0).key(), slot(0).key());
        assert_ne!(slot(0).key(), slot(30).key());
        assert_eq!(slot(0).key().as_str().len(), 64);
    }

    #[test]
    fn key_keeps_sub_second_precision() {
        let base = slot(0);
        let later = Slot {
            date_time: base.date_time + chrono::Duration::milliseconds(500),
            ..base.clone()
        };
        assert_ne!(base.key(), later.key());
    }

    #[test]
    fn domain_slots_target_domain() {
        let mut s = slot(0);
        assert_eq!(s.target(), LabTarget::Auditorium(210));
        s.domain = Some(Domain::Virtual);
        assert_eq!(s.target(), LabTarget::Domain(Domain::Virtual));
    }

    #[test]
    fn preferred_range_does_not_gate_matching() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let interest = SubscriberInterest {
            user_id: 1,
            lab_number: 3,
            target: LabTarget::Auditorium(210),
            weekday: Some(Weekday::Mon),
            preferred_times: vec![TimeRange::new(t(12, 0), t(14, 0))],
        };
        let s = slot(0);
        assert!(interest.matches(&s));
        assert_eq!(interest.preferred_range_for(&s), None);

        let wrong_day = SubscriberInterest {
            weekday: Some(Weekday::Tue),
            ..interest.clone()
        };
        assert!(!wrong_day.matches(&s));
    }
}
