// src/matching/store.rs
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Weekday;

use crate::model::{LabTarget, SubscriberInterest};

/// Read-only query surface of the external subscription store.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Interests for `lab_number`/`target`. When `weekday` is given, interests
    /// pinned to a different weekday are excluded; interests without one always
    /// qualify.
    async fn find_interest(
        &self,
        lab_number: u32,
        target: LabTarget,
        weekday: Option<Weekday>,
    ) -> Result<Vec<SubscriberInterest>>;
}

/// Process-local store for development and tests.
#[derive(Debug, Default)]
pub struct InMemorySubscriberStore {
    rows: RwLock<Vec<SubscriberInterest>>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interests(rows: Vec<SubscriberInterest>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub fn add(&self, interest: SubscriberInterest) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interest);
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriberStore for InMemorySubscriberStore {
    async fn find_interest(
        &self,
        lab_number: u32,
        target: LabTarget,
        weekday: Option<Weekday>,
    ) -> Result<Vec<SubscriberInterest>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .iter()
            .filter(|i| i.lab_number == lab_number && i.target == target)
            .filter(|i| match (i.weekday, weekday) {
                (Some(want), Some(got)) => want == got,
                _ => true,
            })
            .cloned()
            .collect())
    }
}
