//! Read helpers over the mutable registry.

use crate::types::*;
use crate::{Error, Result};
use uuid::Uuid;

impl Registry {
    pub fn catechumen(&self, id: Uuid) -> Result<&Catechumen> {
        self.catechumens
            .get(&id)
            .ok_or_else(|| Error::not_found("catechumen", id))
    }

    pub fn group(&self, id: Uuid) -> Result<&Group> {
        self.groups
            .get(&id)
            .ok_or_else(|| Error::not_found("group", id))
    }

    pub fn enrollment(&self, id: Uuid) -> Result<&Enrollment> {
        self.enrollments
            .get(&id)
            .ok_or_else(|| Error::not_found("enrollment", id))
    }

    pub fn is_closed(&self, period_id: &str) -> bool {
        self.closed_periods.contains(period_id)
    }

    /// Seats taken in a group, derived from its enrollments
    pub fn enrolled_count(&self, group_id: Uuid) -> u32 {
        self.enrollments
            .values()
            .filter(|e| e.group_id == group_id && e.occupies_seat())
            .count() as u32
    }

    /// The catechumen's non-withdrawn enrollment in any period not yet closed
    ///
    /// Its outcome has not been applied to the catechumen's level yet, so a
    /// second enrollment would be checked against a stale level.
    pub fn open_enrollment(&self, catechumen_id: Uuid) -> Option<&Enrollment> {
        self.enrollments.values().find(|e| {
            e.catechumen_id == catechumen_id && e.occupies_seat() && !self.is_closed(&e.period_id)
        })
    }

    /// Enrollments of a period in sequence order
    pub fn period_enrollments(&self, period_id: &str) -> Vec<&Enrollment> {
        let mut enrollments: Vec<_> = self
            .enrollments
            .values()
            .filter(|e| e.period_id == period_id)
            .collect();
        enrollments.sort_by_key(|e| e.sequence);
        enrollments
    }

    pub fn group_enrollments(&self, group_id: Uuid) -> Vec<&Enrollment> {
        let mut enrollments: Vec<_> = self
            .enrollments
            .values()
            .filter(|e| e.group_id == group_id)
            .collect();
        enrollments.sort_by_key(|e| e.sequence);
        enrollments
    }

    /// Progression records written when a period closed, in append order
    pub fn period_records(&self, period_id: &str) -> Vec<ProgressionRecord> {
        self.progression
            .iter()
            .filter(|r| r.period_id == period_id)
            .cloned()
            .collect()
    }

    /// A catechumen's audit trail, oldest first
    pub fn progression_history(&self, catechumen_id: Uuid) -> Vec<&ProgressionRecord> {
        self.progression
            .iter()
            .filter(|r| r.catechumen_id == catechumen_id)
            .collect()
    }

    pub fn enrollment_attendance(&self, enrollment_id: Uuid) -> impl Iterator<Item = &AttendanceRecord> {
        self.attendance
            .iter()
            .filter(move |a| a.enrollment_id == enrollment_id)
    }

    pub(crate) fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }
}
