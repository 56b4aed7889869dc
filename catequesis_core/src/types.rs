//! Core domain types for the parish catechesis system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Reference data (parishes, levels, periods) held by the catalog
//! - Groups, catechumens and their enrollments
//! - Progression, attendance and certificate records
//! - The mutable registry persisted between runs

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Catalog entries use short administrative codes ("sf_asis", "L1", "2024")
pub type ParishId = String;
pub type LevelId = String;
pub type PeriodId = String;

// ============================================================================
// Reference Data
// ============================================================================

/// Sacrament a catechetical level prepares for
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sacrament {
    Baptism,
    FirstCommunion,
    Confirmation,
}

impl Sacrament {
    /// Prefix of certificate numbers for this sacrament
    pub fn code(&self) -> &'static str {
        match self {
            Sacrament::Baptism => "BAU",
            Sacrament::FirstCommunion => "COM",
            Sacrament::Confirmation => "CON",
        }
    }
}

/// A parish and its default group-capacity policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Parish {
    pub id: ParishId,
    pub name: String,
    /// Falls back to `enrollment.default_capacity` when unset
    #[serde(default)]
    pub default_capacity: Option<u32>,
}

/// An ordered stage of catechetical formation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatecheticalLevel {
    pub id: LevelId,
    pub rank: u32,
    pub name: String,
    /// Falls back to `enrollment.min_age` when unset
    #[serde(default)]
    pub min_age: Option<u32>,
    /// Falls back to `enrollment.max_age` when unset
    #[serde(default)]
    pub max_age: Option<u32>,
    #[serde(default)]
    pub prerequisite: Option<LevelId>,
    #[serde(default)]
    pub prepares_sacrament: Option<Sacrament>,
}

/// An administrative term within which enrollments occur and are graded
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Period {
    pub id: PeriodId,
    pub parish_id: ParishId,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.starts_on <= date && date <= self.ends_on
    }
}

/// Catalog defaults applied when an entry leaves a policy value unset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogConfig {
    pub default_capacity: u32,
    pub min_age: u32,
    pub max_age: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_capacity: 30,
            min_age: 6,
            max_age: 18,
        }
    }
}

/// The catalog of parishes, levels and periods
///
/// `levels` is kept sorted by rank.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    #[serde(skip)]
    pub config: CatalogConfig,
    #[serde(default)]
    pub parishes: Vec<Parish>,
    #[serde(default)]
    pub levels: Vec<CatecheticalLevel>,
    #[serde(default)]
    pub periods: Vec<Period>,
}

// ============================================================================
// Groups and Catechumens
// ============================================================================

/// A bounded-capacity cohort at one level, for one period
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub parish_id: ParishId,
    pub level_id: LevelId,
    pub period_id: PeriodId,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CatechumenStatus {
    Active,
    Completed,
    Withdrawn,
    Suspended,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Catechumen {
    pub id: Uuid,
    pub full_name: String,
    pub birth_date: NaiveDate,
    /// None until the first enrollment
    pub current_level: Option<LevelId>,
    pub status: CatechumenStatus,
    pub registered_at: DateTime<Utc>,
}

impl Catechumen {
    /// Age in completed years on the given date
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        if date < self.birth_date {
            return 0;
        }
        let mut years = date.year() - self.birth_date.year();
        if (date.month(), date.day()) < (self.birth_date.month(), self.birth_date.day()) {
            years -= 1;
        }
        years.max(0) as u32
    }
}

// ============================================================================
// Enrollment, Progression, Attendance
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    InProgress,
    Passed,
    Failed,
    Withdrawn,
}

/// Administrative grade recorded before a period closes
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Passed,
    Failed,
}

impl From<Grade> for Outcome {
    fn from(grade: Grade) -> Self {
        match grade {
            Grade::Passed => Outcome::Passed,
            Grade::Failed => Outcome::Failed,
        }
    }
}

/// A catechumen's seat in a group for one period
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Enrollment {
    pub id: Uuid,
    pub catechumen_id: Uuid,
    pub group_id: Uuid,
    pub period_id: PeriodId,
    /// Monotonic ordering key assigned under the writer lock
    pub sequence: u64,
    pub enrolled_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl Enrollment {
    /// Withdrawn enrollments release their seat
    pub fn occupies_seat(&self) -> bool {
        self.outcome != Outcome::Withdrawn
    }

    pub fn is_graded(&self) -> bool {
        matches!(self.outcome, Outcome::Passed | Outcome::Failed)
    }
}

/// Immutable audit entry of a catechumen's outcome for a level in a period
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressionRecord {
    pub catechumen_id: Uuid,
    pub level_id: LevelId,
    pub period_id: PeriodId,
    pub group_id: Uuid,
    pub enrollment_id: Uuid,
    pub outcome: Outcome,
    /// Set when a passed level prepares a sacrament
    pub sacrament: Option<Sacrament>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AttendanceRecord {
    pub enrollment_id: Uuid,
    pub session_date: NaiveDate,
    pub present: bool,
}

/// Issued proof that a catechumen completed a sacramental preparation
///
/// Rendering to a printable document happens outside the engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Certificate {
    /// Sacrament code, issue year and a per-sacrament yearly counter ("COM20250001")
    pub number: String,
    /// Opaque code printed on the document for verification lookups
    pub verification_code: String,
    pub catechumen_id: Uuid,
    pub parish_id: ParishId,
    pub sacrament: Sacrament,
    pub level_id: LevelId,
    pub period_id: PeriodId,
    pub enrollment_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// All mutable enrollment and progression state
///
/// Persisted as a whole by a [`crate::store::StateStore`].
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Registry {
    #[serde(default)]
    pub catechumens: BTreeMap<Uuid, Catechumen>,
    #[serde(default)]
    pub groups: BTreeMap<Uuid, Group>,
    #[serde(default)]
    pub enrollments: BTreeMap<Uuid, Enrollment>,
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,
    #[serde(default)]
    pub progression: Vec<ProgressionRecord>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub closed_periods: BTreeSet<PeriodId>,
    #[serde(default)]
    pub next_sequence: u64,
}
