//! Enrollment engine: intake, group assignment, grading and withdrawal.
//!
//! These functions operate on a borrowed catalog and registry and assume the
//! caller holds the registry exclusively for the duration of the call (see
//! [`crate::office::Office`]), so each capacity check and the insertion that
//! follows it form one indivisible step.
//!
//! ## Enrollment preconditions
//!
//! Checked in a fixed order, the first failure wins:
//!
//! 1. **Status**: the catechumen must be `active`
//! 2. **Age**: age at period start within the level's window
//! 3. **Level**: the group's level is the catechumen's expected level
//! 4. **Capacity**: enrolled count strictly below capacity
//! 5. **Duplicate**: no other live enrollment in any period still open

use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Parameters for a new group
#[derive(Clone, Debug)]
pub struct NewGroup {
    pub name: String,
    pub parish_id: ParishId,
    pub level_id: LevelId,
    pub period_id: PeriodId,
    /// Parish default when unset
    pub capacity: Option<u32>,
}

/// Register a catechumen at intake, before any level is assigned
pub fn register_catechumen(
    registry: &mut Registry,
    full_name: &str,
    birth_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Catechumen> {
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(Error::InvalidInput("catechumen name is empty".into()));
    }
    if birth_date > now.date_naive() {
        return Err(Error::InvalidInput(format!(
            "birth date {} is in the future",
            birth_date
        )));
    }

    let catechumen = Catechumen {
        id: Uuid::new_v4(),
        full_name: full_name.to_string(),
        birth_date,
        current_level: None,
        status: CatechumenStatus::Active,
        registered_at: now,
    };
    registry
        .catechumens
        .insert(catechumen.id, catechumen.clone());

    tracing::info!("Registered catechumen {}", catechumen.id);
    Ok(catechumen)
}

/// Open a group for a level within one of the parish's periods
pub fn create_group(
    catalog: &Catalog,
    registry: &mut Registry,
    new: NewGroup,
    now: DateTime<Utc>,
) -> Result<Group> {
    let parish = catalog.parish(&new.parish_id)?;
    catalog.level(&new.level_id)?;
    let period = catalog.period(&new.period_id)?;

    if period.parish_id != parish.id {
        return Err(Error::InvalidInput(format!(
            "period {} belongs to parish {}, not {}",
            period.id, period.parish_id, parish.id
        )));
    }
    if registry.is_closed(&period.id) {
        return Err(Error::PeriodClosed(period.id.clone()));
    }
    if new.name.trim().is_empty() {
        return Err(Error::InvalidInput("group name is empty".into()));
    }

    let capacity = new
        .capacity
        .unwrap_or_else(|| catalog.default_capacity(parish));
    if capacity == 0 {
        return Err(Error::InvalidInput("group capacity must be positive".into()));
    }

    let group = Group {
        id: Uuid::new_v4(),
        name: new.name.trim().to_string(),
        parish_id: new.parish_id,
        level_id: new.level_id,
        period_id: new.period_id,
        capacity,
        created_at: now,
    };
    registry.groups.insert(group.id, group.clone());

    tracing::info!(
        "Created group {} ({}) for level {} in period {}, capacity {}",
        group.id,
        group.name,
        group.level_id,
        group.period_id,
        group.capacity
    );
    Ok(group)
}

/// The level a catechumen must be enrolled at next
pub fn expected_level<'a>(
    catalog: &'a Catalog,
    catechumen: &Catechumen,
) -> Result<&'a CatecheticalLevel> {
    match &catechumen.current_level {
        Some(id) => catalog.level(id),
        None => catalog.first_level().ok_or_else(|| {
            Error::CatalogInvariantViolation("catalog has no level of rank 1".into())
        }),
    }
}

/// Run the ordered enrollment preconditions without mutating anything
pub fn check_eligibility(
    catalog: &Catalog,
    registry: &Registry,
    catechumen_id: Uuid,
    group_id: Uuid,
) -> Result<()> {
    let catechumen = registry.catechumen(catechumen_id)?;
    let group = registry.group(group_id)?;
    let period = catalog.period(&group.period_id)?;
    let level = catalog.level(&group.level_id)?;

    if registry.is_closed(&period.id) {
        return Err(Error::PeriodClosed(period.id.clone()));
    }

    // 1. Status
    if catechumen.status != CatechumenStatus::Active {
        return Err(Error::IneligibleStatus {
            catechumen: catechumen.id,
            status: catechumen.status,
        });
    }

    // 2. Age at period start
    let (min, max) = catalog.age_window(level);
    let age = catechumen.age_on(period.starts_on);
    if age < min || age > max {
        return Err(Error::AgeOutOfRange {
            catechumen: catechumen.id,
            level: level.id.clone(),
            age,
            min,
            max,
        });
    }

    // 3. Level
    let expected = expected_level(catalog, catechumen)?;
    if expected.id != level.id {
        return Err(Error::LevelMismatch {
            catechumen: catechumen.id,
            expected: expected.id.clone(),
            actual: level.id.clone(),
        });
    }

    // 4. Capacity, strict
    if registry.enrolled_count(group.id) >= group.capacity {
        return Err(Error::GroupFull {
            group: group.id,
            capacity: group.capacity,
        });
    }

    // 5. One live enrollment at a time, across overlapping open periods
    if let Some(existing) = registry.open_enrollment(catechumen.id) {
        return Err(Error::DuplicateEnrollment {
            catechumen: catechumen.id,
            period: existing.period_id.clone(),
            existing: existing.id,
        });
    }

    Ok(())
}

/// Enroll a catechumen into a group
///
/// On success the enrollment is `in_progress` and holds a seat.
pub fn enroll(
    catalog: &Catalog,
    registry: &mut Registry,
    catechumen_id: Uuid,
    group_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Enrollment> {
    check_eligibility(catalog, registry, catechumen_id, group_id)?;

    let group = registry.group(group_id)?.clone();
    let enrollment = Enrollment {
        id: Uuid::new_v4(),
        catechumen_id,
        group_id,
        period_id: group.period_id.clone(),
        sequence: registry.take_sequence(),
        enrolled_at: now,
        outcome: Outcome::InProgress,
    };
    registry
        .enrollments
        .insert(enrollment.id, enrollment.clone());

    if let Some(catechumen) = registry.catechumens.get_mut(&catechumen_id) {
        if catechumen.current_level.is_none() {
            catechumen.current_level = Some(group.level_id.clone());
        }
    }

    tracing::info!(
        "Enrolled catechumen {} in group {} (seq {}, {}/{})",
        catechumen_id,
        group_id,
        enrollment.sequence,
        registry.enrolled_count(group_id),
        group.capacity
    );
    Ok(enrollment)
}

/// Withdraw an in-progress enrollment; the catechumen becomes `withdrawn`
pub fn unenroll(registry: &mut Registry, enrollment_id: Uuid) -> Result<Enrollment> {
    let enrollment = registry.enrollment(enrollment_id)?;
    if enrollment.outcome != Outcome::InProgress {
        return Err(Error::InvalidTransition(format!(
            "enrollment {} is {:?}, only in-progress enrollments can be withdrawn",
            enrollment_id, enrollment.outcome
        )));
    }
    let catechumen_id = enrollment.catechumen_id;

    let enrollment = registry
        .enrollments
        .get_mut(&enrollment_id)
        .ok_or_else(|| Error::not_found("enrollment", enrollment_id))?;
    enrollment.outcome = Outcome::Withdrawn;
    let enrollment = enrollment.clone();

    if let Some(catechumen) = registry.catechumens.get_mut(&catechumen_id) {
        catechumen.status = CatechumenStatus::Withdrawn;
    }

    tracing::info!(
        "Withdrew enrollment {} (catechumen {})",
        enrollment_id,
        catechumen_id
    );
    Ok(enrollment)
}

/// Record the administrative grade of an enrollment before its period closes
///
/// Re-grading replaces the previous grade.
pub fn record_outcome(
    registry: &mut Registry,
    enrollment_id: Uuid,
    grade: Grade,
) -> Result<Enrollment> {
    let enrollment = registry.enrollment(enrollment_id)?;
    if registry.is_closed(&enrollment.period_id) {
        return Err(Error::PeriodClosed(enrollment.period_id.clone()));
    }
    if enrollment.outcome == Outcome::Withdrawn {
        return Err(Error::InvalidTransition(format!(
            "enrollment {} was withdrawn and cannot be graded",
            enrollment_id
        )));
    }

    let enrollment = registry
        .enrollments
        .get_mut(&enrollment_id)
        .ok_or_else(|| Error::not_found("enrollment", enrollment_id))?;
    enrollment.outcome = grade.into();

    tracing::debug!("Graded enrollment {} as {:?}", enrollment_id, grade);
    Ok(enrollment.clone())
}

/// Move an in-progress enrollment to another group of the same period and level
pub fn transfer(
    registry: &mut Registry,
    enrollment_id: Uuid,
    target_group_id: Uuid,
) -> Result<Enrollment> {
    let enrollment = registry.enrollment(enrollment_id)?;
    if enrollment.outcome != Outcome::InProgress {
        return Err(Error::InvalidTransition(format!(
            "enrollment {} is {:?}, only in-progress enrollments can be transferred",
            enrollment_id, enrollment.outcome
        )));
    }
    if enrollment.group_id == target_group_id {
        return Err(Error::InvalidInput(
            "cannot transfer an enrollment to its own group".into(),
        ));
    }

    let source = registry.group(enrollment.group_id)?;
    let target = registry.group(target_group_id)?;
    if target.period_id != source.period_id || target.level_id != source.level_id {
        return Err(Error::InvalidInput(format!(
            "group {} is not in the same period and level as group {}",
            target.id, source.id
        )));
    }
    if registry.enrolled_count(target.id) >= target.capacity {
        return Err(Error::GroupFull {
            group: target.id,
            capacity: target.capacity,
        });
    }
    let from = source.id;

    let enrollment = registry
        .enrollments
        .get_mut(&enrollment_id)
        .ok_or_else(|| Error::not_found("enrollment", enrollment_id))?;
    enrollment.group_id = target_group_id;

    tracing::info!(
        "Transferred enrollment {} from group {} to group {}",
        enrollment_id,
        from,
        target_group_id
    );
    Ok(enrollment.clone())
}

/// Administratively suspend an active catechumen
pub fn suspend(registry: &mut Registry, catechumen_id: Uuid) -> Result<Catechumen> {
    let catechumen = registry
        .catechumens
        .get_mut(&catechumen_id)
        .ok_or_else(|| Error::not_found("catechumen", catechumen_id))?;
    if catechumen.status != CatechumenStatus::Active {
        return Err(Error::InvalidTransition(format!(
            "catechumen {} is {:?}, only active catechumens can be suspended",
            catechumen_id, catechumen.status
        )));
    }
    catechumen.status = CatechumenStatus::Suspended;
    tracing::info!("Suspended catechumen {}", catechumen_id);
    Ok(catechumen.clone())
}

/// Administratively reset a withdrawn or suspended catechumen to `active`
///
/// This is the only way back to enrollment eligibility; `enroll` never
/// reactivates implicitly.
pub fn reactivate(registry: &mut Registry, catechumen_id: Uuid) -> Result<Catechumen> {
    let catechumen = registry
        .catechumens
        .get_mut(&catechumen_id)
        .ok_or_else(|| Error::not_found("catechumen", catechumen_id))?;
    let status = catechumen.status;
    match status {
        CatechumenStatus::Withdrawn | CatechumenStatus::Suspended => {
            catechumen.status = CatechumenStatus::Active;
            tracing::info!("Reactivated catechumen {}", catechumen_id);
            Ok(catechumen.clone())
        }
        status => Err(Error::InvalidTransition(format!(
            "catechumen {} is {:?} and cannot be reactivated",
            catechumen_id, status
        ))),
    }
}

/// Remove a group together with its enrollments
///
/// Only allowed while the period is open and none of the group's enrollments
/// has been graded.
pub fn remove_group(registry: &mut Registry, group_id: Uuid) -> Result<Vec<Enrollment>> {
    let group = registry.group(group_id)?;
    if registry.is_closed(&group.period_id) {
        return Err(Error::PeriodClosed(group.period_id.clone()));
    }
    if registry.group_enrollments(group_id).iter().any(|e| e.is_graded()) {
        return Err(Error::InvalidTransition(format!(
            "group {} has graded enrollments and cannot be removed",
            group_id
        )));
    }

    let removed: Vec<Enrollment> = registry
        .group_enrollments(group_id)
        .into_iter()
        .cloned()
        .collect();
    for enrollment in &removed {
        registry.enrollments.remove(&enrollment.id);
    }
    registry
        .attendance
        .retain(|a| !removed.iter().any(|e| e.id == a.enrollment_id));
    registry.groups.remove(&group_id);

    tracing::info!(
        "Removed group {} and {} enrollment(s)",
        group_id,
        removed.len()
    );
    Ok(removed)
}

/// Record presence or absence at one session of an in-progress enrollment
pub fn mark_attendance(
    catalog: &Catalog,
    registry: &mut Registry,
    enrollment_id: Uuid,
    session_date: NaiveDate,
    present: bool,
) -> Result<AttendanceRecord> {
    let enrollment = registry.enrollment(enrollment_id)?;
    if registry.is_closed(&enrollment.period_id) {
        return Err(Error::PeriodClosed(enrollment.period_id.clone()));
    }
    if enrollment.outcome != Outcome::InProgress {
        return Err(Error::InvalidTransition(format!(
            "enrollment {} is {:?}, attendance is only taken while in progress",
            enrollment_id, enrollment.outcome
        )));
    }
    let period = catalog.period(&enrollment.period_id)?;
    if !period.contains(session_date) {
        return Err(Error::InvalidInput(format!(
            "session date {} is outside period {} ({} to {})",
            session_date, period.id, period.starts_on, period.ends_on
        )));
    }

    let record = AttendanceRecord {
        enrollment_id,
        session_date,
        present,
    };
    match registry
        .attendance
        .iter_mut()
        .find(|a| a.enrollment_id == enrollment_id && a.session_date == session_date)
    {
        Some(existing) => existing.present = present,
        None => registry.attendance.push(record.clone()),
    }
    Ok(record)
}
