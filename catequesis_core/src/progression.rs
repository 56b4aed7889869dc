//! Progression tracking at period close.
//!
//! Closing a period turns every graded enrollment into an append-only
//! progression record and moves catechumens along the level sequence:
//! - Passed: advance to the successor level, or `completed` after the final one
//! - Failed: stay at the same level, eligible to repeat next period
//! - Withdrawn: status was already set when the enrollment was withdrawn
//!
//! The close is computed on a staged copy of the registry and swapped in only
//! when every record has been produced.

use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Close a period and return its progression records
///
/// Closing an already-closed period is a no-op that returns the records
/// produced the first time.
pub fn close_period(
    catalog: &Catalog,
    registry: &mut Registry,
    period_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ProgressionRecord>> {
    catalog.period(period_id)?;

    if registry.is_closed(period_id) {
        tracing::debug!("Period {} already closed, returning stored records", period_id);
        return Ok(registry.period_records(period_id));
    }

    let ungraded = registry
        .period_enrollments(period_id)
        .iter()
        .filter(|e| e.outcome == Outcome::InProgress)
        .count();
    if ungraded > 0 {
        return Err(Error::UngradedEnrollment {
            period: period_id.to_string(),
            count: ungraded,
        });
    }

    let mut staged = registry.clone();
    let records = apply_outcomes(catalog, &mut staged, period_id, now).map_err(|e| {
        Error::ClosePeriodFailed {
            period: period_id.to_string(),
            reason: e.to_string(),
        }
    })?;
    staged.closed_periods.insert(period_id.to_string());
    *registry = staged;

    tracing::info!(
        "Closed period {}: {} progression record(s)",
        period_id,
        records.len()
    );
    Ok(records)
}

fn apply_outcomes(
    catalog: &Catalog,
    staged: &mut Registry,
    period_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ProgressionRecord>> {
    let enrollments: Vec<Enrollment> = staged
        .period_enrollments(period_id)
        .into_iter()
        .cloned()
        .collect();

    let mut records = Vec::with_capacity(enrollments.len());
    for enrollment in enrollments {
        let group = staged.group(enrollment.group_id)?;
        let level = catalog.level(&group.level_id)?;
        let group_id = group.id;

        let catechumen = staged
            .catechumens
            .get_mut(&enrollment.catechumen_id)
            .ok_or_else(|| Error::not_found("catechumen", enrollment.catechumen_id))?;

        let sacrament = match enrollment.outcome {
            Outcome::Passed => {
                // A catechumen already moved past this level keeps their place
                if catechumen.current_level.as_deref() == Some(level.id.as_str()) {
                    advance(catalog, catechumen, level);
                } else {
                    tracing::warn!(
                        "Catechumen {} passed {} but is at {:?}, level unchanged",
                        catechumen.id,
                        level.id,
                        catechumen.current_level
                    );
                }
                level.prepares_sacrament
            }
            Outcome::Failed => {
                tracing::debug!(
                    "Catechumen {} repeats level {}",
                    catechumen.id,
                    level.id
                );
                None
            }
            Outcome::Withdrawn => None,
            Outcome::InProgress => {
                return Err(Error::InvalidTransition(format!(
                    "enrollment {} is still in progress",
                    enrollment.id
                )))
            }
        };

        records.push(ProgressionRecord {
            catechumen_id: enrollment.catechumen_id,
            level_id: level.id.clone(),
            period_id: period_id.to_string(),
            group_id,
            enrollment_id: enrollment.id,
            outcome: enrollment.outcome,
            sacrament,
            recorded_at: now,
        });
    }

    staged.progression.extend(records.iter().cloned());
    Ok(records)
}

/// Move a catechumen past a passed level
fn advance(catalog: &Catalog, catechumen: &mut Catechumen, passed: &CatecheticalLevel) {
    match catalog.level_successor(passed) {
        Some(next) => {
            catechumen.current_level = Some(next.id.clone());
            tracing::debug!(
                "Catechumen {} advanced from {} to {}",
                catechumen.id,
                passed.id,
                next.id
            );
        }
        None => {
            catechumen.current_level = Some(passed.id.clone());
            catechumen.status = CatechumenStatus::Completed;
            tracing::info!(
                "Catechumen {} completed the final level {}",
                catechumen.id,
                passed.id
            );
        }
    }
}
