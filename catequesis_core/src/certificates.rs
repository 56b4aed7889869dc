//! Sacrament certificates.
//!
//! A certificate is issued on request for a progression record in which the
//! catechumen passed a level that prepares a sacrament. Numbers run per
//! sacrament and calendar year of issue; issuing twice for the same
//! enrollment returns the existing certificate.

use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

const VERIFICATION_CODE_LEN: usize = 16;

/// Issue the certificate for a closed, passed sacramental enrollment
pub fn issue_certificate(
    registry: &mut Registry,
    enrollment_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Certificate> {
    if let Some(existing) = registry
        .certificates
        .iter()
        .find(|c| c.enrollment_id == enrollment_id)
    {
        tracing::debug!("Certificate {} already issued", existing.number);
        return Ok(existing.clone());
    }

    let record = registry
        .progression
        .iter()
        .find(|r| r.enrollment_id == enrollment_id)
        .ok_or_else(|| {
            Error::InvalidTransition(format!(
                "enrollment {} has no progression record; close its period first",
                enrollment_id
            ))
        })?
        .clone();

    if record.outcome != Outcome::Passed {
        return Err(Error::InvalidTransition(format!(
            "enrollment {} ended {:?}, not Passed",
            enrollment_id, record.outcome
        )));
    }
    let sacrament = record.sacrament.ok_or_else(|| {
        Error::InvalidTransition(format!(
            "level {} does not prepare a sacrament",
            record.level_id
        ))
    })?;
    let parish_id = registry.group(record.group_id)?.parish_id.clone();

    let certificate = Certificate {
        number: next_number(registry, sacrament, now.year()),
        verification_code: new_verification_code(registry),
        catechumen_id: record.catechumen_id,
        parish_id,
        sacrament,
        level_id: record.level_id,
        period_id: record.period_id,
        enrollment_id,
        issued_at: now,
    };
    registry.certificates.push(certificate.clone());

    tracing::info!(
        "Issued certificate {} for catechumen {}",
        certificate.number,
        certificate.catechumen_id
    );
    Ok(certificate)
}

/// Look up a certificate by the code printed on it
pub fn verify_certificate<'a>(registry: &'a Registry, code: &str) -> Result<&'a Certificate> {
    let code = code.trim();
    registry
        .certificates
        .iter()
        .find(|c| c.verification_code.eq_ignore_ascii_case(code))
        .ok_or_else(|| Error::not_found("certificate", code))
}

/// `{code}{year}{counter:04}`, the counter starting at 1 per sacrament and year
fn next_number(registry: &Registry, sacrament: Sacrament, year: i32) -> String {
    let issued = registry
        .certificates
        .iter()
        .filter(|c| c.sacrament == sacrament && c.issued_at.year() == year)
        .count();
    format!("{}{}{:04}", sacrament.code(), year, issued + 1)
}

fn new_verification_code(registry: &Registry) -> String {
    loop {
        let code: String = Uuid::new_v4()
            .simple()
            .to_string()
            .to_uppercase()
            .chars()
            .take(VERIFICATION_CODE_LEN)
            .collect();
        if !registry
            .certificates
            .iter()
            .any(|c| c.verification_code == code)
        {
            return code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::{enroll, record_outcome};
    use crate::progression::close_period;
    use crate::test_support::*;
    use chrono::TimeZone;

    /// A child already at first communion, enrolled in a group of that level
    fn communion_enrollment(catalog: &Catalog, registry: &mut Registry, group: Uuid) -> Uuid {
        let child = child(registry, 8);
        if let Some(c) = registry.catechumens.get_mut(&child) {
            c.current_level = Some("first_communion".into());
        }
        enroll(catalog, registry, child, group, Utc::now()).unwrap().id
    }

    fn at(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 7, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_numbers_run_per_sacrament_and_year() {
        let (catalog, mut registry) = fixture();
        let group = group(&catalog, &mut registry, "first_communion", 10);
        let enrollments: Vec<Uuid> = (0..3)
            .map(|_| communion_enrollment(&catalog, &mut registry, group))
            .collect();
        for e in &enrollments {
            record_outcome(&mut registry, *e, Grade::Passed).unwrap();
        }
        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();

        let first = issue_certificate(&mut registry, enrollments[0], at(2025)).unwrap();
        let second = issue_certificate(&mut registry, enrollments[1], at(2025)).unwrap();
        let next_year = issue_certificate(&mut registry, enrollments[2], at(2026)).unwrap();

        assert_eq!(first.number, "COM20250001");
        assert_eq!(second.number, "COM20250002");
        assert_eq!(next_year.number, "COM20260001");
        assert_eq!(first.sacrament, Sacrament::FirstCommunion);
        assert_eq!(first.parish_id, "central");
        assert_ne!(first.verification_code, second.verification_code);
        assert_eq!(first.verification_code.len(), VERIFICATION_CODE_LEN);
    }

    #[test]
    fn test_issue_is_idempotent_per_enrollment() {
        let (catalog, mut registry) = fixture();
        let group = group(&catalog, &mut registry, "first_communion", 10);
        let enrollment = communion_enrollment(&catalog, &mut registry, group);
        record_outcome(&mut registry, enrollment, Grade::Passed).unwrap();
        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();

        let first = issue_certificate(&mut registry, enrollment, at(2025)).unwrap();
        let again = issue_certificate(&mut registry, enrollment, at(2026)).unwrap();

        assert_eq!(first, again);
        assert_eq!(registry.certificates.len(), 1);
    }

    #[test]
    fn test_only_passed_sacramental_records_qualify() {
        let (catalog, mut registry) = fixture();
        let prep = group(&catalog, &mut registry, "preparation", 10);
        let communion = group(&catalog, &mut registry, "first_communion", 10);
        let no_sacrament = child_enrolled(&catalog, &mut registry, prep);
        let failed = communion_enrollment(&catalog, &mut registry, communion);
        let open = communion_enrollment(&catalog, &mut registry, communion);
        record_outcome(&mut registry, no_sacrament, Grade::Passed).unwrap();
        record_outcome(&mut registry, failed, Grade::Failed).unwrap();
        record_outcome(&mut registry, open, Grade::Passed).unwrap();

        // Not closed yet
        assert!(matches!(
            issue_certificate(&mut registry, open, Utc::now()),
            Err(Error::InvalidTransition(_))
        ));

        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();
        assert!(matches!(
            issue_certificate(&mut registry, no_sacrament, Utc::now()),
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            issue_certificate(&mut registry, failed, Utc::now()),
            Err(Error::InvalidTransition(_))
        ));
        assert!(registry.certificates.is_empty());
    }

    #[test]
    fn test_verify_by_code() {
        let (catalog, mut registry) = fixture();
        let group = group(&catalog, &mut registry, "first_communion", 10);
        let enrollment = communion_enrollment(&catalog, &mut registry, group);
        record_outcome(&mut registry, enrollment, Grade::Passed).unwrap();
        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();
        let issued = issue_certificate(&mut registry, enrollment, at(2025)).unwrap();

        let found = verify_certificate(&registry, &issued.verification_code.to_lowercase()).unwrap();
        assert_eq!(found.number, issued.number);

        assert!(matches!(
            verify_certificate(&registry, "NOPE"),
            Err(Error::NotFound { kind: "certificate", .. })
        ));
    }
}
