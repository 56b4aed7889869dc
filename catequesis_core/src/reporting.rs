//! Reporting and export service.
//!
//! Reports are read-only aggregations over the catalog and registry. Every
//! query names a parish, and the cache is keyed by the whole query, so a
//! cached report is never served to a different parish. Requests larger than
//! the configured row cap fail with `ExportTooLarge` instead of truncating;
//! callers page through large reports with [`Page`].

use crate::config::ReportsConfig;
use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

// ============================================================================
// Queries
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Outcome counts per (period, level); all closed periods when unset
    ProgressionSummary { period_id: Option<PeriodId> },
    /// Sessions attended per enrollment
    Attendance { period_id: PeriodId },
    /// Seats taken per group
    GroupOccupancy { period_id: PeriodId },
    /// Issued sacrament certificates; every period when unset
    Certificates { period_id: Option<PeriodId> },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReportQuery {
    pub parish_id: ParishId,
    pub kind: ReportKind,
    pub page: Option<Page>,
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ProgressionSummaryRow {
    pub period_id: PeriodId,
    pub level_rank: u32,
    pub level_id: LevelId,
    pub level_name: String,
    pub passed: usize,
    pub failed: usize,
    pub withdrawn: usize,
    pub sacrament: Option<Sacrament>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AttendanceRow {
    pub enrollment_id: Uuid,
    pub catechumen_id: Uuid,
    pub catechumen_name: String,
    pub group_name: String,
    pub sessions: usize,
    pub present: usize,
    pub attendance_percent: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OccupancyRow {
    pub group_id: Uuid,
    pub group_name: String,
    pub level_id: LevelId,
    pub capacity: u32,
    pub enrolled: u32,
    pub available: u32,
    pub occupancy_percent: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CertificateRow {
    pub number: String,
    pub verification_code: String,
    pub catechumen_id: Uuid,
    pub catechumen_name: String,
    pub sacrament: Sacrament,
    pub level_id: LevelId,
    pub period_id: PeriodId,
    pub issued_on: NaiveDate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReportRows {
    ProgressionSummary(Vec<ProgressionSummaryRow>),
    Attendance(Vec<AttendanceRow>),
    GroupOccupancy(Vec<OccupancyRow>),
    Certificates(Vec<CertificateRow>),
}

impl ReportRows {
    pub fn len(&self) -> usize {
        match self {
            ReportRows::ProgressionSummary(rows) => rows.len(),
            ReportRows::Attendance(rows) => rows.len(),
            ReportRows::GroupOccupancy(rows) => rows.len(),
            ReportRows::Certificates(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bounded report ready for export or external rendering
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub query: ReportQuery,
    /// Rows available before paging
    pub total_rows: usize,
    pub rows: ReportRows,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Building
// ============================================================================

/// Build a report, failing if the requested window exceeds `max_rows`
pub fn build_report(
    catalog: &Catalog,
    registry: &Registry,
    query: &ReportQuery,
    max_rows: usize,
) -> Result<Report> {
    let parish = catalog.parish(&query.parish_id)?;

    let rows = match &query.kind {
        ReportKind::ProgressionSummary { period_id } => {
            if let Some(id) = period_id {
                parish_period(catalog, &parish.id, id)?;
            }
            ReportRows::ProgressionSummary(progression_summary(
                catalog,
                registry,
                &parish.id,
                period_id.as_deref(),
            ))
        }
        ReportKind::Attendance { period_id } => {
            parish_period(catalog, &parish.id, period_id)?;
            ReportRows::Attendance(attendance(registry, &parish.id, period_id))
        }
        ReportKind::GroupOccupancy { period_id } => {
            parish_period(catalog, &parish.id, period_id)?;
            ReportRows::GroupOccupancy(occupancy(registry, &parish.id, period_id))
        }
        ReportKind::Certificates { period_id } => {
            if let Some(id) = period_id {
                parish_period(catalog, &parish.id, id)?;
            }
            ReportRows::Certificates(certificates(registry, &parish.id, period_id.as_deref()))
        }
    };

    let total_rows = rows.len();
    let (offset, requested) = match query.page {
        None => (0, total_rows),
        Some(page) => (
            page.offset,
            page.limit.min(total_rows.saturating_sub(page.offset)),
        ),
    };
    if requested > max_rows {
        return Err(Error::ExportTooLarge {
            requested,
            max: max_rows,
        });
    }

    Ok(Report {
        query: query.clone(),
        total_rows,
        rows: window(rows, offset, requested),
        generated_at: Utc::now(),
    })
}

fn parish_period<'a>(catalog: &'a Catalog, parish_id: &str, period_id: &str) -> Result<&'a Period> {
    let period = catalog.period(period_id)?;
    if period.parish_id != parish_id {
        return Err(Error::InvalidInput(format!(
            "period {} does not belong to parish {}",
            period_id, parish_id
        )));
    }
    Ok(period)
}

fn window(rows: ReportRows, offset: usize, len: usize) -> ReportRows {
    fn slice<T>(rows: Vec<T>, offset: usize, len: usize) -> Vec<T> {
        rows.into_iter().skip(offset).take(len).collect()
    }
    match rows {
        ReportRows::ProgressionSummary(r) => ReportRows::ProgressionSummary(slice(r, offset, len)),
        ReportRows::Attendance(r) => ReportRows::Attendance(slice(r, offset, len)),
        ReportRows::GroupOccupancy(r) => ReportRows::GroupOccupancy(slice(r, offset, len)),
        ReportRows::Certificates(r) => ReportRows::Certificates(slice(r, offset, len)),
    }
}

fn progression_summary(
    catalog: &Catalog,
    registry: &Registry,
    parish_id: &str,
    period_id: Option<&str>,
) -> Vec<ProgressionSummaryRow> {
    let parish_periods: Vec<&str> = catalog
        .periods
        .iter()
        .filter(|p| p.parish_id == parish_id)
        .filter(|p| period_id.map_or(true, |id| p.id == id))
        .map(|p| p.id.as_str())
        .collect();

    let mut buckets: BTreeMap<(String, u32), ProgressionSummaryRow> = BTreeMap::new();
    for record in registry
        .progression
        .iter()
        .filter(|r| parish_periods.contains(&r.period_id.as_str()))
    {
        let Ok(level) = catalog.level(&record.level_id) else {
            tracing::warn!(
                "Progression record references unknown level {}",
                record.level_id
            );
            continue;
        };
        let row = buckets
            .entry((record.period_id.clone(), level.rank))
            .or_insert_with(|| ProgressionSummaryRow {
                period_id: record.period_id.clone(),
                level_rank: level.rank,
                level_id: level.id.clone(),
                level_name: level.name.clone(),
                passed: 0,
                failed: 0,
                withdrawn: 0,
                sacrament: level.prepares_sacrament,
            });
        match record.outcome {
            Outcome::Passed => row.passed += 1,
            Outcome::Failed => row.failed += 1,
            Outcome::Withdrawn => row.withdrawn += 1,
            Outcome::InProgress => {}
        }
    }
    buckets.into_values().collect()
}

fn attendance(registry: &Registry, parish_id: &str, period_id: &str) -> Vec<AttendanceRow> {
    let mut rows: Vec<AttendanceRow> = registry
        .period_enrollments(period_id)
        .into_iter()
        .filter_map(|e| {
            let group = registry.groups.get(&e.group_id)?;
            if group.parish_id != parish_id {
                return None;
            }
            let catechumen = registry.catechumens.get(&e.catechumen_id)?;
            let (sessions, present) = registry
                .enrollment_attendance(e.id)
                .fold((0, 0), |(s, p), a| (s + 1, p + a.present as usize));
            Some(AttendanceRow {
                enrollment_id: e.id,
                catechumen_id: catechumen.id,
                catechumen_name: catechumen.full_name.clone(),
                group_name: group.name.clone(),
                sessions,
                present,
                attendance_percent: percent(present, sessions),
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        (&a.group_name, &a.catechumen_name, a.enrollment_id)
            .cmp(&(&b.group_name, &b.catechumen_name, b.enrollment_id))
    });
    rows
}

fn occupancy(registry: &Registry, parish_id: &str, period_id: &str) -> Vec<OccupancyRow> {
    let mut rows: Vec<OccupancyRow> = registry
        .groups
        .values()
        .filter(|g| g.parish_id == parish_id && g.period_id == period_id)
        .map(|g| {
            let enrolled = registry.enrolled_count(g.id);
            OccupancyRow {
                group_id: g.id,
                group_name: g.name.clone(),
                level_id: g.level_id.clone(),
                capacity: g.capacity,
                enrolled,
                available: g.capacity.saturating_sub(enrolled),
                occupancy_percent: percent(enrolled as usize, g.capacity as usize),
            }
        })
        .collect();
    rows.sort_by(|a, b| (&a.group_name, a.group_id).cmp(&(&b.group_name, b.group_id)));
    rows
}

fn certificates(registry: &Registry, parish_id: &str, period_id: Option<&str>) -> Vec<CertificateRow> {
    let mut rows: Vec<CertificateRow> = registry
        .certificates
        .iter()
        .filter(|c| c.parish_id == parish_id)
        .filter(|c| period_id.map_or(true, |id| c.period_id == id))
        .map(|c| CertificateRow {
            number: c.number.clone(),
            verification_code: c.verification_code.clone(),
            catechumen_id: c.catechumen_id,
            catechumen_name: registry
                .catechumens
                .get(&c.catechumen_id)
                .map(|x| x.full_name.clone())
                .unwrap_or_default(),
            sacrament: c.sacrament,
            level_id: c.level_id.clone(),
            period_id: c.period_id.clone(),
            issued_on: c.issued_at.date_naive(),
        })
        .collect();
    rows.sort_by(|a, b| a.number.cmp(&b.number));
    rows
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

// ============================================================================
// Cached service
// ============================================================================

struct CachedReport {
    report: Arc<Report>,
    cached_at: Instant,
}

/// Bounded, TTL-cached report runner
pub struct ReportService {
    max_rows: usize,
    ttl: Duration,
    max_entries: usize,
    cache: RwLock<HashMap<ReportQuery, CachedReport>>,
}

impl ReportService {
    pub fn new(config: &ReportsConfig) -> Self {
        Self {
            max_rows: config.max_export_rows,
            ttl: Duration::from_secs(config.cache_ttl_seconds),
            max_entries: config.cache_max_entries,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Serve a fresh cached report or build and cache a new one
    pub fn run(
        &self,
        catalog: &Catalog,
        registry: &Registry,
        query: &ReportQuery,
    ) -> Result<Arc<Report>> {
        if let Some(report) = self.cached(query) {
            tracing::debug!("Report cache hit for parish {}", query.parish_id);
            return Ok(report);
        }

        let report = Arc::new(build_report(catalog, registry, query, self.max_rows)?);
        self.store(query, Arc::clone(&report));
        Ok(report)
    }

    fn cached(&self, query: &ReportQuery) -> Option<Arc<Report>> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(query)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(Arc::clone(&entry.report))
        } else {
            None
        }
    }

    fn store(&self, query: &ReportQuery, report: Arc<Report>) {
        if self.max_entries == 0 || self.ttl.is_zero() {
            return;
        }
        let Ok(mut cache) = self.cache.write() else {
            tracing::warn!("Report cache lock poisoned, skipping cache");
            return;
        };

        let ttl = self.ttl;
        cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
        while cache.len() >= self.max_entries {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.cached_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    cache.remove(&key);
                }
                None => break,
            }
        }
        cache.insert(
            query.clone(),
            CachedReport {
                report,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every cached report of a parish
    pub fn invalidate_parish(&self, parish_id: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|query, _| query.parish_id != parish_id);
        }
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

// ============================================================================
// Export
// ============================================================================

/// Write a report's rows as CSV, synced to disk; returns the row count
pub fn write_csv(report: &Report, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    match &report.rows {
        ReportRows::ProgressionSummary(rows) => {
            for row in rows {
                writer.serialize(row)?;
            }
        }
        ReportRows::Attendance(rows) => {
            for row in rows {
                writer.serialize(row)?;
            }
        }
        ReportRows::GroupOccupancy(rows) => {
            for row in rows {
                writer.serialize(row)?;
            }
        }
        ReportRows::Certificates(rows) => {
            for row in rows {
                writer.serialize(row)?;
            }
        }
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Exported {} rows to {:?}", report.rows.len(), path);
    Ok(report.rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::issue_certificate;
    use crate::enrollment::{enroll, mark_attendance, record_outcome};
    use crate::progression::close_period;
    use crate::test_support::*;

    fn summary(parish: &str) -> ReportQuery {
        ReportQuery {
            parish_id: parish.into(),
            kind: ReportKind::ProgressionSummary { period_id: None },
            page: None,
        }
    }

    fn occupancy_query(page: Option<Page>) -> ReportQuery {
        ReportQuery {
            parish_id: "central".into(),
            kind: ReportKind::GroupOccupancy {
                period_id: "2024".into(),
            },
            page,
        }
    }

    fn with_second_parish(catalog: &mut Catalog) {
        catalog
            .add_parish(Parish {
                id: "norte".into(),
                name: "Parroquia Norte".into(),
                default_capacity: Some(20),
            })
            .unwrap();
    }

    #[test]
    fn test_progression_summary_counts() {
        let (catalog, mut registry) = fixture();
        let g = group(&catalog, &mut registry, "preparation", 10);
        for grade in [Grade::Passed, Grade::Passed, Grade::Failed] {
            let e = child_enrolled(&catalog, &mut registry, g);
            record_outcome(&mut registry, e, grade).unwrap();
        }
        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();

        let report = build_report(&catalog, &registry, &summary("central"), 100).unwrap();
        match report.rows {
            ReportRows::ProgressionSummary(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].level_id, "preparation");
                assert_eq!((rows[0].passed, rows[0].failed, rows[0].withdrawn), (2, 1, 0));
            }
            other => panic!("unexpected rows {:?}", other),
        }
    }

    #[test]
    fn test_export_too_large_is_not_truncated() {
        let (catalog, mut registry) = fixture();
        for _ in 0..3 {
            group(&catalog, &mut registry, "preparation", 10);
        }

        let result = build_report(&catalog, &registry, &occupancy_query(None), 2);
        assert!(matches!(
            result,
            Err(Error::ExportTooLarge { requested: 3, max: 2 })
        ));

        let page = Some(Page { offset: 2, limit: 2 });
        let report = build_report(&catalog, &registry, &occupancy_query(page), 2).unwrap();
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.rows.len(), 1);
    }

    #[test]
    fn test_occupancy_rows() {
        let (catalog, mut registry) = fixture();
        let g = group(&catalog, &mut registry, "preparation", 4);
        child_enrolled(&catalog, &mut registry, g);

        let report = build_report(&catalog, &registry, &occupancy_query(None), 100).unwrap();
        match report.rows {
            ReportRows::GroupOccupancy(rows) => {
                assert_eq!(rows[0].enrolled, 1);
                assert_eq!(rows[0].available, 3);
                assert_eq!(rows[0].occupancy_percent, 25.0);
            }
            other => panic!("unexpected rows {:?}", other),
        }
    }

    #[test]
    fn test_attendance_rate() {
        let (catalog, mut registry) = fixture();
        let g = group(&catalog, &mut registry, "preparation", 4);
        let e = child_enrolled(&catalog, &mut registry, g);
        mark_attendance(&catalog, &mut registry, e, date(2024, 9, 7), true).unwrap();
        mark_attendance(&catalog, &mut registry, e, date(2024, 9, 14), false).unwrap();

        let query = ReportQuery {
            parish_id: "central".into(),
            kind: ReportKind::Attendance {
                period_id: "2024".into(),
            },
            page: None,
        };
        let report = build_report(&catalog, &registry, &query, 100).unwrap();
        match report.rows {
            ReportRows::Attendance(rows) => {
                assert_eq!((rows[0].sessions, rows[0].present), (2, 1));
                assert_eq!(rows[0].attendance_percent, 50.0);
            }
            other => panic!("unexpected rows {:?}", other),
        }
    }

    #[test]
    fn test_period_of_other_parish_rejected() {
        let (mut catalog, registry) = fixture();
        with_second_parish(&mut catalog);
        let query = ReportQuery {
            parish_id: "norte".into(),
            kind: ReportKind::GroupOccupancy {
                period_id: "2024".into(),
            },
            page: None,
        };
        assert!(matches!(
            build_report(&catalog, &registry, &query, 100),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cache_isolated_per_parish() {
        let (mut catalog, mut registry) = fixture();
        with_second_parish(&mut catalog);
        let g = group(&catalog, &mut registry, "preparation", 10);
        let e = child_enrolled(&catalog, &mut registry, g);
        record_outcome(&mut registry, e, Grade::Passed).unwrap();
        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();

        let service = ReportService::new(&ReportsConfig::default());
        let central = service.run(&catalog, &registry, &summary("central")).unwrap();
        let norte = service.run(&catalog, &registry, &summary("norte")).unwrap();

        assert_eq!(central.rows.len(), 1);
        assert!(norte.rows.is_empty());
        assert_eq!(service.cached_entries(), 2);

        service.invalidate_parish("central");
        assert_eq!(service.cached_entries(), 1);
    }

    #[test]
    fn test_cache_serves_within_ttl() {
        let (catalog, mut registry) = fixture();
        let service = ReportService::new(&ReportsConfig::default());
        let first = service.run(&catalog, &registry, &occupancy_query(None)).unwrap();

        group(&catalog, &mut registry, "preparation", 10);
        let second = service.run(&catalog, &registry, &occupancy_query(None)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.rows.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let (catalog, mut registry) = fixture();
        let service = ReportService::new(&ReportsConfig {
            cache_ttl_seconds: 0,
            ..ReportsConfig::default()
        });
        service.run(&catalog, &registry, &occupancy_query(None)).unwrap();
        group(&catalog, &mut registry, "preparation", 10);

        let fresh = service.run(&catalog, &registry, &occupancy_query(None)).unwrap();
        assert_eq!(fresh.rows.len(), 1);
        assert_eq!(service.cached_entries(), 0);
    }

    #[test]
    fn test_cache_bounded_by_entries() {
        let (catalog, registry) = fixture();
        let service = ReportService::new(&ReportsConfig {
            cache_max_entries: 2,
            ..ReportsConfig::default()
        });
        for offset in 0..5 {
            let page = Some(Page { offset, limit: 10 });
            service.run(&catalog, &registry, &occupancy_query(page)).unwrap();
        }
        assert_eq!(service.cached_entries(), 2);
    }

    #[test]
    fn test_certificates_scoped_to_parish_and_period() {
        let (mut catalog, mut registry) = fixture();
        with_second_parish(&mut catalog);
        let g = group(&catalog, &mut registry, "first_communion", 10);
        let child = child(&mut registry, 8);
        if let Some(c) = registry.catechumens.get_mut(&child) {
            c.current_level = Some("first_communion".into());
        }
        let e = enroll(&catalog, &mut registry, child, g, Utc::now()).unwrap().id;
        record_outcome(&mut registry, e, Grade::Passed).unwrap();
        close_period(&catalog, &mut registry, "2024", Utc::now()).unwrap();
        let issued = issue_certificate(&mut registry, e, Utc::now()).unwrap();

        let query = |parish: &str, period_id: Option<&str>| ReportQuery {
            parish_id: parish.into(),
            kind: ReportKind::Certificates {
                period_id: period_id.map(Into::into),
            },
            page: None,
        };
        let report = build_report(&catalog, &registry, &query("central", Some("2024")), 100).unwrap();
        match report.rows {
            ReportRows::Certificates(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].number, issued.number);
                assert_eq!(rows[0].catechumen_name, "Niño de prueba");
                assert_eq!(rows[0].sacrament, Sacrament::FirstCommunion);
            }
            other => panic!("unexpected rows {:?}", other),
        }

        let norte = build_report(&catalog, &registry, &query("norte", None), 100).unwrap();
        assert!(norte.rows.is_empty());
    }

    #[test]
    fn test_write_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("exports").join("occupancy.csv");
        let (catalog, mut registry) = fixture();
        group(&catalog, &mut registry, "preparation", 10);
        group(&catalog, &mut registry, "preparation", 12);

        let report = build_report(&catalog, &registry, &occupancy_query(None), 100).unwrap();
        let written = write_csv(&report, &path).unwrap();
        assert_eq!(written, 2);

        let reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.into_records().count(), 2);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("group_id,group_name,level_id,capacity"));
    }
}
