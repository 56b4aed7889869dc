//! The parish office: one entry point for every catalog edit, registry
//! mutation and report.
//!
//! Lock order is always catalog, then registry. Writers hold the registry
//! write lock for the whole check, insert and commit, so at a capacity
//! boundary the caller that acquires the lock first takes the seat and
//! receives the lower sequence number. Each mutation runs on a staged copy
//! that replaces the in-memory registry only after the store accepted it.

use crate::catalog::build_default_catalog;
use crate::certificates;
use crate::enrollment::{self, NewGroup};
use crate::journal::{DomainEvent, EventSink, JsonlEventSink};
use crate::progression;
use crate::reporting::{self, Report, ReportQuery, ReportService};
use crate::store::{commit_with_retry, DataDirLock, JsonStateStore, StateStore};
use crate::types::*;
use crate::{Config, Error, Result};
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

pub struct Office {
    config: Config,
    catalog_path: Option<PathBuf>,
    catalog: RwLock<Catalog>,
    registry: RwLock<Registry>,
    store: Box<dyn StateStore>,
    events: Box<dyn EventSink>,
    reports: ReportService,
    _dir_lock: Option<DataDirLock>,
}

impl Office {
    /// Open the office over the configured data directory
    ///
    /// Falls back to the built-in catalog when no catalog file exists yet.
    pub fn open(config: Config) -> Result<Self> {
        let dir_lock = DataDirLock::acquire(&config.data.data_dir)?;
        let catalog_path = config.data.catalog_path();
        let catalog = if catalog_path.exists() {
            Catalog::load_from(&catalog_path, config.catalog_config())?
        } else {
            tracing::info!(
                "No catalog at {:?}, using built-in catalog",
                catalog_path
            );
            build_default_catalog().with_config(config.catalog_config())
        };

        let store = JsonStateStore::new(config.data.registry_path());
        let events = JsonlEventSink::new(config.data.events_path());
        let mut office = Self::with_parts(config, catalog, Box::new(store), Box::new(events))?;
        office.catalog_path = Some(catalog_path);
        office._dir_lock = Some(dir_lock);
        Ok(office)
    }

    /// Assemble an office from explicit collaborators; catalog edits stay in memory
    pub fn with_parts(
        config: Config,
        catalog: Catalog,
        store: Box<dyn StateStore>,
        events: Box<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = store.load()?.unwrap_or_default();
        let reports = ReportService::new(&config.reports);

        Ok(Self {
            config,
            catalog_path: None,
            catalog: RwLock::new(catalog),
            registry: RwLock::new(registry),
            store,
            events,
            reports,
            _dir_lock: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ------------------------------------------------------------------
    // Locking and commit plumbing
    // ------------------------------------------------------------------

    // Mutations never touch the live value before commit, so a poisoned
    // lock still guards a consistent state.
    fn catalog_read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn catalog_write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a registry mutation on a staged copy and commit it
    fn mutate<T>(&self, op: impl FnOnce(&Catalog, &mut Registry) -> Result<T>) -> Result<T> {
        let catalog = self.catalog_read();
        let mut registry = self.registry_write();

        let mut staged = registry.clone();
        let out = op(&catalog, &mut staged)?;
        commit_with_retry(self.store.as_ref(), &staged, self.config.retry_policy())?;
        *registry = staged;
        Ok(out)
    }

    /// Apply a catalog edit, persisting the catalog file when one is attached
    fn edit_catalog<T>(&self, edit: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let mut catalog = self.catalog_write();
        let mut staged = catalog.clone();
        let out = edit(&mut staged)?;
        if let Some(path) = &self.catalog_path {
            staged.save_to(path)?;
        }
        *catalog = staged;
        Ok(out)
    }

    fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(&event) {
            tracing::warn!("Failed to publish {:?}: {}", event, e);
        }
    }

    // ------------------------------------------------------------------
    // Catalog administration
    // ------------------------------------------------------------------

    /// Write the current catalog to the attached catalog file
    pub fn save_catalog(&self) -> Result<()> {
        match &self.catalog_path {
            Some(path) => self.catalog_read().save_to(path),
            None => Ok(()),
        }
    }

    pub fn add_parish(&self, parish: Parish) -> Result<()> {
        self.edit_catalog(|catalog| catalog.add_parish(parish))
    }

    pub fn update_parish(&self, parish: Parish) -> Result<()> {
        let id = parish.id.clone();
        self.edit_catalog(|catalog| catalog.update_parish(parish))?;
        self.reports.invalidate_parish(&id);
        Ok(())
    }

    pub fn add_level(&self, level: CatecheticalLevel) -> Result<()> {
        self.edit_catalog(|catalog| catalog.add_level(level))
    }

    /// Levels are shared by every parish, so every cached report is dropped
    pub fn update_level(&self, level: CatecheticalLevel) -> Result<()> {
        self.edit_catalog(|catalog| catalog.update_level(level))?;
        self.reports.invalidate_all();
        Ok(())
    }

    /// Remove the highest-ranked level, provided nothing in the registry uses it
    pub fn remove_level(&self, level_id: &str) -> Result<CatecheticalLevel> {
        let mut catalog = self.catalog_write();
        {
            let registry = self.registry_read();
            let in_use = registry.groups.values().any(|g| g.level_id == level_id)
                || registry
                    .catechumens
                    .values()
                    .any(|c| c.current_level.as_deref() == Some(level_id))
                || registry.progression.iter().any(|r| r.level_id == level_id);
            if in_use {
                return Err(Error::CatalogInvariantViolation(format!(
                    "level {} is referenced by the registry",
                    level_id
                )));
            }
        }

        let mut staged = catalog.clone();
        let removed = staged.remove_level(level_id)?;
        if let Some(path) = &self.catalog_path {
            staged.save_to(path)?;
        }
        *catalog = staged;
        Ok(removed)
    }

    pub fn add_period(&self, period: Period) -> Result<()> {
        self.edit_catalog(|catalog| catalog.add_period(period))
    }

    // ------------------------------------------------------------------
    // Registry mutations
    // ------------------------------------------------------------------

    pub fn register_catechumen(&self, full_name: &str, birth_date: NaiveDate) -> Result<Catechumen> {
        let now = Utc::now();
        self.mutate(|_, registry| {
            enrollment::register_catechumen(registry, full_name, birth_date, now)
        })
    }

    pub fn create_group(&self, new: NewGroup) -> Result<Group> {
        let now = Utc::now();
        let group = self.mutate(|catalog, registry| {
            enrollment::create_group(catalog, registry, new, now)
        })?;
        self.reports.invalidate_parish(&group.parish_id);
        Ok(group)
    }

    /// Remove a group and return the enrollments that went with it
    pub fn remove_group(&self, group_id: Uuid) -> Result<Vec<Enrollment>> {
        let (removed, parish) = self.mutate(|_, registry| {
            let parish = registry.group(group_id)?.parish_id.clone();
            Ok((enrollment::remove_group(registry, group_id)?, parish))
        })?;
        self.reports.invalidate_parish(&parish);
        Ok(removed)
    }

    pub fn enroll(&self, catechumen_id: Uuid, group_id: Uuid) -> Result<Enrollment> {
        let now = Utc::now();
        let (enrollment, parish) = self.mutate(|catalog, registry| {
            let enrollment = enrollment::enroll(catalog, registry, catechumen_id, group_id, now)?;
            Ok((enrollment, group_parish(registry, group_id)?))
        })?;

        self.reports.invalidate_parish(&parish);
        self.publish(DomainEvent::EnrollmentCreated {
            enrollment_id: enrollment.id,
            catechumen_id,
            group_id,
            at: now,
        });
        Ok(enrollment)
    }

    pub fn unenroll(&self, enrollment_id: Uuid) -> Result<Enrollment> {
        let (enrollment, parish) = self.mutate(|_, registry| {
            let enrollment = enrollment::unenroll(registry, enrollment_id)?;
            Ok((enrollment.clone(), group_parish(registry, enrollment.group_id)?))
        })?;

        self.reports.invalidate_parish(&parish);
        self.publish(DomainEvent::EnrollmentWithdrawn {
            enrollment_id,
            catechumen_id: enrollment.catechumen_id,
            at: Utc::now(),
        });
        Ok(enrollment)
    }

    pub fn record_outcome(&self, enrollment_id: Uuid, grade: Grade) -> Result<Enrollment> {
        let (enrollment, parish) = self.mutate(|_, registry| {
            let enrollment = enrollment::record_outcome(registry, enrollment_id, grade)?;
            Ok((enrollment.clone(), group_parish(registry, enrollment.group_id)?))
        })?;

        self.reports.invalidate_parish(&parish);
        self.publish(DomainEvent::OutcomeRecorded {
            enrollment_id,
            grade,
            at: Utc::now(),
        });
        Ok(enrollment)
    }

    pub fn transfer(&self, enrollment_id: Uuid, target_group_id: Uuid) -> Result<Enrollment> {
        let (enrollment, from, parish) = self.mutate(|_, registry| {
            let from = registry.enrollment(enrollment_id)?.group_id;
            let enrollment = enrollment::transfer(registry, enrollment_id, target_group_id)?;
            Ok((enrollment, from, group_parish(registry, target_group_id)?))
        })?;

        self.reports.invalidate_parish(&parish);
        self.publish(DomainEvent::EnrollmentTransferred {
            enrollment_id,
            from_group: from,
            to_group: target_group_id,
            at: Utc::now(),
        });
        Ok(enrollment)
    }

    pub fn suspend(&self, catechumen_id: Uuid) -> Result<Catechumen> {
        let catechumen = self.mutate(|_, registry| enrollment::suspend(registry, catechumen_id))?;
        self.publish(DomainEvent::CatechumenSuspended {
            catechumen_id,
            at: Utc::now(),
        });
        Ok(catechumen)
    }

    pub fn reactivate(&self, catechumen_id: Uuid) -> Result<Catechumen> {
        let catechumen =
            self.mutate(|_, registry| enrollment::reactivate(registry, catechumen_id))?;
        self.publish(DomainEvent::CatechumenReactivated {
            catechumen_id,
            at: Utc::now(),
        });
        Ok(catechumen)
    }

    pub fn mark_attendance(
        &self,
        enrollment_id: Uuid,
        session_date: NaiveDate,
        present: bool,
    ) -> Result<AttendanceRecord> {
        let (record, parish) = self.mutate(|catalog, registry| {
            let record =
                enrollment::mark_attendance(catalog, registry, enrollment_id, session_date, present)?;
            let group_id = registry.enrollment(enrollment_id)?.group_id;
            Ok((record, group_parish(registry, group_id)?))
        })?;
        self.reports.invalidate_parish(&parish);
        Ok(record)
    }

    /// Close a period, committing its progression records as one unit
    ///
    /// A commit failure leaves the period open and surfaces as
    /// `ClosePeriodFailed`; calling again retries the whole close.
    pub fn close_period(&self, period_id: &str) -> Result<Vec<ProgressionRecord>> {
        let now = Utc::now();
        let catalog = self.catalog_read();
        let parish = catalog.period(period_id)?.parish_id.clone();
        let mut registry = self.registry_write();

        if registry.is_closed(period_id) {
            tracing::info!("Period {} already closed", period_id);
            return Ok(registry.period_records(period_id));
        }

        let mut staged = registry.clone();
        let records = progression::close_period(&catalog, &mut staged, period_id, now)?;
        commit_with_retry(self.store.as_ref(), &staged, self.config.retry_policy()).map_err(
            |e| Error::ClosePeriodFailed {
                period: period_id.to_string(),
                reason: e.to_string(),
            },
        )?;
        *registry = staged;
        drop(registry);
        drop(catalog);

        self.reports.invalidate_parish(&parish);
        self.publish(DomainEvent::PeriodClosed {
            period_id: period_id.to_string(),
            records: records.len(),
            at: now,
        });
        Ok(records)
    }

    /// Issue the certificate of a passed sacramental enrollment
    ///
    /// Asking again for the same enrollment returns the stored certificate
    /// and publishes nothing.
    pub fn issue_certificate(&self, enrollment_id: Uuid) -> Result<Certificate> {
        let now = Utc::now();
        let (certificate, fresh) = self.mutate(|_, registry| {
            let before = registry.certificates.len();
            let certificate = certificates::issue_certificate(registry, enrollment_id, now)?;
            Ok((certificate, registry.certificates.len() > before))
        })?;

        if fresh {
            self.reports.invalidate_parish(&certificate.parish_id);
            self.publish(DomainEvent::CertificateIssued {
                number: certificate.number.clone(),
                catechumen_id: certificate.catechumen_id,
                sacrament: certificate.sacrament,
                at: now,
            });
        }
        Ok(certificate)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Run a read-only closure against a consistent catalog and registry
    pub fn read<T>(&self, f: impl FnOnce(&Catalog, &Registry) -> T) -> T {
        let catalog = self.catalog_read();
        let registry = self.registry_read();
        f(&catalog, &registry)
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog_read().clone()
    }

    pub fn catechumen(&self, id: Uuid) -> Result<Catechumen> {
        self.registry_read().catechumen(id).cloned()
    }

    pub fn group(&self, id: Uuid) -> Result<Group> {
        self.registry_read().group(id).cloned()
    }

    pub fn enrollment(&self, id: Uuid) -> Result<Enrollment> {
        self.registry_read().enrollment(id).cloned()
    }

    pub fn enrolled_count(&self, group_id: Uuid) -> Result<u32> {
        let registry = self.registry_read();
        registry.group(group_id)?;
        Ok(registry.enrolled_count(group_id))
    }

    /// Progression records of one catechumen, oldest first
    pub fn progression_history(&self, catechumen_id: Uuid) -> Result<Vec<ProgressionRecord>> {
        let registry = self.registry_read();
        registry.catechumen(catechumen_id)?;
        Ok(registry
            .progression_history(catechumen_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn verify_certificate(&self, code: &str) -> Result<Certificate> {
        certificates::verify_certificate(&self.registry_read(), code).cloned()
    }

    pub fn report(&self, query: &ReportQuery) -> Result<Arc<Report>> {
        let catalog = self.catalog_read();
        let registry = self.registry_read();
        self.reports.run(&catalog, &registry, query)
    }

    /// Build a report and write it as CSV; returns the row count
    pub fn export(&self, query: &ReportQuery, path: &Path) -> Result<usize> {
        let report = self.report(query)?;
        reporting::write_csv(&report, path)
    }
}

fn group_parish(registry: &Registry, group_id: Uuid) -> Result<ParishId> {
    Ok(registry.group(group_id)?.parish_id.clone())
}
