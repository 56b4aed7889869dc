//! Catalog store for parishes, catechetical levels and periods.
//!
//! Reference data changes rarely and only through administrative edits.
//! Every edit is applied to a staged copy and validated before it replaces
//! the committed catalog, so a rejected edit never leaves partial state.

use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::path::Path;

/// Cached default catalog - built once and reused
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog_internal);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog with one parish and the standard level sequence
///
/// **Note**: prefer `get_default_catalog()` for read-only use. This function
/// returns an owned copy suitable for editing.
pub fn build_default_catalog() -> Catalog {
    build_default_catalog_internal()
}

fn build_default_catalog_internal() -> Catalog {
    let parishes = vec![Parish {
        id: "central".into(),
        name: "Parroquia Central".into(),
        default_capacity: None,
    }];

    let levels = vec![
        CatecheticalLevel {
            id: "preparation".into(),
            rank: 1,
            name: "Pre-Catequesis".into(),
            min_age: Some(6),
            max_age: Some(8),
            prerequisite: None,
            prepares_sacrament: None,
        },
        CatecheticalLevel {
            id: "first_communion".into(),
            rank: 2,
            name: "Primera Comunión".into(),
            min_age: Some(7),
            max_age: Some(11),
            prerequisite: Some("preparation".into()),
            prepares_sacrament: Some(Sacrament::FirstCommunion),
        },
        CatecheticalLevel {
            id: "perseverance".into(),
            rank: 3,
            name: "Perseverancia".into(),
            min_age: Some(9),
            max_age: Some(14),
            prerequisite: Some("first_communion".into()),
            prepares_sacrament: None,
        },
        CatecheticalLevel {
            id: "confirmation".into(),
            rank: 4,
            name: "Confirmación".into(),
            min_age: Some(12),
            max_age: None,
            prerequisite: Some("perseverance".into()),
            prepares_sacrament: Some(Sacrament::Confirmation),
        },
    ];

    Catalog {
        config: CatalogConfig::default(),
        parishes,
        levels,
        periods: Vec::new(),
    }
}

impl Catalog {
    /// An empty catalog using the given defaults
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            parishes: Vec::new(),
            levels: Vec::new(),
            periods: Vec::new(),
        }
    }

    /// Replace the defaults used for unset capacity and age values
    pub fn with_config(mut self, config: CatalogConfig) -> Self {
        self.config = config;
        self
    }

    /// Load and validate a catalog from a TOML file
    pub fn load_from(path: &Path, config: CatalogConfig) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut catalog: Catalog = toml::from_str(&contents)?;
        catalog.config = config;
        catalog.levels.sort_by_key(|l| l.rank);
        catalog.ensure_valid()?;
        tracing::info!(
            "Loaded catalog from {:?}: {} parishes, {} levels, {} periods",
            path,
            catalog.parishes.len(),
            catalog.levels.len(),
            catalog.periods.len()
        );
        Ok(catalog)
    }

    /// Save the catalog as TOML
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize catalog: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved catalog to {:?}", path);
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn parish(&self, id: &str) -> Result<&Parish> {
        self.parishes
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("parish", id))
    }

    pub fn level(&self, id: &str) -> Result<&CatecheticalLevel> {
        self.levels
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| Error::not_found("level", id))
    }

    pub fn period(&self, id: &str) -> Result<&Period> {
        self.periods
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("period", id))
    }

    /// The level of rank 1, where every catechumen starts
    pub fn first_level(&self) -> Option<&CatecheticalLevel> {
        self.levels.iter().find(|l| l.rank == 1)
    }

    /// The level that follows `level`, or None if it is the final one
    pub fn level_successor(&self, level: &CatecheticalLevel) -> Option<&CatecheticalLevel> {
        self.levels.iter().find(|l| l.rank == level.rank + 1)
    }

    /// Inclusive age window, with catalog defaults for unset bounds
    pub fn age_window(&self, level: &CatecheticalLevel) -> (u32, u32) {
        (
            level.min_age.unwrap_or(self.config.min_age),
            level.max_age.unwrap_or(self.config.max_age),
        )
    }

    /// Capacity given to new groups of a parish when none is requested
    pub fn default_capacity(&self, parish: &Parish) -> u32 {
        parish
            .default_capacity
            .unwrap_or(self.config.default_capacity)
    }

    // ========================================================================
    // Administrative edits
    // ========================================================================

    pub fn add_parish(&mut self, parish: Parish) -> Result<()> {
        self.stage(|c| {
            c.parishes.push(parish);
            Ok(())
        })
    }

    pub fn update_parish(&mut self, parish: Parish) -> Result<()> {
        self.stage(|c| {
            let slot = c
                .parishes
                .iter_mut()
                .find(|p| p.id == parish.id)
                .ok_or_else(|| Error::not_found("parish", &parish.id))?;
            *slot = parish;
            Ok(())
        })
    }

    pub fn add_level(&mut self, level: CatecheticalLevel) -> Result<()> {
        self.stage(|c| {
            c.levels.push(level);
            Ok(())
        })
    }

    pub fn update_level(&mut self, level: CatecheticalLevel) -> Result<()> {
        self.stage(|c| {
            let slot = c
                .levels
                .iter_mut()
                .find(|l| l.id == level.id)
                .ok_or_else(|| Error::not_found("level", &level.id))?;
            *slot = level;
            Ok(())
        })
    }

    /// Remove a level; only the final rank can go without breaking the sequence
    pub fn remove_level(&mut self, id: &str) -> Result<CatecheticalLevel> {
        let removed = self.level(id)?.clone();
        self.stage(|c| {
            c.levels.retain(|l| l.id != id);
            Ok(())
        })?;
        Ok(removed)
    }

    pub fn add_period(&mut self, period: Period) -> Result<()> {
        self.stage(|c| {
            c.periods.push(period);
            Ok(())
        })
    }

    /// Apply an edit to a copy, validate it, then commit
    fn stage<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Catalog) -> Result<()>,
    {
        let mut staged = self.clone();
        edit(&mut staged)?;
        staged.levels.sort_by_key(|l| l.rank);
        staged.ensure_valid()?;
        *self = staged;
        Ok(())
    }

    fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            tracing::warn!("Rejected catalog edit: {}", errors.join("; "));
            Err(Error::CatalogInvariantViolation(errors.join("; ")))
        }
    }

    /// Validate the catalog for consistency
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for parish in &self.parishes {
            if parish.id.is_empty() {
                errors.push("Parish has empty ID".to_string());
            }
            if !seen.insert(parish.id.as_str()) {
                errors.push(format!("Duplicate parish ID '{}'", parish.id));
            }
            if parish.name.trim().is_empty() {
                errors.push(format!("Parish '{}' has empty name", parish.id));
            }
            if parish.default_capacity == Some(0) {
                errors.push(format!("Parish '{}' has zero default capacity", parish.id));
            }
        }

        let mut seen = HashSet::new();
        let mut ranks: Vec<u32> = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            if level.id.is_empty() {
                errors.push("Level has empty ID".to_string());
            }
            if !seen.insert(level.id.as_str()) {
                errors.push(format!("Duplicate level ID '{}'", level.id));
            }
            let (min, max) = self.age_window(level);
            if min > max {
                errors.push(format!(
                    "Level '{}': minimum age {} > maximum age {}",
                    level.id, min, max
                ));
            }
            ranks.push(level.rank);
        }

        ranks.sort_unstable();
        for (idx, rank) in ranks.iter().enumerate() {
            let expected = idx as u32 + 1;
            if *rank != expected {
                errors.push(format!(
                    "Level ranks must be unique and contiguous from 1 (found {:?})",
                    ranks
                ));
                break;
            }
        }

        for level in &self.levels {
            let expected = if level.rank <= 1 {
                None
            } else {
                self.levels
                    .iter()
                    .find(|l| l.rank == level.rank - 1)
                    .map(|l| l.id.clone())
            };
            if level.prerequisite != expected {
                errors.push(format!(
                    "Level '{}' (rank {}) must have prerequisite {:?}, found {:?}",
                    level.id, level.rank, expected, level.prerequisite
                ));
            }
        }

        let mut seen = HashSet::new();
        for period in &self.periods {
            if period.id.is_empty() {
                errors.push("Period has empty ID".to_string());
            }
            if !seen.insert(period.id.as_str()) {
                errors.push(format!("Duplicate period ID '{}'", period.id));
            }
            if !self.parishes.iter().any(|p| p.id == period.parish_id) {
                errors.push(format!(
                    "Period '{}' references non-existent parish '{}'",
                    period.id, period.parish_id
                ));
            }
            if period.starts_on >= period.ends_on {
                errors.push(format!(
                    "Period '{}' starts on {} but ends on {}",
                    period.id, period.starts_on, period.ends_on
                ));
            }
        }

        errors
    }
}
