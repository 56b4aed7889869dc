//! Shared fixtures for unit tests.

use crate::catalog::build_default_catalog;
use crate::enrollment::{create_group, enroll, register_catechumen, NewGroup};
use crate::types::*;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Default catalog plus period "2024" (2024-09-01 to 2025-06-30) for parish "central"
pub fn fixture() -> (Catalog, Registry) {
    let mut catalog = build_default_catalog();
    catalog
        .add_period(Period {
            id: "2024".into(),
            parish_id: "central".into(),
            starts_on: date(2024, 9, 1),
            ends_on: date(2025, 6, 30),
        })
        .unwrap();
    (catalog, Registry::default())
}

pub fn group(catalog: &Catalog, registry: &mut Registry, level: &str, capacity: u32) -> Uuid {
    create_group(
        catalog,
        registry,
        NewGroup {
            name: format!("{} group", level),
            parish_id: "central".into(),
            level_id: level.into(),
            period_id: "2024".into(),
            capacity: Some(capacity),
        },
        Utc::now(),
    )
    .unwrap()
    .id
}

/// A catechumen who is `age` years old on 2024-09-01
pub fn child(registry: &mut Registry, age: i32) -> Uuid {
    register_catechumen(registry, "Niño de prueba", date(2024 - age, 3, 1), Utc::now())
        .unwrap()
        .id
}

/// Enroll a fresh seven-year-old and return the enrollment id
pub fn child_enrolled(catalog: &Catalog, registry: &mut Registry, group: Uuid) -> Uuid {
    let c = child(registry, 7);
    enroll(catalog, registry, c, group, Utc::now()).unwrap().id
}
