#![allow(dead_code)]

use std::path::PathBuf;

use core_alloc::{AllocationConfig, AllocationModel, ZoneTable};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn config_path() -> PathBuf {
    fixture("config.json")
}

pub fn load_config() -> AllocationConfig {
    AllocationConfig::from_file(&config_path()).expect("fixture config loads")
}

pub fn load_zones() -> ZoneTable {
    ZoneTable::from_csv_path(&fixture("zones.csv"), "zone_id").expect("fixture zones load")
}

pub fn load_model() -> AllocationModel {
    AllocationModel::load(&config_path()).expect("fixture model loads")
}

/// Loads the fixture model, allocates and returns the resulting table.
pub fn allocated_table() -> ZoneTable {
    let mut model = load_model();
    model.allocate().expect("fixture allocation completes");
    model.into_table()
}

pub fn column_sum(table: &ZoneTable, field: &str) -> f64 {
    table.numeric(field).expect("numeric column").iter().sum()
}
