//! A loaded allocation run: config, zone table and coefficient source together.

use std::path::Path;

use rand::Rng;

use crate::allocation_config::{load_allocation_config, AllocationConfig, ConfigError};
use crate::coefficients::{FileParameterSource, ParameterSource};
use crate::engine::{allocate, allocate_seeded, AllocationError, AllocationReport};
use crate::update::UpdateBlock;
use crate::zone_table::{TableError, ZoneTable};

#[derive(Debug)]
pub struct AllocationModel {
    config: AllocationConfig,
    table: ZoneTable,
    parameters: FileParameterSource,
    update: UpdateBlock,
}

impl AllocationModel {
    /// Reads the config at `path` and the zone table it names.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = load_allocation_config(path)?;
        let zones = config.zonal_data_path()?;
        let text_fields = config.group_fields();
        let table = ZoneTable::from_csv_path_with_text(&zones, &config.geo_id, &text_fields)?;
        tracing::info!(
            target: "landuse_alloc::model",
            path = %zones.display(),
            zones = table.len(),
            "zone_table.loaded"
        );
        Self::new(config, table)
    }

    pub fn new(config: AllocationConfig, table: ZoneTable) -> Result<Self, ConfigError> {
        if table.id_field() != config.geo_id {
            return Err(ConfigError::Invalid(format!(
                "zone table is keyed by '{}' but geo_id is '{}'",
                table.id_field(),
                config.geo_id
            )));
        }
        let parameters = FileParameterSource::from_config(&config);
        let update = UpdateBlock::from_config(&config)?;
        Ok(Self {
            config,
            table,
            parameters,
            update,
        })
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AllocationConfig {
        &mut self.config
    }

    pub fn table(&self) -> &ZoneTable {
        &self.table
    }

    pub fn into_table(self) -> ZoneTable {
        self.table
    }

    /// Allocates with the config's seed and coefficient files.
    pub fn allocate(&mut self) -> Result<AllocationReport, AllocationError> {
        allocate_seeded(&mut self.table, &self.config, &self.parameters)
    }

    pub fn allocate_with<P, R>(
        &mut self,
        parameters: &P,
        rng: &mut R,
    ) -> Result<AllocationReport, AllocationError>
    where
        P: ParameterSource + ?Sized,
        R: Rng + ?Sized,
    {
        allocate(&mut self.table, &self.config, parameters, rng)
    }

    /// Applies the config's update block.
    pub fn update(&mut self) -> Result<(), TableError> {
        if !self.update.is_empty() {
            self.update.apply(&mut self.table)?;
            tracing::info!(
                target: "landuse_alloc::model",
                assignments = self.update.assignments().len(),
                "update_block.applied"
            );
        }
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        self.table.write_csv_path(path)
    }
}
