use std::{
    collections::{BTreeMap, BTreeSet},
    env, fs, io,
    path::{Path, PathBuf},
};

use alloc_runtime::{parse_assignment, Assignment, ExprError, Expression};
use serde::Deserialize;
use thiserror::Error;

use crate::coefficients::{CoefficientError, DEFAULT_COEFFICIENT_MARKER};
use crate::zone_table::TableError;

pub const CONFIG_PATH_ENV: &str = "LANDUSE_ALLOC_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse allocation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read {what} from {path:?}: {source}")]
    ReadFailed {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid coefficient file {path:?}: {source}")]
    Coefficients {
        path: PathBuf,
        #[source]
        source: CoefficientError,
    },
    #[error("land use '{land_use}' has no coefficient file")]
    MissingCoefficients { land_use: String },
    #[error("land use '{land_use}': {message}")]
    InvalidLandUse { land_use: String, message: String },
    #[error("invalid allocation config: {0}")]
    Invalid(String),
    #[error("land use '{land_use}' {role} expression: {source}")]
    Expression {
        land_use: String,
        role: &'static str,
        #[source]
        source: TableError,
    },
    #[error("update block line {line}: {source}")]
    UpdateBlock {
        line: usize,
        #[source]
        source: ExprError,
    },
    #[error("allocation config does not name a zone table")]
    MissingZonalData,
    #[error("failed to load zone table: {0}")]
    Table(#[from] TableError),
}

/// How the next land use is drawn from the pool of unfinished ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Every unfinished land use is equally likely, whatever its remainder.
    #[default]
    Uniform,
    WeightedByRemaining,
}

/// What happens when fewer zones are eligible than draws requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    #[default]
    Abort,
    /// Draw from whatever is eligible; still fails when nothing is.
    SampleAvailable,
    /// Drop the land use from the pool and report its remainder.
    SkipLandUse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Growth,
    /// Removal runs: lower utility makes a zone likelier to be picked.
    Decline,
}

impl Direction {
    pub fn utility_sign(self) -> f64 {
        match self {
            Direction::Growth => 1.0,
            Direction::Decline => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "RawCapacity")]
pub enum Capacity {
    /// Each draw places exactly one unit.
    #[default]
    Single,
    Expression(Expression),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCapacity {
    Number(f64),
    Text(String),
}

impl TryFrom<RawCapacity> for Capacity {
    type Error = ExprError;

    fn try_from(raw: RawCapacity) -> Result<Self, Self::Error> {
        let expression = match raw {
            RawCapacity::Number(value) => Expression::constant(value),
            RawCapacity::Text(text) => Expression::parse(&text)?,
        };
        Ok(Capacity::from_expression(expression))
    }
}

impl Capacity {
    pub fn from_expression(expression: Expression) -> Self {
        if expression.constant_value() == Some(1.0) {
            Capacity::Single
        } else {
            Capacity::Expression(expression)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VacancySpec {
    pub target_rate: f64,
    pub total_units_field: String,
    pub occupied_units_field: String,
    pub group_field: String,
    pub cap_field: String,
    #[serde(default = "default_sign")]
    pub sign: i8,
}

fn default_sign() -> i8 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LandUseSpec {
    pub name: String,
    pub total: u64,
    #[serde(alias = "store_fld")]
    pub store_field: String,
    #[serde(alias = "filter_fn", default = "always")]
    pub filter: Expression,
    #[serde(default)]
    pub coefficients: Option<PathBuf>,
    #[serde(alias = "capacity_fn", default)]
    pub capacity: Capacity,
    #[serde(default)]
    pub draws: Option<usize>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub vacancy: Option<VacancySpec>,
}

fn always() -> Expression {
    Expression::constant(1.0)
}

fn default_seed() -> u64 {
    12345
}

fn default_draws() -> usize {
    50
}

fn default_marker() -> String {
    DEFAULT_COEFFICIENT_MARKER.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    pub geo_id: String,
    #[serde(default)]
    pub zonal_data: Option<PathBuf>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_draws")]
    pub draws: usize,
    #[serde(alias = "filter_Undevelopable", default = "always")]
    pub developable: Expression,
    #[serde(default = "default_marker")]
    pub coefficient_marker: String,
    #[serde(default)]
    pub selection: SelectionPolicy,
    #[serde(default)]
    pub shortfall: ShortfallPolicy,
    #[serde(default)]
    pub max_iterations: Option<u64>,
    pub land_uses: BTreeMap<String, LandUseSpec>,
    #[serde(default)]
    pub update_block: Vec<String>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl AllocationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AllocationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config file; relative paths inside it resolve
    /// against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            what: "allocation config",
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn zonal_data_path(&self) -> Result<PathBuf, ConfigError> {
        self.zonal_data
            .as_deref()
            .map(|path| self.resolve_path(path))
            .ok_or(ConfigError::MissingZonalData)
    }

    pub fn draws_for(&self, land_use: &LandUseSpec) -> usize {
        land_use.draws.unwrap_or(self.draws)
    }

    /// Vacancy group fields, read as text so group codes survive output.
    pub fn group_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .land_uses
            .values()
            .filter_map(|land_use| land_use.vacancy.as_ref())
            .map(|vacancy| vacancy.group_field.as_str())
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    pub fn queue_len(&self) -> u64 {
        self.land_uses.values().map(|land_use| land_use.total).sum()
    }

    pub fn update_assignments(&self) -> Result<Vec<Assignment>, ConfigError> {
        self.update_block
            .iter()
            .enumerate()
            .map(|(index, line)| {
                parse_assignment(line).map_err(|source| ConfigError::UpdateBlock {
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }

    /// Checks everything that can be checked without the zone table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.geo_id.trim().is_empty() {
            return Err(ConfigError::Invalid("geo_id must not be empty".into()));
        }
        if self.draws == 0 {
            return Err(ConfigError::Invalid("draws must be at least 1".into()));
        }
        if self.coefficient_marker.is_empty() {
            return Err(ConfigError::Invalid(
                "coefficient_marker must not be empty".into(),
            ));
        }

        let mut store_fields = BTreeSet::new();
        for (key, land_use) in &self.land_uses {
            let invalid = |message: &str| ConfigError::InvalidLandUse {
                land_use: key.clone(),
                message: message.to_string(),
            };
            if land_use.name.trim().is_empty() {
                return Err(invalid("name must not be empty"));
            }
            if land_use.store_field.trim().is_empty() {
                return Err(invalid("store_field must not be empty"));
            }
            if land_use.store_field == self.geo_id {
                return Err(invalid("store_field must not be the zone identifier"));
            }
            if !store_fields.insert(land_use.store_field.as_str()) {
                return Err(invalid("store_field is shared with another land use"));
            }
            if land_use.draws == Some(0) {
                return Err(invalid("draws must be at least 1"));
            }
            if let Some(vacancy) = &land_use.vacancy {
                if !(0.0..1.0).contains(&vacancy.target_rate) {
                    return Err(invalid("vacancy target_rate must be in [0, 1)"));
                }
                if vacancy.sign != 1 && vacancy.sign != -1 {
                    return Err(invalid("vacancy sign must be 1 or -1"));
                }
                if vacancy.cap_field.trim().is_empty() {
                    return Err(invalid("vacancy cap_field must not be empty"));
                }
                if vacancy.cap_field == self.geo_id {
                    return Err(invalid("vacancy cap_field must not be the zone identifier"));
                }
            }
        }

        // Caps are written after every store field is zeroed and before any
        // land use reads its vacancy inputs, so a cap column may not alias
        // either of them or another land use's cap.
        let vacancy_inputs: BTreeSet<&str> = self
            .land_uses
            .values()
            .filter_map(|land_use| land_use.vacancy.as_ref())
            .flat_map(|vacancy| {
                [
                    vacancy.total_units_field.as_str(),
                    vacancy.occupied_units_field.as_str(),
                    vacancy.group_field.as_str(),
                ]
            })
            .collect();
        let mut cap_fields = BTreeSet::new();
        for (key, land_use) in &self.land_uses {
            let Some(vacancy) = &land_use.vacancy else {
                continue;
            };
            let cap_field = vacancy.cap_field.as_str();
            let message = if store_fields.contains(cap_field) {
                Some("vacancy cap_field is a land use's store_field")
            } else if vacancy_inputs.contains(cap_field) {
                Some("vacancy cap_field is a vacancy input field")
            } else if !cap_fields.insert(cap_field) {
                Some("vacancy cap_field is shared with another land use")
            } else {
                None
            };
            if let Some(message) = message {
                return Err(ConfigError::InvalidLandUse {
                    land_use: key.clone(),
                    message: message.to_string(),
                });
            }
        }

        self.update_assignments()?;
        Ok(())
    }
}

/// Config path named by `LANDUSE_ALLOC_CONFIG_PATH`, if set.
pub fn config_path_from_env() -> Option<PathBuf> {
    env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}

/// Loads the config at `path`, logging the outcome.
pub fn load_allocation_config(path: &Path) -> Result<AllocationConfig, ConfigError> {
    match AllocationConfig::from_file(path) {
        Ok(config) => {
            tracing::info!(
                target: "landuse_alloc::config",
                path = %path.display(),
                land_uses = config.land_uses.len(),
                "allocation_config.loaded=file"
            );
            Ok(config)
        }
        Err(err) => {
            tracing::warn!(
                target: "landuse_alloc::config",
                path = %path.display(),
                error = %err,
                "allocation_config.load_failed"
            );
            Err(err)
        }
    }
}

/// Loads the config named by `LANDUSE_ALLOC_CONFIG_PATH`. Without the
/// variable there is nothing to fall back to, so this reports `Invalid`.
pub fn load_allocation_config_from_env() -> Result<AllocationConfig, ConfigError> {
    let path = config_path_from_env().ok_or_else(|| {
        ConfigError::Invalid(format!("{CONFIG_PATH_ENV} is not set"))
    })?;
    load_allocation_config(&path)
}
