//! Linear utility coefficients and where they come from.

use std::{
    collections::BTreeMap,
    fs::File,
    io::Read,
    path::PathBuf,
};

use thiserror::Error;

use crate::allocation_config::{AllocationConfig, ConfigError, LandUseSpec};

pub const DEFAULT_COEFFICIENT_MARKER: &str = "coef_";

#[derive(Debug, Error)]
pub enum CoefficientError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing '{0}' column")]
    MissingHeader(&'static str),
    #[error("coefficient '{field}' has non-numeric value '{value}'")]
    InvalidValue { field: String, value: String },
}

/// Attribute name to weight, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coefficients {
    terms: Vec<(String, f64)>,
}

impl Coefficients {
    /// Later entries for the same attribute replace earlier ones.
    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
        let mut coefficients = Self::default();
        for (name, weight) in pairs {
            coefficients.insert(name.into(), weight);
        }
        coefficients
    }

    fn insert(&mut self, name: String, weight: f64) {
        match self.terms.iter_mut().find(|(existing, _)| *existing == name) {
            Some(term) => term.1 = weight,
            None => self.terms.push((name, weight)),
        }
    }

    /// Parses a `fields`/`Value` table. Rows whose field starts with `marker`
    /// become coefficients (marker stripped); every other row is ignored.
    pub fn from_csv_reader<R: Read>(reader: R, marker: &str) -> Result<Self, CoefficientError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let position = |wanted: &str| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(wanted))
        };
        let field_slot = position("fields").ok_or(CoefficientError::MissingHeader("fields"))?;
        let value_slot = position("value").ok_or(CoefficientError::MissingHeader("Value"))?;

        let mut coefficients = Self::default();
        for record in csv_reader.records() {
            let record = record?;
            let field = record.get(field_slot).unwrap_or("");
            let Some(name) = field.strip_prefix(marker) else {
                continue;
            };
            let raw = record.get(value_slot).unwrap_or("");
            let weight = raw
                .parse::<f64>()
                .map_err(|_| CoefficientError::InvalidValue {
                    field: field.to_string(),
                    value: raw.to_string(),
                })?;
            coefficients.insert(name.to_string(), weight);
        }
        Ok(coefficients)
    }

    pub fn terms(&self) -> &[(String, f64)] {
        &self.terms
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.terms
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, weight)| *weight)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Supplies the utility coefficients of a land use. Called once per land use
/// per allocation run.
pub trait ParameterSource {
    fn load(&self, key: &str, land_use: &LandUseSpec) -> Result<Coefficients, ConfigError>;
}

/// Reads each land use's `coefficients` file from disk.
#[derive(Debug, Clone)]
pub struct FileParameterSource {
    base_dir: Option<PathBuf>,
    marker: String,
}

impl FileParameterSource {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            base_dir: None,
            marker: marker.into(),
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &AllocationConfig) -> Self {
        let source = Self::new(config.coefficient_marker.clone());
        match config.base_dir() {
            Some(dir) => source.with_base_dir(dir),
            None => source,
        }
    }
}

impl Default for FileParameterSource {
    fn default() -> Self {
        Self::new(DEFAULT_COEFFICIENT_MARKER)
    }
}

impl ParameterSource for FileParameterSource {
    fn load(&self, key: &str, land_use: &LandUseSpec) -> Result<Coefficients, ConfigError> {
        let relative = land_use
            .coefficients
            .as_deref()
            .ok_or_else(|| ConfigError::MissingCoefficients {
                land_use: key.to_string(),
            })?;
        let path = match &self.base_dir {
            Some(dir) if relative.is_relative() => dir.join(relative),
            _ => relative.to_path_buf(),
        };

        let file = File::open(&path).map_err(|source| ConfigError::ReadFailed {
            what: "coefficient file",
            path: path.clone(),
            source,
        })?;
        let coefficients = Coefficients::from_csv_reader(file, &self.marker)
            .map_err(|source| ConfigError::Coefficients {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            target: "landuse_alloc::config",
            land_use = key,
            path = %path.display(),
            terms = coefficients.len(),
            "coefficients.loaded"
        );
        Ok(coefficients)
    }
}

/// Coefficients held in memory, keyed by land-use key.
#[derive(Debug, Clone, Default)]
pub struct InlineParameterSource {
    by_key: BTreeMap<String, Coefficients>,
}

impl InlineParameterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, coefficients: Coefficients) -> Self {
        self.by_key.insert(key.into(), coefficients);
        self
    }
}

impl ParameterSource for InlineParameterSource {
    fn load(&self, key: &str, _land_use: &LandUseSpec) -> Result<Coefficients, ConfigError> {
        self.by_key
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingCoefficients {
                land_use: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_rows_become_coefficients() {
        let csv = "\
fields,Value,notes
coef_dist_cbd,-0.25,distance
coef_acres, 0.4 ,
asc_sfdu,1.5,ignored
label,hello,ignored
coef_acres,0.5,override
";
        let coefficients = Coefficients::from_csv_reader(csv.as_bytes(), "coef_").unwrap();
        assert_eq!(
            coefficients.terms(),
            &[("dist_cbd".to_string(), -0.25), ("acres".to_string(), 0.5)]
        );
        assert_eq!(coefficients.get("asc_sfdu"), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let coefficients =
            Coefficients::from_csv_reader("FIELDS,value\nb_x,2\n".as_bytes(), "b_").unwrap();
        assert_eq!(coefficients.get("x"), Some(2.0));
    }

    #[test]
    fn missing_headers_and_bad_values_fail() {
        assert!(matches!(
            Coefficients::from_csv_reader("name,Value\ncoef_a,1\n".as_bytes(), "coef_"),
            Err(CoefficientError::MissingHeader("fields"))
        ));
        assert!(matches!(
            Coefficients::from_csv_reader("fields,Value\ncoef_a,abc\n".as_bytes(), "coef_"),
            Err(CoefficientError::InvalidValue { .. })
        ));
    }

    #[test]
    fn file_source_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sfdu.csv"), "fields,Value\ncoef_acres,0.7\n").unwrap();

        let land_use: LandUseSpec = serde_json::from_str(
            r#"{"name":"SF","total":1,"store_field":"out","coefficients":"sfdu.csv"}"#,
        )
        .unwrap();
        let source = FileParameterSource::default().with_base_dir(dir.path());
        let coefficients = source.load("sfdu", &land_use).unwrap();
        assert_eq!(coefficients.get("acres"), Some(0.7));

        let missing: LandUseSpec =
            serde_json::from_str(r#"{"name":"SF","total":1,"store_field":"out"}"#).unwrap();
        assert!(matches!(
            source.load("sfdu", &missing),
            Err(ConfigError::MissingCoefficients { .. })
        ));
    }

    #[test]
    fn inline_source_requires_an_entry() {
        let land_use: LandUseSpec =
            serde_json::from_str(r#"{"name":"SF","total":1,"store_field":"out"}"#).unwrap();
        let source = InlineParameterSource::new()
            .with("sfdu", Coefficients::from_pairs([("acres", 1.0)]));
        assert_eq!(source.load("sfdu", &land_use).unwrap().len(), 1);
        assert!(source.load("jobs", &land_use).is_err());
    }
}
