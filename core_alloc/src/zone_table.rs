//! Column-oriented store of zones and their attributes.
//!
//! Every column is either numeric (`f64`, an empty cell reads as NaN) or text.
//! Expressions and aggregations operate on numeric columns; group fields may be
//! either kind. Rows are addressed by index internally and by zone id at the
//! public boundary.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use alloc_runtime::{BoundExpression, ExprError, Expression, RowValues};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read zone table from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write zone table to {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("zone table csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zone table has no identifier column '{0}'")]
    MissingIdColumn(String),
    #[error("duplicate zone id '{0}'")]
    DuplicateZone(String),
    #[error("unknown zone id '{0}'")]
    UnknownZone(String),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("column '{0}' is not numeric")]
    NonNumericColumn(String),
    #[error("identifier column '{0}' cannot be overwritten")]
    ImmutableIdColumn(String),
    #[error("column '{column}' has {found} rows, expected {expected}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid allocation of {amount} units to '{field}' in zone '{zone}'")]
    InvalidAllocation {
        zone: String,
        field: String,
        amount: f64,
    },
    #[error("expression '{source_text}': {error}")]
    Expression {
        source_text: String,
        error: ExprError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    fn render(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(values) => format_number(values[row]),
            ColumnData::Text(values) => values[row].clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }
}

/// Numbers round-trip through `Display`; NaN is written as an empty cell.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ZoneTable {
    id_field: String,
    ids: Vec<String>,
    row_index: AHashMap<String, usize>,
    columns: Vec<Column>,
    column_index: AHashMap<String, usize>,
}

impl ZoneTable {
    pub fn new(id_field: impl Into<String>, columns: Vec<Column>) -> Result<Self, TableError> {
        let id_field = id_field.into();
        let expected = columns.first().map(|column| column.data.len()).unwrap_or(0);

        let mut column_index = AHashMap::with_capacity(columns.len());
        for (slot, column) in columns.iter().enumerate() {
            if column.data.len() != expected {
                return Err(TableError::RowCountMismatch {
                    column: column.name.clone(),
                    expected,
                    found: column.data.len(),
                });
            }
            if column_index.insert(column.name.clone(), slot).is_some() {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
        }

        let id_slot = *column_index
            .get(&id_field)
            .ok_or_else(|| TableError::MissingIdColumn(id_field.clone()))?;
        let ids: Vec<String> = (0..expected)
            .map(|row| columns[id_slot].data.render(row))
            .collect();

        let mut row_index = AHashMap::with_capacity(ids.len());
        for (row, id) in ids.iter().enumerate() {
            if row_index.insert(id.clone(), row).is_some() {
                return Err(TableError::DuplicateZone(id.clone()));
            }
        }

        Ok(Self {
            id_field,
            ids,
            row_index,
            columns,
            column_index,
        })
    }

    /// Reads a headed CSV. A column becomes numeric when every non-empty cell
    /// parses as a number; the identifier column is always kept as text.
    /// Numeric columns are re-rendered on output, so codes such as `007`
    /// come back as `7`; see [`ZoneTable::from_csv_reader_with_text`].
    pub fn from_csv_reader<R: Read>(reader: R, id_field: &str) -> Result<Self, TableError> {
        Self::from_csv_reader_with_text(reader, id_field, &[])
    }

    /// Like [`ZoneTable::from_csv_reader`], but `text_fields` are kept as text
    /// whatever their contents.
    pub fn from_csv_reader_with_text<R: Read>(
        reader: R,
        id_field: &str,
        text_fields: &[&str],
    ) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in csv_reader.records() {
            let record = record?;
            for (slot, cells) in raw.iter_mut().enumerate() {
                cells.push(record.get(slot).unwrap_or("").to_string());
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, cells)| {
                if name == id_field || text_fields.contains(&name.as_str()) {
                    return Column::text(name, cells);
                }
                match parse_numeric(&cells) {
                    Some(values) => Column::numeric(name, values),
                    None => Column::text(name, cells),
                }
            })
            .collect();

        Self::new(id_field, columns)
    }

    pub fn from_csv_path(path: &Path, id_field: &str) -> Result<Self, TableError> {
        Self::from_csv_path_with_text(path, id_field, &[])
    }

    pub fn from_csv_path_with_text(
        path: &Path,
        id_field: &str,
        text_fields: &[&str],
    ) -> Result<Self, TableError> {
        let file = File::open(path).map_err(|source| TableError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv_reader_with_text(file, id_field, text_fields)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.columns.iter().map(|column| column.name.as_str()))?;
        for row in 0..self.len() {
            csv_writer.write_record(self.columns.iter().map(|column| column.data.render(row)))?;
        }
        csv_writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn write_csv_path(&self, path: &Path) -> Result<(), TableError> {
        let file = File::create(path).map_err(|source| TableError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_csv(io::BufWriter::new(file))
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn zone_id(&self, row: usize) -> &str {
        &self.ids[row]
    }

    pub fn row_of(&self, zone_id: &str) -> Option<usize> {
        self.row_index.get(zone_id).copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    pub fn column_slot(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    /// Slot of `name` if it exists and holds numbers.
    pub fn numeric_slot(&self, name: &str) -> Result<usize, TableError> {
        let slot = self
            .column_slot(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        match self.columns[slot].data {
            ColumnData::Numeric(_) => Ok(slot),
            ColumnData::Text(_) => Err(TableError::NonNumericColumn(name.to_string())),
        }
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64], TableError> {
        let slot = self.numeric_slot(name)?;
        Ok(self.numeric_at(slot))
    }

    /// Reads one cell; text columns and out-of-range slots read as NaN.
    pub fn value_at(&self, row: usize, slot: usize) -> f64 {
        match self.columns.get(slot).map(|column| &column.data) {
            Some(ColumnData::Numeric(values)) => values[row],
            _ => f64::NAN,
        }
    }

    fn numeric_at(&self, slot: usize) -> &[f64] {
        match &self.columns[slot].data {
            ColumnData::Numeric(values) => values,
            ColumnData::Text(_) => &[],
        }
    }

    /// The cell as written to CSV. Out-of-range slots render empty.
    pub fn render_cell(&self, row: usize, slot: usize) -> String {
        self.columns
            .get(slot)
            .map(|column| column.data.render(row))
            .unwrap_or_default()
    }

    pub fn row(&self, row: usize) -> ZoneRow<'_> {
        ZoneRow { table: self, row }
    }

    /// Creates `name` or replaces its contents. Returns the column slot.
    pub fn set_numeric_column(&mut self, name: &str, values: Vec<f64>) -> Result<usize, TableError> {
        if name == self.id_field {
            return Err(TableError::ImmutableIdColumn(name.to_string()));
        }
        if values.len() != self.len() {
            return Err(TableError::RowCountMismatch {
                column: name.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }
        match self.column_slot(name) {
            Some(slot) => {
                self.columns[slot].data = ColumnData::Numeric(values);
                Ok(slot)
            }
            None => {
                let slot = self.columns.len();
                self.columns.push(Column::numeric(name, values));
                self.column_index.insert(name.to_string(), slot);
                Ok(slot)
            }
        }
    }

    pub fn fill_numeric_column(&mut self, name: &str, value: f64) -> Result<usize, TableError> {
        let values = vec![value; self.len()];
        self.set_numeric_column(name, values)
    }

    /// Adds `amount` to the zone's `field`. Negative or non-finite amounts are
    /// rejected before anything is written.
    pub fn add(&mut self, zone_id: &str, field: &str, amount: f64) -> Result<(), TableError> {
        let row = self
            .row_of(zone_id)
            .ok_or_else(|| TableError::UnknownZone(zone_id.to_string()))?;
        let slot = self.numeric_slot(field)?;
        self.add_at(row, slot, amount)
    }

    pub fn add_at(&mut self, row: usize, slot: usize, amount: f64) -> Result<(), TableError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TableError::InvalidAllocation {
                zone: self.ids.get(row).cloned().unwrap_or_default(),
                field: self
                    .columns
                    .get(slot)
                    .map(|column| column.name.clone())
                    .unwrap_or_default(),
                amount,
            });
        }
        if row >= self.len() {
            return Err(TableError::UnknownZone(row.to_string()));
        }
        let column = self
            .columns
            .get_mut(slot)
            .ok_or_else(|| TableError::UnknownColumn(slot.to_string()))?;
        match &mut column.data {
            ColumnData::Numeric(values) => {
                values[row] += amount;
                Ok(())
            }
            ColumnData::Text(_) => Err(TableError::NonNumericColumn(column.name.clone())),
        }
    }

    /// Group key per row; `None` where the group cell is empty or NaN.
    pub fn group_keys(&self, group_field: &str) -> Result<Vec<Option<String>>, TableError> {
        let slot = self
            .column_slot(group_field)
            .ok_or_else(|| TableError::UnknownColumn(group_field.to_string()))?;
        let keys = match &self.columns[slot].data {
            ColumnData::Numeric(values) => values
                .iter()
                .map(|value| (!value.is_nan()).then(|| format_number(*value)))
                .collect(),
            ColumnData::Text(values) => values
                .iter()
                .map(|value| (!value.is_empty()).then(|| value.clone()))
                .collect(),
        };
        Ok(keys)
    }

    /// Per-group sums of `value_fields`, keyed in ascending group order. NaN
    /// cells contribute nothing and rows without a group are skipped.
    pub fn sum_by_group(
        &self,
        group_field: &str,
        value_fields: &[&str],
    ) -> Result<BTreeMap<String, Vec<f64>>, TableError> {
        let keys = self.group_keys(group_field)?;
        let slots = value_fields
            .iter()
            .map(|field| self.numeric_slot(field))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sums: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (row, key) in keys.into_iter().enumerate() {
            let Some(key) = key else { continue };
            let entry = sums
                .entry(key)
                .or_insert_with(|| vec![0.0; slots.len()]);
            for (total, &slot) in entry.iter_mut().zip(&slots) {
                let value = self.value_at(row, slot);
                if !value.is_nan() {
                    *total += value;
                }
            }
        }
        Ok(sums)
    }

    /// Binds an expression to this table's numeric columns.
    pub fn bind(&self, expression: &Expression) -> Result<BoundExpression, TableError> {
        for name in expression.columns() {
            self.numeric_slot(name)?;
        }
        expression
            .bind(|name| self.column_slot(name))
            .map_err(|error| TableError::Expression {
                source_text: expression.source().to_string(),
                error,
            })
    }

    /// Evaluates `expression` for every row.
    pub fn evaluate(&self, expression: &BoundExpression) -> Vec<f64> {
        (0..self.len())
            .map(|row| expression.eval(&self.row(row)))
            .collect()
    }
}

fn parse_numeric(cells: &[String]) -> Option<Vec<f64>> {
    cells
        .iter()
        .map(|cell| {
            if cell.is_empty() {
                Some(f64::NAN)
            } else {
                cell.parse::<f64>().ok()
            }
        })
        .collect()
}

/// Borrowed view of one row for expression evaluation.
#[derive(Clone, Copy)]
pub struct ZoneRow<'a> {
    table: &'a ZoneTable,
    row: usize,
}

impl ZoneRow<'_> {
    pub fn index(&self) -> usize {
        self.row
    }

    pub fn zone_id(&self) -> &str {
        self.table.zone_id(self.row)
    }
}

impl RowValues for ZoneRow<'_> {
    fn value(&self, slot: usize) -> f64 {
        self.table.value_at(self.row, slot)
    }
}
