//! Fingerprints of zone tables, for comparing runs without keeping whole
//! tables around.

use std::hash::Hasher;

use crate::zone_table::ZoneTable;

const FIELD_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;

/// Streaming FNV-1a (64-bit) accumulator over rendered table cells.
#[derive(Debug, Clone)]
pub struct TableDigest {
    state: u64,
}

impl TableDigest {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.state = bytes.iter().fold(self.state, |state, &byte| {
            (state ^ u64::from(byte)).wrapping_mul(Self::PRIME)
        });
    }

    fn field(&mut self, text: &str) {
        self.update(text.as_bytes());
        self.update(&[FIELD_SEPARATOR]);
    }

    fn end_record(&mut self) {
        self.update(&[RECORD_SEPARATOR]);
    }

    pub fn value(&self) -> u64 {
        self.state
    }
}

impl Default for TableDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for TableDigest {
    fn finish(&self) -> u64 {
        self.value()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }
}

/// Digest of the header and every row, cells rendered as they are written to
/// CSV. Tables that write identical CSV share a digest.
pub fn table_digest(table: &ZoneTable) -> u64 {
    let mut digest = TableDigest::new();
    let mut columns = 0;
    for name in table.column_names() {
        digest.field(name);
        columns += 1;
    }
    digest.end_record();

    for row in 0..table.len() {
        for slot in 0..columns {
            digest.field(&table.render_cell(row, slot));
        }
        digest.end_record();
    }
    digest.value()
}
