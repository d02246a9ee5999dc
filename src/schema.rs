//! Resolves the tagged metadata-column variants (`INDIRECTION`,
//! `SCHEMA_ENCODING`, `RID`, `TIMESTAMP`) to concrete physical column
//! offsets. User columns keep their natural `0..num_user_columns` indices;
//! metadata columns are appended after them in a fixed order, with the
//! mapping computed once per table rather than sprinkling negative sentinel
//! indices through the rest of the engine.

use serde::{Deserialize, Serialize};

/// A metadata column, addressed by name rather than by a negative index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataColumn {
    /// RID of the most-recent tail record, or the record's own RID if it has
    /// never been updated.
    Indirection,
    /// Bitmap of which user columns this particular tail version set
    /// explicitly (always 0 for base records).
    SchemaEncoding,
    /// The record's own RID, duplicated here so it can be projected like any
    /// other column.
    Rid,
    /// Logical clock value of the operation that produced this version.
    Timestamp,
}

const METADATA_ORDER: [MetadataColumn; 4] = [
    MetadataColumn::Indirection,
    MetadataColumn::SchemaEncoding,
    MetadataColumn::Rid,
    MetadataColumn::Timestamp,
];

pub const NUM_METADATA_COLUMNS: usize = METADATA_ORDER.len();

/// Column layout for a table: `num_user_columns` user columns followed by
/// the fixed metadata columns, resolved once at page-range construction
/// time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Schema {
    pub num_user_columns: usize,
}

impl Schema {
    pub fn new(num_user_columns: usize) -> Self {
        Schema { num_user_columns }
    }

    pub fn total_columns(&self) -> usize {
        self.num_user_columns + NUM_METADATA_COLUMNS
    }

    /// Absolute physical column index of a metadata column.
    pub fn meta_index(&self, column: MetadataColumn) -> usize {
        let offset = METADATA_ORDER
            .iter()
            .position(|&c| c == column)
            .expect("all MetadataColumn variants are in METADATA_ORDER");
        self.num_user_columns + offset
    }

    /// A projection bitmask of length `total_columns()` with only the user
    /// columns requested by `user_projection` set, plus any requested
    /// metadata columns.
    pub fn user_projection_to_full(&self, user_projection: &[u8]) -> Vec<u8> {
        let mut full = vec![0u8; self.total_columns()];
        full[..user_projection.len()].copy_from_slice(user_projection);
        full
    }

    /// A full-width projection with every user column plus the requested
    /// metadata columns selected.
    pub fn full_projection_with(&self, metadata: &[MetadataColumn]) -> Vec<u8> {
        let mut full = vec![1u8; self.num_user_columns];
        full.resize(self.total_columns(), 0);
        for &column in metadata {
            full[self.meta_index(column)] = 1;
        }
        full
    }

    /// A projection selecting every column, user and metadata alike.
    pub fn all_columns_projection(&self) -> Vec<u8> {
        vec![1u8; self.total_columns()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_columns_follow_user_columns() {
        let schema = Schema::new(3);
        assert_eq!(schema.total_columns(), 7);
        assert_eq!(schema.meta_index(MetadataColumn::Indirection), 3);
        assert_eq!(schema.meta_index(MetadataColumn::SchemaEncoding), 4);
        assert_eq!(schema.meta_index(MetadataColumn::Rid), 5);
        assert_eq!(schema.meta_index(MetadataColumn::Timestamp), 6);
    }
}
