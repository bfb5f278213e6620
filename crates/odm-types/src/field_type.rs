use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar type a mapped field is cast to when hydrated from storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// RFC 3339 timestamp.
    Date,
    /// Identifier of any representation (see [`crate::DocumentId::cast`]).
    Id,
    Uuid,
    /// Free-form object, kept as raw JSON.
    Hash,
    /// Free-form array, kept as raw JSON.
    Collection,
    /// No casting at all.
    #[default]
    Raw,
}

impl FieldType {
    /// Whether values of this type are kept as raw JSON rather than cast.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Hash | Self::Collection | Self::Raw)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Id => "id",
            Self::Uuid => "uuid",
            Self::Hash => "hash",
            Self::Collection => "collection",
            Self::Raw => "raw",
        };
        f.write_str(name)
    }
}
