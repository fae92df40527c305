use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity namespace a local key is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    /// Resource records (the only bucket record tokens live in).
    Record,
    /// Request documents.
    Document,
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => f.write_str("record"),
            Self::Document => f.write_str("document"),
        }
    }
}
