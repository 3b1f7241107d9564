//! Import priority classes.
//!
//!   High   — a filesystem caller is blocked on this object right now
//!   Normal — default for on-demand reads
//!   Low    — prefetch and other speculative work
//!
//! Higher classes always dequeue before lower ones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ImportPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl ImportPriority {
    pub const ALL: [ImportPriority; 3] = [
        ImportPriority::Low,
        ImportPriority::Normal,
        ImportPriority::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPriority::Low => "low",
            ImportPriority::Normal => "normal",
            ImportPriority::High => "high",
        }
    }
}

impl fmt::Display for ImportPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown import priority {0:?}")]
pub struct UnknownPriority(pub String);

impl FromStr for ImportPriority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ImportPriority::Low),
            "normal" => Ok(ImportPriority::Normal),
            "high" => Ok(ImportPriority::High),
            _ => Err(UnknownPriority(s.to_string())),
        }
    }
}
