use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of comparing the known label of an email against the API's
/// verdict. `Error` is reserved for items whose exchange failed before a
/// verdict could be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "valid-considered-valid")]
    ValidConsideredValid,
    #[serde(rename = "valid-considered-invalid")]
    ValidConsideredInvalid,
    #[serde(rename = "invalid-considered-valid")]
    InvalidConsideredValid,
    #[serde(rename = "invalid-considered-invalid")]
    InvalidConsideredInvalid,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::ValidConsideredValid => "valid-considered-valid",
            Classification::ValidConsideredInvalid => "valid-considered-invalid",
            Classification::InvalidConsideredValid => "invalid-considered-valid",
            Classification::InvalidConsideredInvalid => "invalid-considered-invalid",
            Classification::Error => "error",
        };
        write!(f, "{label}")
    }
}

pub fn classify(known_valid: bool, api_considers_valid: bool) -> Classification {
    match (known_valid, api_considers_valid) {
        (true, true) => Classification::ValidConsideredValid,
        (true, false) => Classification::ValidConsideredInvalid,
        (false, true) => Classification::InvalidConsideredValid,
        (false, false) => Classification::InvalidConsideredInvalid,
    }
}
