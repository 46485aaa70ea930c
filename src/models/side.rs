//! Option side (call / put)
//!
//! Serialized the way the upstream and the API name them: "CE" and "PE".
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    /// Call leg
    #[serde(rename = "CE", alias = "ce", alias = "call", alias = "CALL")]
    Call,

    /// Put leg
    #[serde(rename = "PE", alias = "pe", alias = "put", alias = "PUT")]
    Put,
}

impl OptionSide {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "ce" | "call" | "c" => Ok(OptionSide::Call),
            "pe" | "put" | "p" => Ok(OptionSide::Put),
            _ => Err(format!("Invalid option type: '{}'. Valid values: CE, PE", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Call => "CE",
            OptionSide::Put => "PE",
        }
    }
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
