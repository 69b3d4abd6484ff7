//! Device class identification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Client-declared device category.
///
/// Used for presence display and to tag `request_sync` broadcasts so
/// recipients know which kind of device asked. Never used for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Phone or tablet, typically the scanning device
    Mobile,

    /// Laptop or workstation, typically the curating device
    #[default]
    Desktop,
}

impl DeviceType {
    /// Returns the wire name of this device type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        }
    }
}

impl FromStr for DeviceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mobile" => Ok(Self::Mobile),
            "desktop" => Ok(Self::Desktop),
            other => Err(DomainError::InvalidFieldValue {
                field: "deviceType".to_string(),
                value: other.to_string(),
                expected: "mobile or desktop".to_string(),
            }),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
