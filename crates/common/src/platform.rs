//! Target platform definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform a policy module is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" | "win32" => Ok(Platform::Windows),
            _ => Err(crate::Error::UnsupportedPlatform(s.to_string())),
        }
    }
}

impl Platform {
    /// Detect the platform this process runs on.
    pub fn current() -> crate::Result<Self> {
        if cfg!(target_os = "windows") {
            Ok(Platform::Windows)
        } else if cfg!(target_os = "linux") {
            Ok(Platform::Linux)
        } else {
            Err(crate::Error::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ))
        }
    }

    /// Directory name used for this platform's modules.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        }
    }
}
