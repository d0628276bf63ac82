use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A linked work-account platform.
///
/// The set is closed: every dispatch on a platform is an exhaustive `match`,
/// so adding a variant is a compile error until each call site handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Google mail
    Gmail,
    /// Google Drive documents
    Drive,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Gmail, Platform::Drive];

    /// Stable lowercase name, used as the storage key and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Gmail => "gmail",
            Platform::Drive => "drive",
        }
    }

    /// Icon shown next to documents from this platform.
    pub fn source_icon(self) -> &'static str {
        match self {
            Platform::Gmail => "/icons/gmail.svg",
            Platform::Drive => "/icons/google-drive.svg",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" | "mail" => Ok(Platform::Gmail),
            "drive" | "docs" => Ok(Platform::Drive),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}
