//! Target dispatch for the supported brick families.
//!
//! The target kind selects the unlock policy, the reply-length overrides,
//! the firmware checksum window, and the chunk-size policy used when
//! talking to a device.

use std::fmt;

/// Programmable bricks addressable over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    /// Original RCX (1.0 ROM line).
    Rcx,
    /// RCX 2.0.
    #[default]
    Rcx2,
    /// Scout.
    Scout,
    /// CyberMaster.
    CyberMaster,
    /// Swan (aftermarket RCX firmware).
    Swan,
    /// Spybotics.
    Spybotics,
}

impl Target {
    /// Get the target kind from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "rcx" => Some(Self::Rcx),
            "rcx2" => Some(Self::Rcx2),
            "scout" => Some(Self::Scout),
            "cm" | "cybermaster" => Some(Self::CyberMaster),
            "swan" => Some(Self::Swan),
            "spy" | "spybotics" => Some(Self::Spybotics),
            _ => None,
        }
    }

    /// Targets that run user programs only after a firmware download.
    ///
    /// Scout, CyberMaster, and Spybotics execute out of ROM; the others
    /// boot into a bare ROM and need firmware before accepting programs.
    #[must_use]
    pub fn requires_firmware(self) -> bool {
        matches!(self, Self::Rcx | Self::Rcx2 | Self::Swan)
    }

    /// Targets that need an unlock exchange after the wake-up ping.
    #[must_use]
    pub fn needs_unlock(self) -> bool {
        matches!(self, Self::Scout | Self::CyberMaster)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rcx => write!(f, "RCX"),
            Self::Rcx2 => write!(f, "RCX2"),
            Self::Scout => write!(f, "Scout"),
            Self::CyberMaster => write!(f, "CyberMaster"),
            Self::Swan => write!(f, "Swan"),
            Self::Spybotics => write!(f, "Spybotics"),
        }
    }
}
