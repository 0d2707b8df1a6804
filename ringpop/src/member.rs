use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Membership status as reported by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Alive,
    Suspect,
    Faulty,
    Leave,
}

impl MemberStatus {
    /// Suspect members stay routable until the detector declares them faulty.
    pub const fn is_reachable(self) -> bool {
        matches!(self, Self::Alive | Self::Suspect)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Suspect => "suspect",
            Self::Faulty => "faulty",
            Self::Leave => "leave",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(Self::Alive),
            "suspect" => Ok(Self::Suspect),
            "faulty" => Ok(Self::Faulty),
            "leave" => Ok(Self::Leave),
            other => Err(Error::Config(format!("unknown member status: {other}"))),
        }
    }
}

/// A single membership update for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub address: String,
    pub status: MemberStatus,
}

impl Change {
    pub fn new(address: impl Into<String>, status: MemberStatus) -> Self {
        Self {
            address: address.into(),
            status,
        }
    }

    pub fn alive(address: impl Into<String>) -> Self {
        Self::new(address, MemberStatus::Alive)
    }
}
