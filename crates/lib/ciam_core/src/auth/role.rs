//! User roles and the quota schedule attached to each role.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a user. Persisted and embedded in access tokens as its numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Role {
    AnonymUser,
    RegisteredUser,
}

/// A numeric role id that does not map to any [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown role id {0}")]
pub struct UnknownRole(pub u8);

impl Role {
    pub const fn id(self) -> u8 {
        match self {
            Self::AnonymUser => 0,
            Self::RegisteredUser => 1,
        }
    }

    pub const fn is_registered_user(self) -> bool {
        matches!(self, Self::RegisteredUser)
    }

    /// Current quota limits for the role.
    pub const fn quotas(self) -> Quotas {
        match self {
            Self::AnonymUser => Quotas {
                prompt_length_max: 100,
                requests_per_minute: 1,
                requests_per_day: 5,
            },
            Self::RegisteredUser => Quotas {
                prompt_length_max: 300,
                requests_per_minute: 3,
                requests_per_day: 20,
            },
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = UnknownRole;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AnonymUser),
            1 => Ok(Self::RegisteredUser),
            other => Err(UnknownRole(other)),
        }
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> Self {
        role.id()
    }
}

/// Quota limits. Compared structurally to detect access tokens minted under an
/// older schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub prompt_length_max: u16,
    #[serde(rename = "rpm")]
    pub requests_per_minute: u16,
    #[serde(rename = "rpd")]
    pub requests_per_day: u16,
}
