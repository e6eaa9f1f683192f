use std::{fmt::Display, str::FromStr};

use thiserror::Error;

/// Number of hex characters in a module address.
pub const ADDRESS_LEN: usize = 4;


#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("module address must be {ADDRESS_LEN} hex characters, got {0:?}")]
    InvalidLength(String),
    #[error("module address contains a non-hex character: {0:?}")]
    NotHex(String),
}

/// Address of a module on the bus, e.g. `6C94`.
///
/// Always stored upper-case, as it appears in frames.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleAddress(String);

impl ModuleAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ModuleAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(s.to_string()));
        }

        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(s.to_string()));
        }

        Ok(Self(s.to_ascii_uppercase()))
    }
}

impl Display for ModuleAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
