use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Locking mode requested for a managed document.
///
/// Numeric codes are stable: they are what gets written into a mapped lock
/// field in storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    None,
    Optimistic,
    PessimisticRead,
    PessimisticWrite,
}

impl LockMode {
    /// Numeric code of this mode.
    pub fn code(&self) -> i64 {
        match self {
            Self::None => 0,
            Self::Optimistic => 1,
            Self::PessimisticRead => 2,
            Self::PessimisticWrite => 4,
        }
    }

    /// Parse a numeric lock code.
    pub fn from_code(code: i64) -> Result<Self, TypeError> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Optimistic),
            2 => Ok(Self::PessimisticRead),
            4 => Ok(Self::PessimisticWrite),
            other => Err(TypeError::UnknownLockMode(other)),
        }
    }

    /// Returns `true` for the modes that lock at the storage level.
    pub fn is_pessimistic(&self) -> bool {
        matches!(self, Self::PessimisticRead | Self::PessimisticWrite)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Optimistic => "optimistic",
            Self::PessimisticRead => "pessimistic_read",
            Self::PessimisticWrite => "pessimistic_write",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for mode in [
            LockMode::None,
            LockMode::Optimistic,
            LockMode::PessimisticRead,
            LockMode::PessimisticWrite,
        ] {
            assert_eq!(LockMode::from_code(mode.code()).unwrap(), mode);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(
            LockMode::from_code(3).unwrap_err(),
            TypeError::UnknownLockMode(3)
        );
    }

    #[test]
    fn pessimistic_modes() {
        assert!(LockMode::PessimisticRead.is_pessimistic());
        assert!(LockMode::PessimisticWrite.is_pessimistic());
        assert!(!LockMode::Optimistic.is_pessimistic());
        assert!(!LockMode::None.is_pessimistic());
    }
}
