//! Connection-open configuration. Kept as its own module the way
//! `beads_rust::config` separates configuration concerns from the storage
//! implementation, even though this crate's configuration surface is
//! narrower: just what governs how a single `Connection::open` call
//! behaves.

use crate::error::{OrmError, Result};

/// Open-mode flags. A bare bitset rather than pulling in the `bitflags`
/// crate, since the set is small and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: Self = Self(1 << 0);
    pub const READ_WRITE: Self = Self(1 << 1);
    pub const CREATE: Self = Self(1 << 2);
    pub const NO_MUTEX: Self = Self(1 << 3);
    pub const FULL_MUTEX: Self = Self(1 << 4);
    pub const SHARED_CACHE: Self = Self(1 << 5);
    pub const PRIVATE_CACHE: Self = Self(1 << 6);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::READ_WRITE)
    }
}

impl Default for OpenFlags {
    /// `ReadWrite | Create`, matching the common case.
    fn default() -> Self {
        Self::READ_WRITE.or(Self::CREATE)
    }
}

impl OpenFlags {
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

impl From<OpenFlags> for rusqlite::OpenFlags {
    fn from(flags: OpenFlags) -> Self {
        let mut out = Self::empty();
        if flags.contains(OpenFlags::READ_ONLY) {
            out |= Self::SQLITE_OPEN_READ_ONLY;
        }
        if flags.contains(OpenFlags::READ_WRITE) {
            out |= Self::SQLITE_OPEN_READ_WRITE;
        }
        if flags.contains(OpenFlags::CREATE) {
            out |= Self::SQLITE_OPEN_CREATE;
        }
        if flags.contains(OpenFlags::NO_MUTEX) {
            out |= Self::SQLITE_OPEN_NO_MUTEX;
        }
        if flags.contains(OpenFlags::FULL_MUTEX) {
            out |= Self::SQLITE_OPEN_FULL_MUTEX;
        }
        if flags.contains(OpenFlags::SHARED_CACHE) {
            out |= Self::SQLITE_OPEN_SHARED_CACHE;
        }
        if flags.contains(OpenFlags::PRIVATE_CACHE) {
            out |= Self::SQLITE_OPEN_PRIVATE_CACHE;
        }
        if out.is_empty() {
            out = Self::default();
        }
        out
    }
}

/// A database encryption key. Binary keys must be exactly 32 bytes.
#[derive(Clone)]
pub enum EncryptionKey {
    Text(String),
    Binary([u8; 32]),
}

impl EncryptionKey {
    /// The `pragma key = ...` statement text for this key.
    ///
    /// # Errors
    ///
    /// Never fails for `Text`; kept fallible for symmetry and to allow
    /// future validation of the binary arm without changing the signature.
    pub fn pragma_sql(&self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(format!("pragma key = '{}'", text.replace('\'', "''"))),
            Self::Binary(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                Ok(format!("pragma key = \"x'{hex}'\""))
            }
        }
    }

    /// Build a binary key, enforcing the 32-byte invariant.
    pub fn binary(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            OrmError::InvalidArgument(format!(
                "binary encryption key must be exactly 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::Binary(array))
    }
}

/// User-version schema-generation target and the function that upgrades an
/// older on-disk schema to it. The library advances `PRAGMA user_version`
/// to `target` once `upgrade` returns successfully (see DESIGN.md for why
/// the library, not the caller, owns that step).
pub struct UserVersionConfig<F>
where
    F: FnOnce(&rusqlite::Connection, i64) -> Result<()>,
{
    pub target: i64,
    pub upgrade: F,
}

/// Full configuration for [`crate::orm::connection::Connection::open`].
pub struct OpenOptions {
    pub flags: OpenFlags,
    pub encryption_key: Option<EncryptionKey>,
    pub busy_timeout_ms: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            flags: OpenFlags::default(),
            encryption_key: None,
            busy_timeout_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_key_of_wrong_length_is_invalid_argument() {
        let err = EncryptionKey::binary(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, OrmError::InvalidArgument(_)));
    }

    #[test]
    fn binary_key_pragma_is_hex_encoded() {
        let key = EncryptionKey::binary(&[0xab; 32]).unwrap();
        let sql = key.pragma_sql().unwrap();
        assert!(sql.starts_with("pragma key = \"x'"));
        assert!(sql.contains(&"ab".repeat(32)));
    }

    #[test]
    fn text_key_quotes_are_doubled() {
        let key = EncryptionKey::Text("o'brien".to_string());
        assert_eq!(key.pragma_sql().unwrap(), "pragma key = 'o''brien'");
    }
}
