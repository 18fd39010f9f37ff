//! Entry identity.
//!
//! A process may host several independently configured logical server
//! instances ("entries"). Interceptors and the telemetry registries key
//! everything by entry name, so the name must be unique within a process.

use serde::{Deserialize, Serialize};

/// Fallback entry name assigned when a caller supplies an empty name.
///
/// Registry lookups key by name, so the fallback must be deterministic:
/// every anonymous construction resolves to the same entry.
pub const DEFAULT_ENTRY_NAME: &str = "default";

/// Fallback entry kind used when a caller supplies an empty kind.
pub const DEFAULT_ENTRY_KIND: &str = "http";

/// Identity of one logical server instance.
///
/// # Example
///
/// ```
/// use stoa_core::EntryInfo;
///
/// let entry = EntryInfo::new("user-api", "http");
/// assert_eq!(entry.name(), "user-api");
///
/// // Empty fields fall back to deterministic defaults.
/// let anon = EntryInfo::new("", "");
/// assert_eq!(anon.name(), "default");
/// assert_eq!(anon.kind(), "http");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryInfo {
    name: String,
    kind: String,
}

impl EntryInfo {
    /// Creates an entry identity, substituting defaults for empty fields.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        let kind = kind.into();
        Self {
            name: if name.is_empty() {
                DEFAULT_ENTRY_NAME.to_string()
            } else {
                name
            },
            kind: if kind.is_empty() {
                DEFAULT_ENTRY_KIND.to_string()
            } else {
                kind
            },
        }
    }

    /// The entry name. Never empty.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry kind (e.g. "http"). Never empty.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Default for EntryInfo {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_NAME, DEFAULT_ENTRY_KIND)
    }
}

impl std::fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.kind)
    }
}
