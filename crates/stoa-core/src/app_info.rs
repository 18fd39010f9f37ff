//! Process-wide application and deployment facts.
//!
//! Metric labels and trace resource attributes need the application name,
//! version, and deployment coordinates (realm/region/az/domain/instance).
//! These are process facts, not per-request state: they are resolved once
//! and shared. Any value that cannot be resolved is substituted with the
//! [`UNKNOWN`] sentinel rather than omitted, so every telemetry observation
//! keeps its full label arity.

use std::sync::OnceLock;

/// Sentinel label value used when a fact cannot be resolved.
pub const UNKNOWN: &str = "unknown";

static APP_INFO: OnceLock<AppInfo> = OnceLock::new();
static DEPLOYMENT: OnceLock<DeploymentFacts> = OnceLock::new();

/// Application identity: name and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

impl AppInfo {
    /// Creates application info, substituting [`UNKNOWN`] for empty fields.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            name: if name.is_empty() { UNKNOWN.into() } else { name },
            version: if version.is_empty() {
                UNKNOWN.into()
            } else {
                version
            },
        }
    }

    /// Installs the process-wide application info.
    ///
    /// First call wins; later calls are ignored, mirroring the
    /// first-registration-wins rule the entry registries follow.
    pub fn init(name: impl Into<String>, version: impl Into<String>) {
        let _ = APP_INFO.set(Self::new(name, version));
    }

    /// Returns the process-wide application info, or an all-[`UNKNOWN`]
    /// value when [`AppInfo::init`] was never called.
    #[must_use]
    pub fn global() -> &'static AppInfo {
        APP_INFO.get_or_init(|| AppInfo::new(UNKNOWN, UNKNOWN))
    }
}

/// Deployment coordinates resolved from the environment.
///
/// | Field | Environment variable |
/// |-------|----------------------|
/// | realm | `REALM` |
/// | region | `REGION` |
/// | az | `AZ` |
/// | domain | `DOMAIN` |
/// | instance | `HOSTNAME` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentFacts {
    /// Deployment realm.
    pub realm: String,
    /// Deployment region.
    pub region: String,
    /// Availability zone.
    pub az: String,
    /// Deployment domain (e.g. "prod", "test").
    pub domain: String,
    /// Host identity of this instance.
    pub instance: String,
}

impl DeploymentFacts {
    /// Resolves deployment facts from the environment, substituting
    /// [`UNKNOWN`] per field on failure.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            realm: env_or_unknown("REALM"),
            region: env_or_unknown("REGION"),
            az: env_or_unknown("AZ"),
            domain: env_or_unknown("DOMAIN"),
            instance: env_or_unknown("HOSTNAME"),
        }
    }

    /// Returns the process-wide deployment facts, resolving them from the
    /// environment on first use.
    #[must_use]
    pub fn global() -> &'static DeploymentFacts {
        DEPLOYMENT.get_or_init(DeploymentFacts::from_env)
    }
}

fn env_or_unknown(key: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fields_substitute_unknown() {
        let info = AppInfo::new("", "");
        assert_eq!(info.name, UNKNOWN);
        assert_eq!(info.version, UNKNOWN);
    }

    #[test]
    fn test_env_or_unknown_missing_var() {
        assert_eq!(env_or_unknown("STOA_TEST_NO_SUCH_VAR"), UNKNOWN);
    }

    #[test]
    fn test_from_env_has_full_arity() {
        let facts = DeploymentFacts::from_env();
        for v in [
            &facts.realm,
            &facts.region,
            &facts.az,
            &facts.domain,
            &facts.instance,
        ] {
            assert!(!v.is_empty());
        }
    }
}
