use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Logical isolation boundary. Part of every persisted key and every
/// message header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    id: Uuid,
    region: String,
    major_version: u16,
    minor_version: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("invalid tenant id: {0}")]
    InvalidId(String),

    #[error("tenant region must not be empty")]
    MissingRegion,

    #[error("invalid {field} version: {value}")]
    InvalidVersion { field: &'static str, value: String },
}

static PROCESS_TENANT: OnceLock<Tenant> = OnceLock::new();

impl Tenant {
    pub fn new(id: Uuid, region: impl Into<String>, major_version: u16, minor_version: u16) -> Self {
        Self {
            id,
            region: region.into(),
            major_version,
            minor_version,
        }
    }

    /// Builds a tenant from the textual header/env representation.
    pub fn parse(id: &str, region: &str, major: &str, minor: &str) -> Result<Self, TenantError> {
        let id = Uuid::parse_str(id.trim()).map_err(|_| TenantError::InvalidId(id.to_string()))?;
        let region = region.trim();
        if region.is_empty() {
            return Err(TenantError::MissingRegion);
        }
        let major_version = major
            .trim()
            .parse::<u16>()
            .map_err(|_| TenantError::InvalidVersion {
                field: "major",
                value: major.to_string(),
            })?;
        let minor_version = minor
            .trim()
            .parse::<u16>()
            .map_err(|_| TenantError::InvalidVersion {
                field: "minor",
                value: minor.to_string(),
            })?;
        Ok(Self::new(id, region, major_version, minor_version))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    /// Installs the tenant this process serves. Only the first call wins;
    /// later calls hand the rejected tenant back.
    pub fn install_process(tenant: Tenant) -> Result<(), Tenant> {
        PROCESS_TENANT.set(tenant)
    }

    /// The tenant installed with [`Tenant::install_process`], if any.
    pub fn process() -> Option<&'static Tenant> {
        PROCESS_TENANT.get()
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} v{}.{})",
            self.id, self.region, self.major_version, self.minor_version
        )
    }
}
