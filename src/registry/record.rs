//! Client record types and input validation.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::registry::error::RegistryError;

/// Prefix of the stable per-record key (`client<id>`).
pub const KEY_PREFIX: &str = "client";

/// A registered client and the target its traffic is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: u64,
    /// Source address that registered the client. Unique across records.
    pub ip: String,
    pub name: String,
    pub proxy_target: String,
    pub enabled: bool,
}

impl ClientRecord {
    /// Key this record is stored under.
    pub fn key(&self) -> String {
        client_key(self.id)
    }
}

/// Build the record key for an id.
pub fn client_key(id: u64) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Parse a `client<id>` key back into its id. Zero is not a valid id.
pub fn parse_client_key(key: &str) -> Option<u64> {
    key.strip_prefix(KEY_PREFIX)?
        .parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
}

/// Body of a create request.
///
/// Fields default to empty so that a missing field reaches validation and
/// is reported as such instead of as a JSON shape error.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewClient {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub proxy_target: String,
}

/// A create request that passed validation, with its source address
/// normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedClient {
    pub name: String,
    pub proxy_target: String,
    pub ip: String,
}

impl NewClient {
    pub fn new(name: impl Into<String>, proxy_target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            proxy_target: proxy_target.into(),
        }
    }

    /// Check the request against the record invariants.
    pub fn validate(&self, source_ip: &str) -> Result<ValidatedClient, RegistryError> {
        Ok(ValidatedClient {
            name: check_name(&self.name)?,
            proxy_target: check_proxy_target(&self.proxy_target)?,
            ip: canonical_ip(source_ip)?,
        })
    }
}

/// Trimmed display name; empty names are rejected.
pub(crate) fn check_name(name: &str) -> Result<String, RegistryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistryError::Validation("name is required".to_string()));
    }
    Ok(name.to_string())
}

/// Trimmed target; must be an absolute URL with a host.
pub(crate) fn check_proxy_target(proxy_target: &str) -> Result<String, RegistryError> {
    let proxy_target = proxy_target.trim();
    if proxy_target.is_empty() {
        return Err(RegistryError::Validation(
            "proxy_target is required".to_string(),
        ));
    }
    let url = Url::parse(proxy_target).map_err(|e| {
        RegistryError::Validation(format!("proxy_target `{proxy_target}` is not a valid URL: {e}"))
    })?;
    if !url.has_host() {
        return Err(RegistryError::Validation(format!(
            "proxy_target `{proxy_target}` must be an absolute URL with a host"
        )));
    }
    Ok(proxy_target.to_string())
}

/// Canonical text form of an address. IPv4-mapped IPv6 addresses collapse to
/// IPv4 and IPv6 is lowercased, so one host has exactly one index key.
pub(crate) fn canonical_ip(ip: &str) -> Result<String, RegistryError> {
    let parsed: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| RegistryError::Validation(format!("invalid client address `{ip}`")))?;
    Ok(parsed.to_canonical().to_string())
}
