//! YAML codec for the persisted registry document.
//!
//! ```yaml
//! clients:
//!   client1:
//!     id: 1
//!     ip: 203.0.113.4
//!     name: edge-1
//!     proxy_target: http://10.0.0.5:9090
//!     enabled: true
//! next_id: 2
//! ```
//!
//! `id` and `enabled` are optional when decoding: the id is taken from the
//! key and clients are enabled unless stated otherwise. `next_id` is optional
//! too; the effective value is never below one past the highest stored id.

use std::collections::{BTreeMap, HashSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::registry::error::{PersistenceError, RegistryError};
use crate::registry::record::{
    canonical_ip, check_name, check_proxy_target, client_key, parse_client_key, ClientRecord,
};

/// Records decoded from a document plus the next id to hand out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedRegistry {
    /// Sorted by id.
    pub records: Vec<ClientRecord>,
    pub next_id: u64,
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    clients: Option<BTreeMap<String, StoredClient>>,
    #[serde(default)]
    next_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StoredClient {
    #[serde(default)]
    id: Option<u64>,
    ip: String,
    name: String,
    proxy_target: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    clients: ClientsRef<'a>,
    next_id: u64,
}

struct ClientsRef<'a>(&'a [ClientRecord]);

impl Serialize for ClientsRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut sorted: Vec<&ClientRecord> = self.0.iter().collect();
        sorted.sort_by_key(|r| r.id);

        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for record in sorted {
            map.serialize_entry(&record.key(), record)?;
        }
        map.end()
    }
}

/// Serialize a snapshot of records. Keys are written in ascending id order.
pub fn encode(records: &[ClientRecord], next_id: u64) -> Result<String, PersistenceError> {
    serde_yaml::to_string(&DocumentRef {
        clients: ClientsRef(records),
        next_id,
    })
    .map_err(PersistenceError::Encode)
}

/// Parse a document and check it against the registry invariants.
pub fn decode(text: &str) -> Result<DecodedRegistry, PersistenceError> {
    if text.trim().is_empty() {
        return Ok(DecodedRegistry {
            records: Vec::new(),
            next_id: 1,
        });
    }

    let document: RegistryDocument =
        serde_yaml::from_str(text).map_err(PersistenceError::Decode)?;

    let mut records = Vec::new();
    let mut seen_ips = HashSet::new();

    for (key, stored) in document.clients.unwrap_or_default() {
        let id = parse_client_key(&key).ok_or_else(|| {
            PersistenceError::Invalid(format!("key `{key}` is not of the form client<id>"))
        })?;
        if let Some(stored_id) = stored.id {
            if stored_id != id {
                return Err(PersistenceError::Invalid(format!(
                    "key `{key}` holds id {stored_id}"
                )));
            }
        }
        let invalid = |e: RegistryError| PersistenceError::Invalid(format!("`{key}`: {e}"));
        let ip = canonical_ip(&stored.ip).map_err(invalid)?;
        let name = check_name(&stored.name).map_err(invalid)?;
        let proxy_target = check_proxy_target(&stored.proxy_target).map_err(invalid)?;

        if !seen_ips.insert(ip.clone()) {
            return Err(PersistenceError::Invalid(format!(
                "address {ip} is registered more than once"
            )));
        }

        records.push(ClientRecord {
            id,
            ip,
            name,
            proxy_target,
            enabled: stored.enabled,
        });
    }

    records.sort_by_key(|r| r.id);
    let floor = records.last().map(|r| r.id + 1).unwrap_or(1);
    let next_id = document.next_id.unwrap_or(floor).max(floor);

    Ok(DecodedRegistry { records, next_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, ip: &str, enabled: bool) -> ClientRecord {
        ClientRecord {
            id,
            ip: ip.to_string(),
            name: format!("edge-{id}"),
            proxy_target: format!("http://10.0.0.{id}:9090"),
            enabled,
        }
    }

    #[test]
    fn test_snapshot_survives_encode_and_decode() {
        let records = vec![
            record(12, "198.51.100.2", true),
            record(3, "198.51.100.1", false),
        ];

        let text = encode(&records, 20).unwrap();
        let decoded = decode(&text).unwrap();

        assert_eq!(decoded.records, vec![records[1].clone(), records[0].clone()]);
        assert_eq!(decoded.next_id, 20);
    }

    #[test]
    fn test_next_id_never_below_highest_id() {
        let text = "clients:\n  client9:\n    ip: 203.0.113.4\n    name: a\n    proxy_target: http://a\nnext_id: 3\n";
        assert_eq!(decode(text).unwrap().next_id, 10);
    }

    #[test]
    fn test_keys_written_in_id_order() {
        let text = encode(&[record(10, "198.51.100.10", true), record(2, "198.51.100.2", true)], 11)
            .unwrap();
        let first = text.find("client2:").unwrap();
        let second = text.find("client10:").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_decode_minimal_document() {
        let text = "clients:\n  client4:\n    ip: 203.0.113.4\n    name: edge\n    proxy_target: http://10.0.0.5:9090\n";
        let decoded = decode(text).unwrap();

        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].id, 4);
        assert!(decoded.records[0].enabled);
        assert_eq!(decoded.next_id, 5);
    }

    #[test]
    fn test_decode_empty_documents() {
        assert_eq!(decode("").unwrap().next_id, 1);
        assert_eq!(decode("clients:\n").unwrap().records.len(), 0);
        assert_eq!(decode("clients: {}\n").unwrap().next_id, 1);
    }

    #[test]
    fn test_decode_rejects_broken_invariants() {
        let bad_key = "clients:\n  edge1:\n    ip: 203.0.113.4\n    name: a\n    proxy_target: http://a\n";
        assert!(matches!(decode(bad_key), Err(PersistenceError::Invalid(_))));

        let id_mismatch = "clients:\n  client1:\n    id: 2\n    ip: 203.0.113.4\n    name: a\n    proxy_target: http://a\n";
        assert!(matches!(decode(id_mismatch), Err(PersistenceError::Invalid(_))));

        let duplicate_ip = "clients:\n  client1:\n    ip: 203.0.113.4\n    name: a\n    proxy_target: http://a\n  client2:\n    ip: 203.0.113.4\n    name: b\n    proxy_target: http://b\n";
        assert!(matches!(decode(duplicate_ip), Err(PersistenceError::Invalid(_))));
    }

    #[test]
    fn test_decode_canonicalizes_addresses() {
        let text = "clients:\n  client1:\n    ip: 2001:DB8::1\n    name: a\n    proxy_target: http://a\n  client2:\n    ip: '::ffff:203.0.113.4'\n    name: b\n    proxy_target: http://b\n";
        let decoded = decode(text).unwrap();
        assert_eq!(decoded.records[0].ip, "2001:db8::1");
        assert_eq!(decoded.records[1].ip, "203.0.113.4");

        let same_host = "clients:\n  client1:\n    ip: 2001:DB8::1\n    name: a\n    proxy_target: http://a\n  client2:\n    ip: 2001:db8::1\n    name: b\n    proxy_target: http://b\n";
        assert!(matches!(decode(same_host), Err(PersistenceError::Invalid(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_records() {
        let bad_target = "clients:\n  client1:\n    ip: 203.0.113.4\n    name: a\n    proxy_target: not a url\n";
        assert!(matches!(decode(bad_target), Err(PersistenceError::Invalid(_))));

        let empty_name = "clients:\n  client1:\n    ip: 203.0.113.4\n    name: ''\n    proxy_target: http://a\n";
        assert!(matches!(decode(empty_name), Err(PersistenceError::Invalid(_))));

        let bad_ip = "clients:\n  client1:\n    ip: somewhere\n    name: a\n    proxy_target: http://a\n";
        assert!(matches!(decode(bad_ip), Err(PersistenceError::Invalid(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_yaml() {
        assert!(matches!(
            decode("clients: [unterminated"),
            Err(PersistenceError::Decode(_))
        ));
        assert!(matches!(
            decode("clients:\n  client1:\n    name: missing-ip\n"),
            Err(PersistenceError::Decode(_))
        ));
    }
}
