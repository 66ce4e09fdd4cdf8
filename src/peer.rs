//! Peer (discovery node) data model and the events the discovery adapter
//! emits about it.

use serde_json::Value as Json;

/// An external node observed via discovery.
///
/// Entirely owned by the discovery adapter; the core holds no references
/// across events, only the data copied out of this struct.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peer {
    /// Unique instance id, distinguishing restarts of the same process.
    pub instance: String,
    /// Network address the hello beacon arrived from.
    pub address: String,
    /// Hostname the peer advertised, if any.
    pub hostname: Option<String>,
    /// The peer's JSON advertisement, if it has published one yet.
    pub advertisement: Option<Json>,
}

impl Peer {
    /// The `port` field of the advertisement, if present and a valid `u16`.
    pub fn advertised_port(&self) -> Option<u16> {
        self.advertisement.as_ref()?.get("port")?.as_u64().and_then(|p| u16::try_from(p).ok())
    }

    /// The `axon_type` field of the advertisement, if present.
    pub fn axon_type(&self) -> Option<&str> {
        self.advertisement.as_ref()?.get("axon_type")?.as_str()
    }

    /// The `key` field of the advertisement, if present.
    pub fn key(&self) -> Option<&str> {
        self.advertisement.as_ref()?.get("key")?.as_str()
    }

    /// The `namespace` field of the advertisement, if present.
    pub fn namespace(&self) -> Option<&str> {
        self.advertisement.as_ref()?.get("namespace")?.as_str()
    }

    /// The peer's topic list under `field` (one of `broadcasts`, `subscribesTo`,
    /// `requests`, `respondsTo`), if present.
    pub fn topic_list(&self, field: &str) -> Option<Vec<String>> {
        let arr = self.advertisement.as_ref()?.get(field)?.as_array()?;
        Some(arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
    }

    /// Connect target: hostname if `use_host_names` and one is known, else address.
    pub fn connect_host<'a>(&'a self, use_host_names: bool) -> &'a str {
        if use_host_names {
            self.hostname.as_deref().unwrap_or(&self.address)
        } else {
            &self.address
        }
    }
}

/// An event fired by the discovery adapter.
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    /// A new instance id was observed (or re-observed after removal).
    Added(Peer),
    /// A previously-added peer has not been heard from within `nodeTimeout`.
    Removed(Peer),
    /// A discovery-layer runtime error (socket, bind, decode failure).
    Error(String),
}
