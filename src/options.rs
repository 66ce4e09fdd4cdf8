//! Options store: the mutex-guarded configuration bag behind every [`Node`](crate::Node).

use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::error::{Error, ErrorKind, Result};

/// Default hello interval, in milliseconds.
pub const DEFAULT_HELLO_INTERVAL_MS: u64 = 2000;
/// Default check interval, in milliseconds.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 4000;
/// Default node timeout, in milliseconds.
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 5000;
/// Default master timeout, in milliseconds.
pub const DEFAULT_MASTER_TIMEOUT_MS: u64 = 6000;

/// The fixed interop key every advertisement must carry.
pub const WIRE_KEY: &str = "$$";

/// A typed value accepted by [`OptionsStore::set_option`].
///
/// Callers pick the variant matching the option's documented type.
#[derive(Clone, Debug)]
pub enum OptionValue {
    /// A millisecond duration, a port, a weight, etc.
    U64(u64),
    /// `mastersRequired`, `multicastTTL`, and friends that are signed in spirit.
    I64(i64),
    /// A flag such as `reuseAddr` or `useHostNames`.
    Bool(bool),
    /// A string such as `address` or `namespace`.
    Str(String),
    /// A topic list (`broadcasts`, `subscribesTo`, `requests`, `respondsTo`).
    StringList(Vec<String>),
    /// A JSON document (`advertisement`).
    Json(Json),
}

/// Role-independent and role-specific configuration for a [`Node`](crate::Node).
#[derive(Clone, Debug)]
pub struct Options {
    // Timing
    pub hello_interval_ms: u64,
    pub check_interval_ms: u64,
    pub node_timeout_ms: u64,
    pub master_timeout_ms: u64,

    // Network binding
    pub address: Option<String>,
    pub port: u16,
    pub broadcast: bool,
    pub multicast: Option<String>,
    pub multicast_ttl: u32,
    pub unicast: Option<String>,
    pub hostname: Option<String>,
    pub use_host_names: bool,

    // Discovery knobs
    pub key: String,
    pub masters_required: u32,
    pub weight: i64,
    pub client: bool,
    pub reuse_addr: bool,
    pub ignore_process: bool,
    pub ignore_instance: bool,

    // Messaging knobs
    pub namespace: Option<String>,
    pub advertisement: Json,
    pub broadcasts: Option<Vec<String>>,
    pub subscribes_to: Option<Vec<String>>,
    pub requests: Option<Vec<String>>,
    pub responds_to: Option<Vec<String>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            hello_interval_ms: DEFAULT_HELLO_INTERVAL_MS,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            node_timeout_ms: DEFAULT_NODE_TIMEOUT_MS,
            master_timeout_ms: DEFAULT_MASTER_TIMEOUT_MS,
            address: None,
            port: 0,
            broadcast: true,
            multicast: None,
            multicast_ttl: 1,
            unicast: None,
            hostname: None,
            use_host_names: false,
            key: String::new(),
            masters_required: 0,
            weight: 0,
            client: false,
            reuse_addr: true,
            ignore_process: true,
            ignore_instance: true,
            namespace: None,
            advertisement: Json::Object(Default::default()),
            broadcasts: None,
            subscribes_to: None,
            requests: None,
            responds_to: None,
        }
    }
}

/// The role-specific topic list an advertisement/subscription lookup should use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicRole {
    Broadcasts,
    SubscribesTo,
    Requests,
    RespondsTo,
}

impl Options {
    /// Returns the topic list for `role`, if any is set.
    pub fn topic_list(&self, role: TopicRole) -> Option<&Vec<String>> {
        match role {
            TopicRole::Broadcasts => self.broadcasts.as_ref(),
            TopicRole::SubscribesTo => self.subscribes_to.as_ref(),
            TopicRole::Requests => self.requests.as_ref(),
            TopicRole::RespondsTo => self.responds_to.as_ref(),
        }
    }
}

/// Thread-safe holder for [`Options`], guarding reads and writes from the
/// node's background tasks and its public setters alike.
///
/// Every successful [`set_option`](Self::set_option) call is expected to be
/// followed by the caller re-running the advertisement builder; the store
/// itself has no knowledge of discovery or the wire format.
pub struct OptionsStore {
    inner: Mutex<Options>,
}

impl OptionsStore {
    /// Creates a store seeded with [`Options::default`].
    pub fn new() -> Self {
        Self { inner: Mutex::new(Options::default()) }
    }

    /// Runs `f` with shared read access to the current options.
    pub fn with<R>(&self, f: impl FnOnce(&Options) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Runs `f` with exclusive access to the options, for internal bulk mutation.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Options) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Returns a deep copy of the current options.
    pub fn snapshot(&self) -> Options {
        self.inner.lock().clone()
    }

    /// Sets the bound listener port (called once the transport has bound).
    pub fn set_bound_port(&self, port: u16) {
        self.inner.lock().port = port;
    }

    /// Applies a named option mutation.
    ///
    /// Unknown names and value/type mismatches are rejected without touching
    /// the stored options.
    pub fn set_option(&self, name: &str, value: OptionValue) -> Result<()> {
        let mut opts = self.inner.lock();
        match (name, value) {
            ("helloInterval", OptionValue::U64(v)) => opts.hello_interval_ms = v,
            ("checkInterval", OptionValue::U64(v)) => opts.check_interval_ms = v,
            ("nodeTimeout", OptionValue::U64(v)) => opts.node_timeout_ms = v,
            ("masterTimeout", OptionValue::U64(v)) => opts.master_timeout_ms = v,
            ("address", OptionValue::Str(v)) => opts.address = Some(v),
            ("port", OptionValue::U64(v)) => {
                opts.port = u16::try_from(v)
                    .map_err(|_| Error::new(ErrorKind::InvalidOptionValue("port".into())))?
            }
            ("broadcast", OptionValue::Bool(v)) => opts.broadcast = v,
            ("multicast", OptionValue::Str(v)) => opts.multicast = Some(v),
            ("multicastTTL", OptionValue::U64(v)) => {
                opts.multicast_ttl = u32::try_from(v)
                    .map_err(|_| Error::new(ErrorKind::InvalidOptionValue("multicastTTL".into())))?
            }
            ("unicast", OptionValue::Str(v)) => opts.unicast = Some(v),
            ("hostname", OptionValue::Str(v)) => opts.hostname = Some(v),
            ("useHostNames", OptionValue::Bool(v)) => opts.use_host_names = v,
            ("key", OptionValue::Str(v)) => opts.key = v,
            ("mastersRequired", OptionValue::U64(v)) => {
                opts.masters_required = u32::try_from(v)
                    .map_err(|_| Error::new(ErrorKind::InvalidOptionValue("mastersRequired".into())))?
            }
            ("weight", OptionValue::I64(v)) => opts.weight = v,
            ("client", OptionValue::Bool(v)) => opts.client = v,
            ("reuseAddr", OptionValue::Bool(v)) => opts.reuse_addr = v,
            ("ignoreProcess", OptionValue::Bool(v)) => opts.ignore_process = v,
            ("ignoreInstance", OptionValue::Bool(v)) => opts.ignore_instance = v,
            ("namespace", OptionValue::Str(v)) => opts.namespace = Some(v),
            ("advertisement", OptionValue::Json(v)) => opts.advertisement = v,
            ("broadcasts", OptionValue::StringList(v)) => opts.broadcasts = Some(v),
            ("subscribesTo", OptionValue::StringList(v)) => opts.subscribes_to = Some(v),
            ("requests", OptionValue::StringList(v)) => opts.requests = Some(v),
            ("respondsTo", OptionValue::StringList(v)) => opts.responds_to = Some(v),
            (name, _) if KNOWN_OPTIONS.contains(&name) => {
                return Err(Error::new(ErrorKind::InvalidOptionValue(name.to_string())))
            }
            (name, _) => return Err(Error::new(ErrorKind::UnknownOption(name.to_string()))),
        }
        Ok(())
    }
}

impl Default for OptionsStore {
    fn default() -> Self {
        Self::new()
    }
}

const KNOWN_OPTIONS: &[&str] = &[
    "helloInterval",
    "checkInterval",
    "nodeTimeout",
    "masterTimeout",
    "address",
    "port",
    "broadcast",
    "multicast",
    "multicastTTL",
    "unicast",
    "hostname",
    "useHostNames",
    "key",
    "mastersRequired",
    "weight",
    "client",
    "reuseAddr",
    "ignoreProcess",
    "ignoreInstance",
    "namespace",
    "advertisement",
    "broadcasts",
    "subscribesTo",
    "requests",
    "respondsTo",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timing_values() {
        let opts = Options::default();
        assert_eq!(opts.hello_interval_ms, 2000);
        assert_eq!(opts.check_interval_ms, 4000);
        assert_eq!(opts.node_timeout_ms, 5000);
        assert_eq!(opts.master_timeout_ms, 6000);
    }

    #[test]
    fn set_option_updates_namespace() {
        let store = OptionsStore::new();
        store.set_option("namespace", OptionValue::Str("n1".into())).unwrap();
        assert_eq!(store.snapshot().namespace.as_deref(), Some("n1"));
    }

    #[test]
    fn set_option_rejects_unknown_name() {
        let store = OptionsStore::new();
        let err = store.set_option("bogus", OptionValue::Bool(true)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownOption("bogus".into()));
    }

    #[test]
    fn set_option_rejects_wrong_value_type() {
        let store = OptionsStore::new();
        let err = store.set_option("namespace", OptionValue::Bool(true)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOptionValue("namespace".into()));
    }

    #[test]
    fn resubscribing_topic_list_replaces_not_merges() {
        let store = OptionsStore::new();
        store.set_option("broadcasts", OptionValue::StringList(vec!["a".into()])).unwrap();
        store.set_option("broadcasts", OptionValue::StringList(vec!["b".into(), "c".into()])).unwrap();
        assert_eq!(store.snapshot().broadcasts, Some(vec!["b".to_string(), "c".to_string()]));
    }
}
