//! Peer matcher: decides, from a discovery advertisement, whether to connect
//! to a peer.

use regex::Regex;

use crate::options::{Options, TopicRole, WIRE_KEY};
use crate::peer::Peer;
use crate::role::Role;

/// The outcome of running a peer through steps 1-4 of the matcher (common to
/// both `added` and `removed` handling).
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Passed role/key/namespace checks.
    Accepted,
    /// Dropped, with a short reason (used only for `trace` logging).
    Rejected(&'static str),
}

/// Runs steps 1-4: advertisement presence, role pairing, key, namespace.
pub fn check_advertisement(role: Role, peer: &Peer, local_namespace: Option<&str>) -> Verdict {
    let Some(_adv) = &peer.advertisement else {
        return Verdict::Rejected("no advertisement");
    };

    if let Some(expected) = role.expected_peer_axon_type() {
        if peer.axon_type() != Some(expected) {
            return Verdict::Rejected("axon_type mismatch");
        }
    }

    if peer.key() != Some(WIRE_KEY) {
        return Verdict::Rejected("key mismatch");
    }

    match (local_namespace, peer.namespace()) {
        (None, None) => {}
        (Some(local), Some(remote)) if local == remote => {}
        _ => return Verdict::Rejected("namespace mismatch"),
    }

    Verdict::Accepted
}

/// A connection to attempt, computed by step 5 for SUB/REQ roles.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
}

/// Runs step 5: extracts the connect target and checks topic intersection.
///
/// Returns `None` if the peer should be dropped (no port, already connected —
/// checked by the caller via `is_connected` before calling this — or no
/// intersecting topic).
pub fn connect_target(role: Role, options: &Options, peer: &Peer) -> Option<ConnectTarget> {
    let port = peer.advertised_port()?;
    if port == 0 {
        return None;
    }
    let host = peer.connect_host(options.use_host_names).to_string();

    let (local_field, remote_field) = match role {
        Role::Sub => (TopicRole::SubscribesTo, "broadcasts"),
        Role::Req => (TopicRole::Requests, "respondsTo"),
        _ => return None,
    };

    if !topics_intersect(options.topic_list(local_field), peer.topic_list(remote_field).as_deref()) {
        return None;
    }

    Some(ConnectTarget { host, port })
}

/// Whether at least one local pattern matches at least one remote string as a
/// POSIX-extended-style regex.
///
/// A `None` local list means "match everything", a degenerate case kept
/// intentionally — see DESIGN.md.
fn topics_intersect(local_patterns: Option<&Vec<String>>, remote_topics: Option<&[String]>) -> bool {
    let Some(local_patterns) = local_patterns else {
        return true;
    };
    let Some(remote_topics) = remote_topics else {
        return false;
    };
    for pattern in local_patterns {
        let Ok(re) = Regex::new(pattern) else { continue };
        if remote_topics.iter().any(|topic| re.is_match(topic)) {
            return true;
        }
    }
    false
}
