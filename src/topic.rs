//! Topic namer: computes and strips on-the-wire topic strings.

const MESSAGE_PREFIX: &str = "message::";

/// Computes the fulltopic a PUB sends on / a SUB subscribes under.
///
/// `"message::" + (namespace + "::" if set) + user_topic`.
pub fn pub_sub_fulltopic(namespace: Option<&str>, user_topic: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{MESSAGE_PREFIX}{ns}::{user_topic}"),
        _ => format!("{MESSAGE_PREFIX}{user_topic}"),
    }
}

/// Strips the `"message::"` and, if present, `"<namespace>::"` prefix from an
/// inbound fulltopic, returning the user-level topic.
///
/// Only strips the namespace prefix that matches `namespace`; an inbound
/// fulltopic from a different namespace is returned with just the
/// `"message::"` prefix removed (the router never reaches this case because
/// subscriptions are namespace-scoped via the fulltopic pattern itself).
pub fn strip_pub_sub_fulltopic<'a>(namespace: Option<&str>, fulltopic: &'a str) -> &'a str {
    let after_message = fulltopic.strip_prefix(MESSAGE_PREFIX).unwrap_or(fulltopic);
    match namespace {
        Some(ns) if !ns.is_empty() => {
            let ns_prefix = format!("{ns}::");
            after_message.strip_prefix(ns_prefix.as_str()).unwrap_or(after_message)
        }
        _ => after_message,
    }
}

/// REQ/REP topics are carried literally; this is the identity function kept
/// for symmetry with [`pub_sub_fulltopic`] so call sites read uniformly.
pub fn req_rep_topic(user_topic: &str) -> String {
    user_topic.to_string()
}
