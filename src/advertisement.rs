//! Advertisement builder: projects options + bound port + role into the JSON
//! payload handed to discovery.

use serde_json::{Map, Value as Json};

use crate::options::{Options, TopicRole, WIRE_KEY};
use crate::role::Role;

/// Builds the advertisement JSON for `role` given the current `options`.
///
/// Starts from a deep copy of the user-supplied `advertisement` override (or
/// an empty object) and overwrites the generated fields. The generated
/// fields always win over anything the user put in `advertisement` under the
/// same key.
pub fn build(role: Role, options: &Options) -> Json {
    let mut map: Map<String, Json> = match &options.advertisement {
        Json::Object(m) => m.clone(),
        _ => Map::new(),
    };

    map.insert("type".into(), Json::String(if role == Role::Mon { "monitor" } else { "service" }.into()));
    map.insert("name".into(), Json::Null); // placeholder; caller overwrites with the node name below.

    if let Some(ns) = &options.namespace {
        map.insert("namespace".into(), Json::String(ns.clone()));
    } else {
        map.remove("namespace");
    }

    let topic_key = match role {
        Role::Pub => Some(("broadcasts", TopicRole::Broadcasts)),
        Role::Sub => Some(("subscribesTo", TopicRole::SubscribesTo)),
        Role::Req => Some(("requests", TopicRole::Requests)),
        Role::Rep => Some(("respondsTo", TopicRole::RespondsTo)),
        Role::Mon => None,
    };
    if let Some((key, topic_role)) = topic_key {
        if let Some(list) = options.topic_list(topic_role) {
            map.insert(key.into(), Json::Array(list.iter().cloned().map(Json::String).collect()));
        }
    }

    map.insert("key".into(), Json::String(WIRE_KEY.into()));
    map.insert("axon_type".into(), Json::String(role.axon_type().into()));

    match role {
        Role::Pub | Role::Rep => {
            map.insert("port".into(), Json::Number(options.port.into()));
        }
        Role::Mon => {
            map.insert("port".into(), Json::Number(0.into()));
        }
        Role::Sub | Role::Req => {
            map.remove("port");
        }
    }

    Json::Object(map)
}

/// Sets the `name` field of an already-built advertisement.
///
/// Separated from [`build`] because the node name is immutable and known at
/// construction time, while the rest of the advertisement is rebuilt on every
/// option mutation.
pub fn with_name(mut advertisement: Json, name: &str) -> Json {
    if let Json::Object(map) = &mut advertisement {
        map.insert("name".into(), Json::String(name.to_string()));
    }
    advertisement
}
