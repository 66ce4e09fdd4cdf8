#![cfg_attr(docsrs, feature(doc_cfg))]

//! # axon — zero-configuration peer messaging
//!
//! `axon` is a decentralized publish/subscribe and request/reply messaging
//! library for peer services on a LAN. Each process hosts one [`Node`] that
//! declares a role — [publisher](Role::Pub), [subscriber](Role::Sub),
//! [requester](Role::Req), [replier](Role::Rep), or [monitor](Role::Mon) —
//! and a set of topics it emits or consumes. Nodes on the same network
//! segment discover each other automatically over a UDP hello-beacon
//! protocol and form connections only between peers whose advertised topics
//! match, so applications never configure addresses, ports, or routes.
//!
//! ## What's provided
//!
//! * peer discovery: a hello-beacon protocol that advertises a node's JSON
//!   [advertisement](advertisement) and tracks peers through `added` /
//!   `removed` churn ([`discovery`])
//! * a typed, multi-field wire transport ([`amp`]) carrying publish/subscribe
//!   and request/reply traffic over plain TCP ([`transport`])
//! * a [peer matcher](matcher) that decides, from a discovery advertisement,
//!   whether a peer is compatible and should be connected to
//! * an insertion-ordered [subscription table](subscriptions) dispatching
//!   inbound messages to user callbacks by regular-expression match
//! * the [`Node`] type coupling all of the above into the create / configure
//!   / start / send / subscribe / release lifecycle
//!
//! ## Basic usage
//!
//! ```no_run
//! use axon::{Field, Message, Node, OptionValue};
//! use std::sync::Arc;
//!
//! # async fn example() -> axon::Result<()> {
//! let publisher = Node::create("pub", "example-publisher")?;
//! publisher.set_option("broadcasts", OptionValue::StringList(vec!["hello".into()]))?;
//! publisher.start().await?;
//! publisher.send("hello", Message::new().push(Field::Str("world".into()))).await?;
//! publisher.release().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Non-goals
//!
//! Message persistence across restarts, authenticated or encrypted
//! transport, at-least-once delivery, flow control beyond the transport's
//! own buffering, cross-segment routing, and reconfiguring a node's role or
//! name after creation are all out of scope; see DESIGN.md.

mod advertisement;
mod amp;
mod discovery;
mod error;
mod field;
mod matcher;
mod node;
mod options;
mod peer;
mod role;
mod subscriptions;
mod topic;
mod transport;

pub use error::{Error, ErrorKind, Result};
pub use field::{Field, Message};
pub use node::Node;
pub use options::{OptionValue, Options};
pub use peer::{DiscoveryEvent, Peer};
pub use role::Role;
pub use subscriptions::{Callback, UserData};

/// Wire-level building blocks: the AMP codec and the discovery/transport
/// adapter contracts, exposed for crates that want to speak the protocol
/// directly instead of going through [`Node`].
pub mod wire {
    pub use crate::amp::{encode, read_message, write_message};
    pub use crate::discovery::{DiscoveryAdapter, DiscoveryConfig, DEFAULT_DISCOVERY_PORT};
    pub use crate::transport::{ReplySlot, TransportAdapter, TransportEvent};
}

/// Topic computation and the peer-matching rules the core applies to
/// discovery advertisements, exposed for diagnostics and tests built on top
/// of this crate.
pub mod matching {
    pub use crate::matcher::{check_advertisement, connect_target, ConnectTarget, Verdict};
    pub use crate::topic::{pub_sub_fulltopic, req_rep_topic, strip_pub_sub_fulltopic};
}
