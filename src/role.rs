//! Node role.

use strum::{Display, EnumString};

/// The role a [`Node`](crate::Node) plays in the messaging fabric.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// Publishes messages on topics; pairs with [`Role::Sub`].
    Pub,
    /// Subscribes to topics by regex; pairs with [`Role::Pub`].
    Sub,
    /// Sends requests and awaits a reply; pairs with [`Role::Rep`].
    Req,
    /// Replies to requests; pairs with [`Role::Req`].
    Rep,
    /// Observes every peer advertisement; connects to nothing.
    Mon,
}

impl Role {
    /// The `axon_type` string this role advertises.
    pub fn axon_type(self) -> &'static str {
        match self {
            Role::Pub => "pub-emitter",
            Role::Sub => "sub-emitter",
            Role::Req => "req",
            Role::Rep => "rep",
            Role::Mon => "monitor",
        }
    }

    /// The `axon_type` this role expects its peers to advertise.
    ///
    /// `None` for [`Role::Mon`], which accepts every peer it observes.
    pub fn expected_peer_axon_type(self) -> Option<&'static str> {
        match self {
            Role::Pub => Some("sub-emitter"),
            Role::Sub => Some("pub-emitter"),
            Role::Req => Some("rep"),
            Role::Rep => Some("req"),
            Role::Mon => None,
        }
    }

    /// Whether this role binds a listening socket (and so has a port to advertise).
    pub fn binds_listener(self) -> bool {
        matches!(self, Role::Pub | Role::Rep)
    }

    /// Whether this role dials out to peers it discovers.
    pub fn connects_to_peers(self) -> bool {
        matches!(self, Role::Sub | Role::Req)
    }

    /// Whether this role accepts `subscribe`/`unsubscribe` calls.
    pub fn accepts_subscriptions(self) -> bool {
        matches!(self, Role::Sub | Role::Rep)
    }
}

/// Parses the four/five-letter role names used by the external API (`"pub"`, `"sub"`, …).
pub fn parse_role(s: &str) -> crate::error::Result<Role> {
    s.parse::<Role>().map_err(|_| crate::error::Error::new(crate::error::ErrorKind::InvalidRole(s.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_roles() {
        assert_eq!(parse_role("pub").unwrap(), Role::Pub);
        assert_eq!(parse_role("sub").unwrap(), Role::Sub);
        assert_eq!(parse_role("req").unwrap(), Role::Req);
        assert_eq!(parse_role("rep").unwrap(), Role::Rep);
        assert_eq!(parse_role("mon").unwrap(), Role::Mon);
    }

    #[test]
    fn rejects_unknown_role() {
        assert!(parse_role("publisher").is_err());
    }

    #[test]
    fn axon_type_pairing_is_symmetric() {
        assert_eq!(Role::Pub.expected_peer_axon_type(), Some(Role::Sub.axon_type()));
        assert_eq!(Role::Sub.expected_peer_axon_type(), Some(Role::Pub.axon_type()));
        assert_eq!(Role::Req.expected_peer_axon_type(), Some(Role::Rep.axon_type()));
        assert_eq!(Role::Rep.expected_peer_axon_type(), Some(Role::Req.axon_type()));
    }
}
