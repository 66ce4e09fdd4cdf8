//! Exercises the peer matcher and topic namer through the public
//! `axon::matching` surface, using hand-built advertisements the way a
//! discovery adapter would hand them to a `Node`.

use axon::matching::{check_advertisement, connect_target, pub_sub_fulltopic, strip_pub_sub_fulltopic, Verdict};
use axon::{Options, Peer, Role};
use serde_json::json;

fn peer(advertisement: serde_json::Value) -> Peer {
    Peer { instance: "peer-1".into(), address: "10.0.0.9".into(), hostname: None, advertisement: Some(advertisement) }
}

fn init_logging() {
    let _ = env_logger::try_init();
}

#[test]
fn sub_accepts_a_matching_pub_advertisement_and_connects() {
    init_logging();
    let advertisement = peer(json!({
        "axon_type": "pub-emitter",
        "key": "$$",
        "port": 4100,
        "broadcasts": ["orders.created"],
    }));

    assert_eq!(check_advertisement(Role::Sub, &advertisement, None), Verdict::Accepted);

    let mut options = Options::default();
    options.subscribes_to = Some(vec!["orders\\..*".into()]);
    let target = connect_target(Role::Sub, &options, &advertisement).unwrap();
    assert_eq!(target.host, "10.0.0.9");
    assert_eq!(target.port, 4100);
}

#[test]
fn sub_rejects_a_req_advertisement() {
    init_logging();
    let advertisement = peer(json!({"axon_type": "req", "key": "$$"}));
    assert_eq!(check_advertisement(Role::Sub, &advertisement, None), Verdict::Rejected("axon_type mismatch"));
}

#[test]
fn monitor_observes_every_role_without_connecting() {
    init_logging();
    let advertisement = peer(json!({"axon_type": "rep", "key": "$$", "port": 9}));
    assert_eq!(check_advertisement(Role::Mon, &advertisement, None), Verdict::Accepted);
    let options = Options::default();
    // Mon never dials out; connect_target only computes targets for Sub/Req.
    assert!(connect_target(Role::Mon, &options, &advertisement).is_none());
}

#[test]
fn namespaced_peers_only_match_within_the_same_namespace() {
    init_logging();
    let advertisement = peer(json!({"axon_type": "pub-emitter", "key": "$$", "namespace": "team-a"}));
    assert_eq!(
        check_advertisement(Role::Sub, &advertisement, Some("team-b")),
        Verdict::Rejected("namespace mismatch")
    );
    assert_eq!(check_advertisement(Role::Sub, &advertisement, Some("team-a")), Verdict::Accepted);
}

#[test]
fn fulltopic_round_trips_through_the_namer() {
    init_logging();
    let fulltopic = pub_sub_fulltopic(Some("team-a"), "orders.created");
    assert_eq!(strip_pub_sub_fulltopic(Some("team-a"), &fulltopic), "orders.created");
}
