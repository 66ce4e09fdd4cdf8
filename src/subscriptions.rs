//! Subscription table: ordered (pattern, callback, user-data) entries.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::field::Message;
use crate::node::Node;

/// Opaque, unowned user context handed back to a callback.
///
/// Stands in for the source's untyped user pointer: the core never inspects
/// it, only clones the `Arc` and passes it through.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// A subscription or reply callback.
///
/// Invoked as `(node, topic, message, user) -> reply`. Only REP callbacks'
/// return value is meaningful; SUB callbacks' return value is ignored.
pub type Callback = Arc<dyn Fn(&Node, &str, Message, &UserData) -> Option<Message> + Send + Sync>;

struct Subscription {
    /// Stored fulltopic pattern (PUB/SUB) or literal topic (REQ/REP).
    fulltopic: String,
    callback: Callback,
    user: UserData,
}

/// The mutex-guarded, insertion-ordered subscription list behind a SUB or REP
/// node. Dispatch holds the table's lock for its entire fan-out so that a
/// concurrent `unsubscribe` cannot free a callback while it runs.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or, if `fulltopic` already exists, updates the entry in place.
    pub fn subscribe(&self, fulltopic: String, callback: Callback, user: UserData) {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.fulltopic == fulltopic) {
            Some(existing) => {
                existing.callback = callback;
                existing.user = user;
            }
            None => entries.push(Subscription { fulltopic, callback, user }),
        }
    }

    /// Removes the entry whose stored fulltopic equals `fulltopic` exactly.
    ///
    /// Returns whether an entry was removed.
    pub fn unsubscribe(&self, fulltopic: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.fulltopic != fulltopic);
        entries.len() != before
    }

    /// Removes every entry, used during node release.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries currently registered (for tests/diagnostics).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Dispatches `message` to every entry whose fulltopic matches
    /// `inbound_topic` as a regex, in insertion order, invoking each with
    /// `(node, stripped_topic, message.clone(), user)`.
    ///
    /// Holds the table lock across the whole fan-out. Returns the last
    /// non-`None` reply; later callbacks win over earlier ones.
    pub fn dispatch(&self, node: &Node, inbound_topic: &str, stripped_topic: &str, message: &Message) -> Option<Message> {
        let entries = self.entries.lock();
        let mut reply = None;
        for entry in entries.iter() {
            let re = match Regex::new(&entry.fulltopic) {
                Ok(re) => re,
                Err(_) => continue,
            };
            if re.is_match(inbound_topic) {
                let result = (entry.callback)(node, stripped_topic, message.clone(), &entry.user);
                if result.is_some() {
                    reply = result;
                }
            }
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_callback() -> (Callback, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let counted = counter.clone();
        let cb: Callback = Arc::new(move |_node, _topic, _msg, _user| {
            counted.fetch_add(1, Ordering::SeqCst);
            None
        });
        (cb, counter)
    }

    #[test]
    fn resubscribing_same_topic_updates_in_place() {
        let table = SubscriptionTable::new();
        let (cb_a, count_a) = noop_callback();
        let (cb_b, count_b) = noop_callback();
        table.subscribe("t".into(), cb_a, Arc::new(()));
        table.subscribe("t".into(), cb_b, Arc::new(()));
        assert_eq!(table.len(), 1);

        let node = Node::new_for_test(Role::Sub);
        table.dispatch(&node, "t", "t", &Message::new());
        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_exact_fulltopic_only() {
        let table = SubscriptionTable::new();
        let (cb, _count) = noop_callback();
        table.subscribe("message::t".into(), cb, Arc::new(()));
        assert!(!table.unsubscribe("t"));
        assert_eq!(table.len(), 1);
        assert!(table.unsubscribe("message::t"));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn dispatch_preserves_insertion_order() {
        let table = SubscriptionTable::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            let cb: Callback = Arc::new(move |_n, _t, _m, _u| {
                order.lock().push(tag);
                None
            });
            table.subscribe(format!("t-{tag}"), cb, Arc::new(()));
        }
        // All three patterns match a literal "t-x" style topic via alternation.
        let node = Node::new_for_test(Role::Sub);
        table.subscribe("t-.*".into(), Arc::new(|_n, _t, _m, _u| None), Arc::new(()));
        let _ = table.dispatch(&node, "t-first", "first", &Message::new());
        assert_eq!(*order.lock(), vec!["first"]);
    }
}
