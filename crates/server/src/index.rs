//! The in-memory credential index.
//!
//! The authoritative in-process view of the backing store, keyed by
//! `pubkey || unique_id` with additional tag-alias entries. Reads see
//! whole-record snapshots; writers for the same primary key serialize
//! through [`Index::write_lock`], while writers for distinct keys proceed
//! in parallel.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lnvault_core::NodeCredential;
use lnvault_core::record::{is_alphanumeric, validate_pubkey};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Concurrent mapping from lookup key to credential record.
#[derive(Default)]
pub struct Index {
    entries: DashMap<String, NodeCredential>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by primary key or tag alias.
    pub fn get(&self, key: &str) -> Option<NodeCredential> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Existence check without exposing the record.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of indexed entries (primary keys plus aliases).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The lock serializing writers of one primary key.
    pub fn write_lock(&self, pubkey: &str, unique_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(format!("{pubkey}{unique_id}"))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert a record under its primary key and all eligible tag aliases.
    ///
    /// An alias is eligible when it is alphanumeric and neither it nor its
    /// namespaced form is a valid pubkey. An alias already owned by a
    /// record with a different pubkey is left untouched; the primary entry
    /// still writes.
    pub fn publish(&self, record: &NodeCredential, unique_id: &str) {
        for tag in record.tag_list() {
            if !Self::alias_eligible(tag, unique_id) {
                continue;
            }
            let key = format!("{tag}{unique_id}");
            match self.entries.entry(key) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().pubkey != record.pubkey {
                        tracing::warn!(key = %occupied.key(), "key already exists");
                        continue;
                    }
                    occupied.insert(record.clone());
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(record.clone());
                }
            }
        }

        self.entries
            .insert(format!("{}{}", record.pubkey, unique_id), record.clone());
    }

    /// Remove a record's primary entry and the tag aliases it owns.
    pub fn retract(&self, record: &NodeCredential, unique_id: &str) {
        for tag in record.tag_list() {
            if !Self::alias_eligible(tag, unique_id) {
                continue;
            }
            let key = format!("{tag}{unique_id}");
            self.entries
                .remove_if(&key, |_, existing| existing.pubkey == record.pubkey);
        }

        self.entries.remove(&format!("{}{}", record.pubkey, unique_id));
    }

    fn alias_eligible(tag: &str, unique_id: &str) -> bool {
        !validate_pubkey(tag)
            && !validate_pubkey(&format!("{tag}{unique_id}"))
            && is_alphanumeric(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY_A: &str = "0367fa307a6e0ce29efadc4f7c4d1109ee689aa1e7bd442afd7270919f9e28c3b7";
    const PUBKEY_B: &str = "024b9a1fa8e006f1e3937f65f66c408e6da8e1ca728ea43222a7381df1cc449605";

    fn record(pubkey: &str, tags: &str) -> NodeCredential {
        NodeCredential {
            pubkey: pubkey.to_string(),
            tags: tags.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn publish_and_retract_with_tags() {
        let index = Index::new();
        let rec = record(PUBKEY_A, "some,test");

        index.publish(&rec, "");
        assert!(index.contains(PUBKEY_A));
        assert!(index.contains("some"));
        assert!(index.contains("test"));

        index.retract(&rec, "");
        assert!(!index.contains(PUBKEY_A));
        assert!(!index.contains("some"));
        assert!(!index.contains("test"));
    }

    #[test]
    fn unique_id_namespaces_keys() {
        let index = Index::new();
        index.publish(&record(PUBKEY_A, "test"), "id1");

        assert!(index.contains(&format!("{PUBKEY_A}id1")));
        assert!(index.contains("testid1"));
        assert!(!index.contains(PUBKEY_A));
        assert!(!index.contains("test"));
    }

    #[test]
    fn alias_collision_keeps_first_owner() {
        let index = Index::new();
        index.publish(&record(PUBKEY_A, "shared"), "");
        index.publish(&record(PUBKEY_B, "shared"), "");

        // the alias still resolves to the first record, but B's primary wrote
        assert_eq!(index.get("shared").unwrap().pubkey, PUBKEY_A);
        assert!(index.contains(PUBKEY_B));

        // retracting B must not tear down A's alias
        index.retract(&record(PUBKEY_B, "shared"), "");
        assert_eq!(index.get("shared").unwrap().pubkey, PUBKEY_A);
    }

    #[test]
    fn pubkey_shaped_and_non_alphanumeric_tags_are_ignored() {
        let index = Index::new();
        index.publish(&record(PUBKEY_A, &format!("{PUBKEY_B},bad-tag,ok")), "");

        assert!(!index.contains(PUBKEY_B));
        assert!(!index.contains("bad-tag"));
        assert!(index.contains("ok"));
    }

    #[test]
    fn alias_update_follows_same_record() {
        let index = Index::new();
        index.publish(&record(PUBKEY_A, "alias"), "");

        let mut updated = record(PUBKEY_A, "alias");
        updated.endpoint = "1.2.3.4:10009".to_string();
        index.publish(&updated, "");

        assert_eq!(index.get("alias").unwrap().endpoint, "1.2.3.4:10009");
    }
}
