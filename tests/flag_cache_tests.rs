use std::sync::Arc;

use flagkit_sync::core::{LegacySchema, CACHE_KEY_PREFIX};
use flagkit_sync::{FileStore, FlagRecord, FlagStore, FlagValue, InMemoryStore, KeyValueStore, PersistentFlagCache, UserIdentity};
use serde_json::json;
use tempfile::TempDir;

fn flags(key: &str, value: i32) -> FlagStore {
    [(key.to_string(), FlagRecord::new(value))].into_iter().collect()
}

fn user(key: &str) -> UserIdentity {
    UserIdentity::new(key, None)
}

// =============================================================================
// Capacity and recency
// =============================================================================

mod capacity_tests {
    use super::*;

    #[test]
    fn test_oldest_entries_evicted_beyond_capacity() {
        let cache = PersistentFlagCache::new(Arc::new(InMemoryStore::new()), 2, "mob-key");
        cache.store(&user("u1"), &flags("a", 1)).unwrap();
        cache.store(&user("u2"), &flags("a", 2)).unwrap();
        cache.store(&user("u3"), &flags("a", 3)).unwrap();

        assert!(cache.retrieve(&user("u1")).unwrap().is_none());
        assert!(cache.retrieve(&user("u2")).unwrap().is_some());
        assert!(cache.retrieve(&user("u3")).unwrap().is_some());
    }

    #[test]
    fn test_restore_refreshes_recency() {
        let cache = PersistentFlagCache::new(Arc::new(InMemoryStore::new()), 2, "mob-key");
        cache.store(&user("u1"), &flags("a", 1)).unwrap();
        cache.store(&user("u2"), &flags("a", 2)).unwrap();
        cache.store(&user("u1"), &flags("a", 10)).unwrap();
        cache.store(&user("u3"), &flags("a", 3)).unwrap();

        let remaining: Vec<String> = cache.entries().unwrap().into_iter().map(|e| e.identity.key).collect();
        assert_eq!(remaining, vec!["u1".to_string(), "u3".to_string()]);
        assert_eq!(
            cache.retrieve(&user("u1")).unwrap().unwrap().value("a"),
            Some(&FlagValue::Number(10.0))
        );
    }

    #[test]
    fn test_retrieve_does_not_change_recency() {
        let cache = PersistentFlagCache::new(Arc::new(InMemoryStore::new()), 2, "mob-key");
        cache.store(&user("u1"), &flags("a", 1)).unwrap();
        cache.store(&user("u2"), &flags("a", 2)).unwrap();
        cache.retrieve(&user("u1")).unwrap();
        cache.store(&user("u3"), &flags("a", 3)).unwrap();

        assert!(cache.retrieve(&user("u1")).unwrap().is_none());
    }

    #[test]
    fn test_remove_oldest_explicit_limit() {
        let cache = PersistentFlagCache::new(Arc::new(InMemoryStore::new()), 5, "mob-key");
        for key in ["u1", "u2", "u3"] {
            cache.store(&user(key), &flags("a", 1)).unwrap();
        }
        assert_eq!(cache.remove_oldest(1).unwrap(), 2);
        assert_eq!(cache.entries().unwrap().len(), 1);
        assert_eq!(cache.remove_oldest(1).unwrap(), 0);
    }

    #[test]
    fn test_secondary_key_is_separate_identity() {
        let cache = PersistentFlagCache::new(Arc::new(InMemoryStore::new()), 5, "mob-key");
        cache.store(&user("u1"), &flags("a", 1)).unwrap();
        cache
            .store(&UserIdentity::new("u1", Some("s".into())), &flags("a", 2))
            .unwrap();
        assert_eq!(cache.entries().unwrap().len(), 2);
    }
}

// =============================================================================
// File-backed persistence
// =============================================================================

mod file_store_tests {
    use super::*;

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            let cache = PersistentFlagCache::new(store, 5, "mob-key");
            cache.store(&user("u1"), &flags("a", 1)).unwrap();
            cache.store(&user("u2"), &flags("b", 2)).unwrap();
        }

        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let cache = PersistentFlagCache::new(store, 5, "mob-key");
        assert!(cache.retrieve(&user("u1")).unwrap().unwrap().contains("a"));

        cache.store(&user("u3"), &flags("c", 3)).unwrap();
        let order: Vec<String> = cache.entries().unwrap().into_iter().map(|e| e.identity.key).collect();
        assert_eq!(order, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn test_corrupt_entry_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let key = format!("{}{}", CACHE_KEY_PREFIX, user("u1").storage_key());
        store.set(&key, &json!({"unexpected": true})).unwrap();

        let cache = PersistentFlagCache::new(store.clone(), 5, "mob-key");
        assert!(cache.retrieve(&user("u1")).unwrap().is_none());
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_long_user_key_is_persisted() {
        let dir = TempDir::new().unwrap();
        let long_user = user(&"u".repeat(200));
        {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            let cache = PersistentFlagCache::new(store, 5, "mob-key");
            cache.store(&long_user, &flags("a", 1)).unwrap();
        }

        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let cache = PersistentFlagCache::new(store, 5, "mob-key");
        assert_eq!(
            cache.retrieve(&long_user).unwrap().unwrap().value("a"),
            Some(&FlagValue::Number(1.0))
        );
        assert_eq!(cache.entries().unwrap()[0].identity, long_user);
    }
}

// =============================================================================
// Legacy migration
// =============================================================================

mod migration_tests {
    use super::*;

    #[test]
    fn test_legacy_slots_migrated_and_removed() {
        let storage = Arc::new(InMemoryStore::new());
        storage
            .set(
                LegacySchema::V3.storage_key(),
                &json!({
                    "u1": {"key": "u1", "updatedAt": "2020-01-01T00:00:00Z", "config": {"a": {"value": 1, "version": 1}}}
                }),
            )
            .unwrap();
        storage
            .set(
                LegacySchema::V6.storage_key(),
                &json!({
                    "u1": {
                        "userKey": "u1",
                        "environmentFlags": {
                            "mob-key": {"flags": {"a": {"value": 6, "version": 6}}, "lastUpdated": 1_700_000_000_000i64}
                        }
                    }
                }),
            )
            .unwrap();

        let cache = PersistentFlagCache::new(storage.clone(), 5, "mob-key");
        let migrated = cache.retrieve(&user("u1")).unwrap().unwrap();

        assert_eq!(migrated.value("a"), Some(&FlagValue::Number(6.0)));
        assert!(storage.get(LegacySchema::V3.storage_key()).unwrap().is_none());
        assert!(storage.get(LegacySchema::V6.storage_key()).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_slot_is_discarded() {
        let storage = Arc::new(InMemoryStore::new());
        storage.set(LegacySchema::V4.storage_key(), &json!("garbage")).unwrap();
        storage
            .set(
                LegacySchema::V2.storage_key(),
                &json!({"u2": {"key": "u2", "updatedAt": "2020-01-01T00:00:00Z", "config": {"b": true}}}),
            )
            .unwrap();

        let cache = PersistentFlagCache::new(storage.clone(), 5, "mob-key");
        assert!(cache.retrieve(&user("u2")).unwrap().unwrap().contains("b"));
        assert!(storage.get(LegacySchema::V4.storage_key()).unwrap().is_none());
    }

    #[test]
    fn test_migration_respects_capacity() {
        let storage = Arc::new(InMemoryStore::new());
        storage
            .set(
                LegacySchema::V2.storage_key(),
                &json!({
                    "u1": {"key": "u1", "updatedAt": "2020-01-01T00:00:00Z", "config": {}},
                    "u2": {"key": "u2", "updatedAt": "2020-02-01T00:00:00Z", "config": {}},
                    "u3": {"key": "u3", "updatedAt": "2020-03-01T00:00:00Z", "config": {}}
                }),
            )
            .unwrap();

        let cache = PersistentFlagCache::new(storage, 2, "mob-key");
        let keys: Vec<String> = cache.entries().unwrap().into_iter().map(|e| e.identity.key).collect();
        assert_eq!(keys, vec!["u2", "u3"]);
    }

    fn legacy_slot(schema: LegacySchema) -> serde_json::Value {
        match schema {
            LegacySchema::V2 => json!({
                "u2": {"key": "u2", "updatedAt": "2020-01-01T00:00:00Z", "config": {"a": true, "b": "x"}}
            }),
            LegacySchema::V3 => json!({
                "u3": {"key": "u3", "updatedAt": "2020-02-01T00:00:00Z", "config": {"a": {"value": 3, "version": 7}}}
            }),
            LegacySchema::V4 => json!({
                "u4": {
                    "key": "u4",
                    "secondary": "s4",
                    "updatedAt": "2020-03-01T00:00:00Z",
                    "config": {"a": {"value": "on", "version": 2, "variation": 1}, "b": {"value": null}}
                }
            }),
            LegacySchema::V5 => json!({
                "u5": {
                    "userKey": "u5",
                    "environmentFlags": {
                        "mob-key": {"flags": {"a": {"value": [1, 2], "version": 4, "variation": 0}}, "lastUpdated": "2020-04-01T00:00:00Z"},
                        "other-key": {"flags": {"z": {"value": 9}}, "lastUpdated": "2020-04-02T00:00:00Z"}
                    }
                }
            }),
            LegacySchema::V6 => json!({
                "u6": {
                    "userKey": "u6",
                    "environmentFlags": {
                        "mob-key": {"flags": {"a": {"value": {"k": 1}, "version": 5, "flagVersion": 9}}, "lastUpdated": 1_600_000_000_000i64}
                    }
                }
            }),
        }
    }

    #[test]
    fn test_each_schema_migrates_like_direct_decode() {
        for schema in LegacySchema::ALL {
            let raw = legacy_slot(schema);
            let expected = schema.decode(&raw, "mob-key").unwrap();
            assert_eq!(expected.len(), 1, "{} fixture", schema);

            let storage = Arc::new(InMemoryStore::new());
            storage.set(schema.storage_key(), &raw).unwrap();
            let cache = PersistentFlagCache::new(storage.clone(), 5, "mob-key");

            let entries = cache.entries().unwrap();
            assert_eq!(entries.len(), 1, "{} entries", schema);
            assert_eq!(entries[0].identity, expected[0].identity, "{} identity", schema);
            assert_eq!(entries[0].flags, expected[0].flags, "{} flags", schema);
            assert_eq!(entries[0].last_updated, expected[0].last_updated, "{} timestamp", schema);
            assert!(storage.get(schema.storage_key()).unwrap().is_none());
        }
    }

    #[test]
    fn test_second_migration_is_a_no_op() {
        let storage = Arc::new(InMemoryStore::new());
        for schema in LegacySchema::ALL {
            storage.set(schema.storage_key(), &legacy_slot(schema)).unwrap();
        }

        let first = PersistentFlagCache::new(storage.clone(), 10, "mob-key").entries().unwrap();
        assert_eq!(first.len(), 5);
        let keys_after_first = storage.keys().unwrap();

        let second = PersistentFlagCache::new(storage.clone(), 10, "mob-key").entries().unwrap();
        assert_eq!(second, first);
        assert_eq!(storage.keys().unwrap(), keys_after_first);
    }

    #[test]
    fn test_current_entry_newer_than_legacy_wins() {
        let storage = Arc::new(InMemoryStore::new());
        {
            let cache = PersistentFlagCache::new(storage.clone(), 5, "mob-key");
            cache.store(&user("u1"), &flags("a", 42)).unwrap();
        }
        storage
            .set(
                LegacySchema::V2.storage_key(),
                &json!({"u1": {"key": "u1", "updatedAt": "2015-01-01T00:00:00Z", "config": {"a": 1}}}),
            )
            .unwrap();

        let cache = PersistentFlagCache::new(storage, 5, "mob-key");
        assert_eq!(
            cache.retrieve(&user("u1")).unwrap().unwrap().value("a"),
            Some(&FlagValue::Number(42.0))
        );
    }
}
