// Synced Dict Tests

use hypecoin::storage::{
    Engine, MemoryEngine, OptimisticStore, RetryPolicy, SledEngine, Store, SyncedDict,
    SYNCED_SUBKEY,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn for_each_store(check: impl Fn(Arc<OptimisticStore>)) {
    let memory: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
    check(Arc::new(OptimisticStore::new(memory, RetryPolicy::default())));

    let temp_dir = TempDir::new().unwrap();
    let sled: Arc<dyn Engine> = Arc::new(SledEngine::open(temp_dir.path()).unwrap());
    check(Arc::new(OptimisticStore::new(sled, RetryPolicy::default())));
}

#[test]
fn test_writes_are_flushed_to_the_store() {
    for_each_store(|store| {
        let mut prefs: SyncedDict<_, Value> = SyncedDict::open(store.clone(), "alice", None).unwrap();
        assert!(prefs.is_empty());

        assert_eq!(prefs.insert("theme", json!("dark")).unwrap(), None);
        assert_eq!(prefs.insert("theme", json!("light")).unwrap(), Some(json!("dark")));
        prefs.insert("lang", json!("en")).unwrap();

        let stored: BTreeMap<String, Value> = store
            .get_json_value("alice", SYNCED_SUBKEY, None)
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["theme"], json!("light"));

        assert_eq!(prefs.remove("lang").unwrap(), Some(json!("en")));
        assert_eq!(prefs.remove("missing").unwrap(), None);
        let reopened: SyncedDict<_, Value> = SyncedDict::open(store, "alice", None).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("theme"), Some(&json!("light")));
    });
}

#[test]
fn test_other_handles_need_sync() {
    for_each_store(|store| {
        let mut writer: SyncedDict<_, i64> =
            SyncedDict::open(store.clone(), "scores", Some("game")).unwrap();
        let mut reader: SyncedDict<_, i64> =
            SyncedDict::open(store.clone(), "scores", Some("game")).unwrap();

        writer.insert("alice", 3).unwrap();
        assert!(!reader.contains_key("alice"));

        reader.sync().unwrap();
        assert_eq!(reader.get("alice"), Some(&3));

        // Other subkeys of the same key are separate dicts
        let other: SyncedDict<_, i64> = SyncedDict::open(store, "scores", None).unwrap();
        assert!(other.is_empty());
    });
}

#[test]
fn test_extend_and_clear() {
    for_each_store(|store| {
        let mut dict: SyncedDict<_, i64> = SyncedDict::open(store.clone(), "counts", None).unwrap();
        dict.extend([("a".to_string(), 1), ("b".to_string(), 2)]).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.iter().map(|(_, count)| *count).sum::<i64>(), 3);

        let copy: SyncedDict<_, i64> = SyncedDict::open(store.clone(), "counts", None).unwrap();
        assert_eq!(copy.get("b"), Some(&2));

        dict.clear().unwrap();
        let copy: SyncedDict<_, i64> = SyncedDict::open(store, "counts", None).unwrap();
        assert!(copy.is_empty());
    });
}

#[test]
fn test_garbage_under_the_key_is_an_error() {
    for_each_store(|store| {
        store.set_value("alice", SYNCED_SUBKEY, "not json", None).unwrap();
        assert!(SyncedDict::<_, Value>::open(store, "alice", None).is_err());
    });
}
