//! Fact lifecycle tests
//!
//! Insert, write, read and export facts through the public API.

use chrono::{TimeZone, Utc};
use factbase_core::*;

#[test]
fn test_insert_and_read_back() {
    let fb = FactStore::new();
    let f = fb.insert().unwrap();
    f.set("name", "Alice").unwrap();
    f.set("age", 28).unwrap();

    assert_eq!(fb.size(), 1);
    assert_eq!(f.get("name").unwrap(), Value::from("Alice"));
    assert_eq!(f.get("age").unwrap(), Value::Int(28));
    assert_eq!(f.all_properties(), vec!["name", "age"]);
}

#[test]
fn test_properties_keep_history() {
    let fb = FactStore::new();
    let f = fb.insert().unwrap();
    f.set("status", "pending").unwrap();
    f.set("status", "confirmed").unwrap();
    f.set("status", "pending").unwrap();

    // reads return the first value; duplicates are not appended
    assert_eq!(f.get("status").unwrap(), Value::from("pending"));
    assert_eq!(
        f.history("status").unwrap(),
        vec![Value::from("pending"), Value::from("confirmed")]
    );
}

#[test]
fn test_missing_property() {
    let fb = FactStore::new();
    let f = fb.insert().unwrap();
    assert!(matches!(f.get("nothing"), Err(FactbaseError::NotFound(_))));
    assert!(f.history("nothing").is_none());
}

#[test]
fn test_invalid_writes_are_rejected() {
    let fb = FactStore::new();
    let f = fb.insert().unwrap();
    assert!(f.set("Upper", 1).is_err());
    assert!(f.set("to_s", 1).is_err());
    assert!(f.set("empty", "").is_err());
    assert!(f.set("nan", f64::NAN).is_err());
    assert!(f.is_empty());
}

#[test]
fn test_handles_share_state() {
    let fb = FactStore::new();
    let f = fb.insert().unwrap();
    f.set("foo", 1).unwrap();
    let found = fb.query("(exists foo)").unwrap().to_vec().unwrap();
    found[0].set("bar", 2).unwrap();
    assert_eq!(f.get("bar").unwrap(), Value::Int(2));
    assert_eq!(found[0].id(), f.id());
}

#[test]
fn test_rendering() {
    let fb = FactStore::new();
    let f = fb.insert().unwrap();
    f.set("foo", 42).unwrap();
    f.set("foo", "it's").unwrap();
    f.set("at", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        .unwrap();
    assert_eq!(
        f.to_string(),
        "[ foo: [42, 'it\\'s'], at: [2024-01-02T03:04:05Z] ]"
    );
}

#[test]
fn test_snapshot_between_stores() {
    let fb = FactStore::new();
    for i in 0..5 {
        let f = fb.insert().unwrap();
        f.set("id", i).unwrap();
        f.set("weight", 1.5 * i as f64).unwrap();
    }

    let copy = FactStore::from_bytes(&fb.export().unwrap()).unwrap();
    assert_eq!(copy.size(), 5);
    let heavy = copy.query("(gt weight 3.0)").unwrap().to_vec().unwrap();
    assert_eq!(heavy.len(), 2);

    // the copy is independent of the source
    copy.facts()[0].set("extra", 1).unwrap();
    assert!(fb.facts()[0].history("extra").is_none());
}

#[test]
fn test_store_from_json_config() {
    let config = StoreConfig::from_json(r#"{"max_depth": 4, "reserved_names": ["secret"]}"#)
        .unwrap();
    let fb = FactStore::with_config(config);
    assert!(fb.insert().unwrap().set("secret", 1).is_err());
    assert!(fb.query("(not (not (not (not (not (always))))))").is_err());
    assert!(fb.query("(not (always))").is_ok());
}
