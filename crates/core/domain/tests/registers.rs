use domain::{
    DomainError, ReadFailure, Reading, RegisterDescriptor, RegisterKind, RegisterSet,
    RegisterValues,
};

#[test]
fn add_register_preserves_insertion_order() {
    let mut set = RegisterSet::new();
    set.add_register(10, 5, RegisterKind::Holding, Some("Holding_10-14".to_string()))
        .expect("add");
    set.add_register(0, 10, RegisterKind::Holding, Some("Holding_0-9".to_string()))
        .expect("add");
    set.add_register(3, 8, RegisterKind::Coil, None).expect("add");

    let names: Vec<&str> = set.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["Holding_10-14", "Holding_0-9", "coils_3"]);
    assert_eq!(set.len(), 3);
}

#[test]
fn add_register_synthesizes_name() {
    let mut set = RegisterSet::new();
    let descriptor = set
        .add_register(40, 2, RegisterKind::DiscreteInput, None)
        .expect("add");
    assert_eq!(descriptor.name(), "discrete_inputs_40");
}

#[test]
fn add_register_rejects_zero_count() {
    let mut set = RegisterSet::new();
    let err = set
        .add_register(5, 0, RegisterKind::Input, None)
        .expect_err("zero count");
    assert_eq!(err, DomainError::InvalidCount { address: 5 });
    assert!(set.is_empty());
}

#[test]
fn duplicates_are_kept() {
    let mut set = RegisterSet::new();
    set.add_register(0, 1, RegisterKind::Holding, None).expect("add");
    set.add_register(0, 1, RegisterKind::Holding, None).expect("add");
    assert_eq!(set.len(), 2);
}

#[test]
fn register_set_from_json() {
    let json = r#"[
        {"address": 0, "count": 4, "kind": "holding", "name": "H0-3"},
        {"address": 100, "register_type": "coils"},
        {"address": 7, "count": 2, "kind": "input"}
    ]"#;
    let set: RegisterSet = serde_json::from_str(json).expect("parse");
    let descriptors: Vec<&RegisterDescriptor> = set.iter().collect();
    assert_eq!(descriptors[0].name(), "H0-3");
    assert_eq!(descriptors[1].kind(), RegisterKind::Coil);
    assert_eq!(descriptors[1].count(), 1);
    assert_eq!(descriptors[2].name(), "input_7");
}

#[test]
fn register_set_from_json_rejects_zero_count() {
    let json = r#"[{"address": 0, "count": 0}]"#;
    assert!(serde_json::from_str::<RegisterSet>(json).is_err());
}

#[test]
fn reading_truncates_padded_bits() {
    let descriptor = RegisterDescriptor::new(0, 3, RegisterKind::Coil, None).expect("descriptor");
    let reading = Reading::success(
        &descriptor,
        RegisterValues::Bits(vec![true, false, true, false, false, false, false, false]),
        1_000,
    );
    assert_eq!(reading.values, RegisterValues::Bits(vec![true, false, true]));
    assert!(reading.is_ok());
}

#[test]
fn failed_reading_has_no_values() {
    let descriptor =
        RegisterDescriptor::new(2, 4, RegisterKind::Input, None).expect("descriptor");
    let reading = Reading::failed(&descriptor, ReadFailure::Timeout, 1_000);
    assert!(!reading.is_ok());
    assert!(reading.values.is_empty());
    assert_eq!(reading.values.as_words(), Some(&[][..]));
}

#[test]
fn reading_serializes_external_shape() {
    let descriptor = RegisterDescriptor::new(0, 4, RegisterKind::Holding, Some("H0-3".into()))
        .expect("descriptor");
    let reading = Reading::success(&descriptor, RegisterValues::Words(vec![10, 20, 30, 40]), 42);
    let json = serde_json::to_value(&reading).expect("serialize");
    assert_eq!(json["name"], "H0-3");
    assert_eq!(json["kind"], "holding");
    assert_eq!(json["values"], serde_json::json!([10, 20, 30, 40]));
    assert_eq!(json["timestamp_ms"], 42);
    assert!(json.get("failure").is_none());
}
