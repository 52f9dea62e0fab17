use carelink_types::{BatchOperation, ResourceKey, SubscriptionId};
use serde_json::json;

// ── Operation identity ────────────────────────────────────────────

#[test]
fn each_built_operation_gets_its_own_id() {
    let body = json!({"resourceType": "Patient"});
    let a = BatchOperation::create("Patient", body.clone());
    let b = BatchOperation::create("Patient", body);
    assert_ne!(a.id(), b.id());
}

#[test]
fn a_resent_operation_keeps_its_id() {
    let op = BatchOperation::delete(&ResourceKey::new("Patient", "p1"));
    let resent = op.clone();
    assert_eq!(op.id(), resent.id());
}

#[test]
fn operation_id_serializes_as_its_display_string() {
    let op = BatchOperation::read(&ResourceKey::new("Patient", "p1"));
    let json = serde_json::to_value(op.id()).unwrap();
    assert_eq!(json, json!(op.id().to_string()));
}

// ── SubscriptionId ────────────────────────────────────────────────

#[test]
fn subscription_ids_are_unique() {
    let a = SubscriptionId::default();
    let b = SubscriptionId::new();
    assert_ne!(a, b);
    assert_ne!(a.to_string(), b.to_string());
}
