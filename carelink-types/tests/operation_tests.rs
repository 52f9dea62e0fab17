use carelink_types::{BatchOperation, ConditionalHeaders, Method, ResourceKey};
use serde_json::json;

// ── Constructors ──────────────────────────────────────────────────

#[test]
fn create_targets_the_resource_type() {
    let op = BatchOperation::create("Patient", json!({"resourceType": "Patient"}));
    assert_eq!(op.method(), Method::Create);
    assert_eq!(op.target(), "Patient");
    assert_eq!(op.resource_type(), "Patient");
    assert!(op.resource().is_some());
    assert!(op.conditional().is_none());
}

#[test]
fn read_targets_type_and_id() {
    let op = BatchOperation::read(&ResourceKey::new("Observation", "obs-1"));
    assert_eq!(op.method(), Method::Read);
    assert_eq!(op.target(), "Observation/obs-1");
    assert_eq!(op.resource_type(), "Observation");
    assert!(op.resource().is_none());
}

#[test]
fn delete_has_no_body() {
    let op = BatchOperation::delete(&ResourceKey::new("Encounter", "e9"));
    assert_eq!(op.method(), Method::Delete);
    assert!(op.resource().is_none());
}

#[test]
fn search_encodes_parameters_in_order() {
    let op = BatchOperation::search("Patient", &[("name", "Ana María"), ("birthdate", "ge2000-01-01")]);
    assert_eq!(op.method(), Method::Search);
    assert_eq!(op.target(), "Patient?name=Ana%20Mar%C3%ADa&birthdate=ge2000-01-01");
    assert_eq!(op.resource_type(), "Patient");
}

#[test]
fn search_without_parameters_is_bare_type() {
    let op = BatchOperation::search::<&str, &str>("Condition", &[]);
    assert_eq!(op.target(), "Condition");
}

#[test]
fn each_operation_gets_its_own_id() {
    let key = ResourceKey::new("Patient", "p1");
    let a = BatchOperation::read(&key);
    let b = BatchOperation::read(&key);
    assert_ne!(a.id(), b.id());
    assert_ne!(a, b);
}

#[test]
fn endpoint_key_combines_method_and_type() {
    let op = BatchOperation::update(&ResourceKey::new("Patient", "p1"), json!({}));
    assert_eq!(op.endpoint_key(), "update:Patient");
    let op = BatchOperation::search("Observation", &[("code", "1234-5")]);
    assert_eq!(op.endpoint_key(), "search:Observation");
}

#[test]
fn with_conditional_attaches_headers() {
    let op = BatchOperation::update(&ResourceKey::new("Patient", "p1"), json!({}))
        .with_conditional(ConditionalHeaders::if_match_version("3"));
    assert_eq!(
        op.conditional().and_then(|c| c.if_match.as_deref()),
        Some("W/\"3\"")
    );
}

// ── Method ────────────────────────────────────────────────────────

#[test]
fn write_methods() {
    assert!(Method::Create.is_write());
    assert!(Method::Update.is_write());
    assert!(Method::Delete.is_write());
    assert!(!Method::Read.is_write());
    assert!(!Method::Search.is_write());
}

#[test]
fn method_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Method::Search).unwrap(), "\"search\"");
    assert_eq!(Method::Create.to_string(), "create");
}

// ── Serialization ─────────────────────────────────────────────────

#[test]
fn operation_json_omits_empty_fields() {
    let op = BatchOperation::read(&ResourceKey::new("Patient", "p1"));
    let value = serde_json::to_value(&op).unwrap();
    assert_eq!(value["method"], "read");
    assert_eq!(value["target"], "Patient/p1");
    assert!(value.get("resource").is_none());
    assert!(value.get("conditional").is_none());
}
