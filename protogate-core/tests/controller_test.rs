use common::{ECHO_SERVICE, EchoSchema, TREE_SERVICE, echo_bytes, tree_set, wide_set};
use prost::Message;
use prost_reflect::Value;
use protogate_core::{
    EngineConfig, MessageFactory, ProtocolController, SourceKind,
    codec::CodecError,
    message::FieldError,
};
use std::sync::Arc;

mod common;

#[test]
fn test_type_cache_evicts_least_recently_used() {
    let config = EngineConfig {
        type_cache_capacity: 2,
        ..Default::default()
    };
    let controller = ProtocolController::build(&wide_set(3).encode_to_vec(), &config).unwrap();
    let service = "wide.WideService";

    controller.resolve(service, "Method0").unwrap();
    controller.resolve(service, "Method1").unwrap();
    assert_eq!(controller.resolution_count(), 2);

    // Hit: Method1 becomes the least recently used entry.
    controller.resolve(service, "Method0").unwrap();
    assert_eq!(controller.resolution_count(), 2);

    controller.resolve(service, "Method2").unwrap();
    assert_eq!(controller.resolution_count(), 3);
    assert_eq!(controller.type_cache().len(), 2);

    controller.resolve(service, "Method0").unwrap();
    assert_eq!(controller.resolution_count(), 3);

    controller.resolve(service, "Method1").unwrap();
    assert_eq!(controller.resolution_count(), 4);
}

#[test]
fn test_cached_handle_is_shared() {
    let controller = ProtocolController::build(&echo_bytes(), &EngineConfig::default()).unwrap();

    let first = controller.resolve(ECHO_SERVICE, "UnaryEcho").unwrap();
    let second = controller.resolve(ECHO_SERVICE, "UnaryEcho").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(controller.mode(), SourceKind::FileDescriptorSet);
}

#[test]
fn test_self_referential_schema_registry_terminates() {
    let controller =
        ProtocolController::build(&tree_set().encode_to_vec(), &EngineConfig::default()).unwrap();

    let handle = controller.resolve(TREE_SERVICE, "Walk").unwrap();

    let names: Vec<_> = handle
        .extensions
        .iter()
        .map(|e| e.full_name().to_string())
        .collect();
    assert_eq!(names, ["tree.annotation", "tree.weight"]);
    assert_eq!(handle.extensions.for_extendee("tree.Node").count(), 2);
    assert_eq!(handle.extensions.for_extendee("tree.Annotation").count(), 0);
}

#[test]
fn test_schema_message_checks_fields_and_extensions() {
    let controller =
        ProtocolController::build(&tree_set().encode_to_vec(), &EngineConfig::default()).unwrap();
    let handle = controller.resolve(TREE_SERVICE, "Walk").unwrap();

    let mut node = MessageFactory.new_instance(&handle.method.input(), handle.extensions.clone());

    node.set_field_by_name("name", Value::String("root".into()))
        .unwrap();
    assert_eq!(
        node.get_field_by_name("name").unwrap().as_str(),
        Some("root")
    );

    assert!(matches!(
        node.set_field_by_name("name", Value::I32(1)),
        Err(FieldError::TypeMismatch(_))
    ));
    assert!(matches!(
        node.set_field_by_name("color", Value::I32(1)),
        Err(FieldError::UnknownField { .. })
    ));

    node.set_extension("tree.weight", Value::I32(7)).unwrap();
    assert_eq!(
        node.get_extension("tree.weight").unwrap().unwrap().as_i32(),
        Some(7)
    );
    assert!(matches!(
        node.set_extension("tree.height", Value::I32(1)),
        Err(FieldError::UnregisteredExtension(_))
    ));

    let annotation_desc = controller
        .source()
        .pool()
        .get_message_by_name("tree.Annotation")
        .unwrap();
    let mut annotation = MessageFactory.new_instance(&annotation_desc, handle.extensions.clone());
    assert!(matches!(
        annotation.set_extension("tree.weight", Value::I32(1)),
        Err(FieldError::WrongExtendee { .. })
    ));
}

#[test]
fn test_codec_roundtrip_applies_defaults() {
    let controller = ProtocolController::build(&echo_bytes(), &EngineConfig::default()).unwrap();
    let handle = controller.resolve(ECHO_SERVICE, "UnaryEcho").unwrap();
    let codec = controller.codec();

    let mut original = MessageFactory.new_instance(&handle.method.input(), handle.extensions.clone());
    codec
        .unmarshal(
            br#"{"message":"hi","tags":["a","b"],"unknownField":true}"#.as_slice(),
            &mut original,
        )
        .unwrap();

    assert_eq!(
        original.get_field_by_name("count").unwrap().as_i32(),
        Some(0)
    );

    let json = codec.to_vec(&original).unwrap();
    let mut decoded = MessageFactory.new_instance(&handle.method.input(), handle.extensions.clone());
    codec.unmarshal(json.as_slice(), &mut decoded).unwrap();

    assert_eq!(
        original.as_dynamic().encode_to_vec(),
        decoded.as_dynamic().encode_to_vec()
    );
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&json).unwrap(),
        serde_json::json!({ "message": "hi", "count": 0, "tags": ["a", "b"] })
    );
}

#[test]
fn test_codec_rejects_trailing_garbage() {
    let controller = ProtocolController::build(&echo_bytes(), &EngineConfig::default()).unwrap();
    let handle = controller.resolve(ECHO_SERVICE, "UnaryEcho").unwrap();

    let mut message = MessageFactory.new_instance(&handle.method.input(), handle.extensions.clone());
    let result = controller
        .codec()
        .unmarshal(br#"{"message":"hi"} {"#.as_slice(), &mut message);

    assert!(matches!(result, Err(CodecError::Unmarshal { message, .. }) if message == "echo.EchoRequest"));
}

#[test]
fn test_codec_refuses_other_generations() {
    let config = EngineConfig::default();
    let first = ProtocolController::build(&echo_bytes(), &config).unwrap();
    let second = ProtocolController::build(&EchoSchema::default().bytes(), &config).unwrap();

    let handle = first.resolve(ECHO_SERVICE, "UnaryEcho").unwrap();
    let message = MessageFactory.new_instance(&handle.method.input(), handle.extensions.clone());

    assert!(first.codec().to_vec(&message).is_ok());
    assert!(matches!(
        second.codec().to_vec(&message),
        Err(CodecError::ForeignSchema(name)) if name == "echo.EchoRequest"
    ));
}

#[test]
fn test_proto_field_names_on_output() {
    let config = EngineConfig {
        use_proto_field_names: true,
        emit_default_fields: false,
        ..Default::default()
    };
    let controller = ProtocolController::build(&echo_bytes(), &config).unwrap();
    let handle = controller.resolve(ECHO_SERVICE, "UnaryEcho").unwrap();

    let mut message = MessageFactory.new_instance(&handle.method.input(), handle.extensions.clone());
    controller
        .codec()
        .unmarshal(br#"{"meta":{"traceId":"abc"}}"#.as_slice(), &mut message)
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_slice(&controller.codec().to_vec(&message).unwrap()).unwrap();
    assert_eq!(json, serde_json::json!({ "meta": { "trace_id": "abc" } }));
}
