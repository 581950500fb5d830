use monalisa_format::{encode_base64, Key, KeyType, License, MemoryLayout, Uuid};
use monalisa_wasm_engine::{
    ErrorCategory, Error, GuestArg, GuestModule, GuestSession, GuestValue, ReturnKind,
    SessionConfig, SessionState,
};
use std::collections::BTreeMap;

const GUEST_WAT: &str = include_str!("fixtures/guest.wat");
const CID: &str = "DCID-A1B2C3-XYZ9-20250101-120000-QWE7-1234567890-ZZZ1";

fn guest_module() -> GuestModule {
    GuestModule::from_bytes(GUEST_WAT.as_bytes(), BTreeMap::new()).unwrap()
}

fn ready_session(module: &GuestModule) -> GuestSession {
    let mut session = GuestSession::new("test-session", module, module.session_config());
    session.initialize().unwrap();
    session
}

fn ticket() -> License {
    let mut raw = vec![0x00, 0x85, 0x00, 0x0a, 0x03];
    raw.extend_from_slice(b"payload:");
    raw.extend_from_slice(CID.as_bytes());
    raw.extend_from_slice(&[0xff, 0x00, 0x42]);
    License::from_bytes(raw)
}

#[test]
fn initialize_runs_ctors_and_allocates_context() {
    let module = guest_module();
    let mut session = GuestSession::new("s1", &module, SessionConfig::default());
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.context(), None);

    session.initialize().unwrap();

    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(session.context(), Some(65536));
}

#[test]
fn initialize_is_idempotent() {
    let module = guest_module();
    let mut session = ready_session(&module);
    session.initialize().unwrap();
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(session.context(), Some(65536));
}

#[test]
fn environment_is_visible_to_guest() {
    let module = guest_module();
    let mut session = ready_session(&module);

    let count = session.call_export("env_count", &[], ReturnKind::Int).unwrap();
    let buf_size = session.call_export("env_buf_size", &[], ReturnKind::Int).unwrap();
    let first = session.call_export("env_first_char", &[], ReturnKind::Int).unwrap();

    assert_eq!(count, GuestValue::Int(7));
    assert_eq!(buf_size, GuestValue::Int(98));
    assert_eq!(first.as_int(), i32::from(b'U'));
}

#[test]
fn wrong_dynamic_base_traps_ctors_and_closes_session() {
    let module = guest_module();
    let config = SessionConfig::default().with_layout(MemoryLayout {
        dynamic_base: 1,
        ..MemoryLayout::default()
    });
    let mut session = GuestSession::new("s2", &module, config);

    let err = session.initialize().expect_err("ctors check dynamic top");
    assert_eq!(err.category(), ErrorCategory::Session);
    assert!(err.to_string().starts_with("Failed to initialize session"));
    assert_eq!(session.state(), SessionState::Closed);

    let err = session.initialize().expect_err("no retry in place");
    assert!(matches!(err, Error::Session(_)));
}

#[test]
fn missing_export_fails_initialization() {
    let wat = GUEST_WAT.replace("(export \"F\")", "(export \"renamed\")");
    let module = GuestModule::from_bytes(wat.as_bytes(), BTreeMap::new()).unwrap();
    let mut session = GuestSession::new("s3", &module, SessionConfig::default());

    let err = session.initialize().expect_err("set_license export missing");
    assert_eq!(err.category(), ErrorCategory::Session);
    assert!(err.to_string().contains("'F'"));
}

#[test]
fn export_with_wrong_signature_fails_initialization() {
    let wat = GUEST_WAT.replace(
        "(param $len i32) (param $sentinel i32) (result i32)",
        "(param $len i32) (result i32) (local $sentinel i32)",
    );
    assert_ne!(wat, GUEST_WAT);
    let module = GuestModule::from_bytes(wat.as_bytes(), BTreeMap::new()).unwrap();
    let mut session = GuestSession::new("s9", &module, SessionConfig::default());

    let err = session.initialize().expect_err("set_license takes three params");
    assert_eq!(err.category(), ErrorCategory::Session);
    assert!(err.to_string().contains("Invalid guest export 'F'"));
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn module_with_other_imports_is_rejected() {
    let module = GuestModule::from_bytes(
        br#"(module (import "env" "memory" (memory 1)))"#,
        BTreeMap::new(),
    )
    .unwrap();
    let mut session = GuestSession::new("s4", &module, SessionConfig::default());
    let err = session.initialize().expect_err("import count mismatch");
    assert_eq!(err.category(), ErrorCategory::Session);
}

#[test]
fn parse_license_records_content_key() {
    let module = guest_module();
    let mut session = ready_session(&module);
    let license = ticket();

    session.parse_license(&license).unwrap();

    let keys = session.get_keys(None);
    assert_eq!(keys.len(), 1);
    let key = &keys[0];
    assert_eq!(key.key_type, KeyType::Content);
    assert_eq!(key.key, license.b64().as_bytes()[..16].to_vec());
    assert_eq!(key.kid, Uuid::new_v5(&Uuid::NAMESPACE_DNS, CID.as_bytes()));
    assert_eq!(key.permissions, None);
}

#[test]
fn same_ticket_gives_same_key_id_across_sessions() {
    let module = guest_module();
    let mut first = ready_session(&module);
    let mut second = ready_session(&module);

    first.parse_license(&ticket()).unwrap();
    second.parse_license(&ticket()).unwrap();

    assert_eq!(first.get_keys(None), second.get_keys(None));
}

#[test]
fn ticket_without_correlation_id_uses_nil_key_id() {
    let module = guest_module();
    let mut session = ready_session(&module);

    session
        .parse_license(&License::from_bytes(b"plain ticket without any identifier".to_vec()))
        .unwrap();

    assert_eq!(session.get_keys(None)[0].kid, Uuid::nil());
}

#[test]
fn rejected_license_records_nothing() {
    let module = guest_module();
    let mut session = ready_session(&module);

    let err = session
        .parse_license(&License::from_bytes(b"short".to_vec()))
        .expect_err("guest returns 1");

    assert!(matches!(err, Error::LicenseRejected { code: 1 }));
    assert_eq!(err.category(), ErrorCategory::License);
    assert!(session.get_keys(None).is_empty());
}

#[test]
fn sentinel_is_marshaled_as_string() {
    let module = guest_module();
    let mut config = module.session_config();
    config.license_sentinel = "1".to_string();
    let mut session = GuestSession::new("s5", &module, config);
    session.initialize().unwrap();

    let err = session.parse_license(&ticket()).expect_err("guest checks sentinel");
    assert!(matches!(err, Error::LicenseRejected { code: 2 }));
}

#[test]
fn key_offset_outside_memory_is_a_license_error() {
    let module = guest_module();
    let config = module.session_config().with_layout(MemoryLayout {
        license_key_offset: 256 * 65536 - 8,
        ..MemoryLayout::default()
    });
    let mut session = GuestSession::new("s6", &module, config);
    session.initialize().unwrap();

    let err = session.parse_license(&ticket()).expect_err("key crosses memory end");
    assert!(matches!(err, Error::License(_)));
    assert!(err.to_string().contains("beyond memory bounds"));
    assert!(session.get_keys(None).is_empty());
    assert_eq!(session.state(), SessionState::Initialized);
}

#[test]
fn parse_before_initialize_is_a_license_error() {
    let module = guest_module();
    let mut session = GuestSession::new("s7", &module, SessionConfig::default());
    let err = session.parse_license(&ticket()).expect_err("not initialized");
    assert_eq!(err.category(), ErrorCategory::License);
}

#[test]
fn stack_pointer_is_restored_after_marshaled_call() {
    let module = guest_module();
    let mut session = ready_session(&module);

    let before = session.call_export("L", &[], ReturnKind::Int).unwrap();
    session.parse_license(&ticket()).unwrap();
    let after = session.call_export("L", &[], ReturnKind::Int).unwrap();

    assert_eq!(before, after);
}

#[test]
fn string_results_are_read_from_guest_memory() {
    let module = guest_module();
    let mut session = ready_session(&module);

    assert_eq!(session.version().unwrap(), "monalisa-test-1.0");

    let echoed = session
        .call_export("echo", &[GuestArg::Str("héllo wörld")], ReturnKind::String)
        .unwrap();
    assert_eq!(echoed, GuestValue::String("héllo wörld".to_string()));
}

#[test]
fn byte_arguments_are_copied_verbatim() {
    let module = guest_module();
    let mut session = ready_session(&module);
    let bytes = [1u8, 2, 3, 250];

    let sum = session
        .call_export(
            "sum_bytes",
            &[GuestArg::Bytes(&bytes), GuestArg::Int(bytes.len() as i32)],
            ReturnKind::Int,
        )
        .unwrap();

    assert_eq!(sum, GuestValue::Int(256));
}

#[test]
fn bool_results_are_coerced() {
    let module = guest_module();
    let mut session = ready_session(&module);

    let yes = session
        .call_export("is_positive", &[GuestArg::Int(5)], ReturnKind::Bool)
        .unwrap();
    let no = session
        .call_export("is_positive", &[GuestArg::Int(-5)], ReturnKind::Bool)
        .unwrap();

    assert_eq!(yes, GuestValue::Bool(true));
    assert_eq!(no, GuestValue::Bool(false));
}

#[test]
fn diagnostics_exports() {
    let module = guest_module();
    let mut session = ready_session(&module);

    assert_eq!(session.line_number().unwrap(), 42);
    assert_eq!(session.set_canvas_id("canvas-1").unwrap(), i32::from(b'c'));
}

#[test]
fn guest_trap_becomes_session_error() {
    let module = guest_module();
    let mut session = ready_session(&module);

    let err = session
        .call_export("trap", &[], ReturnKind::Int)
        .expect_err("unreachable");
    assert_eq!(err.category(), ErrorCategory::Session);

    // the instance stays usable after a trap
    assert_eq!(session.line_number().unwrap(), 42);
}

#[test]
fn cleanup_clears_keys_and_releases_instance() {
    let module = guest_module();
    let mut session = ready_session(&module);
    session.parse_license(&ticket()).unwrap();

    session.cleanup();

    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.context(), None);
    assert!(session.get_keys(None).is_empty());
    assert!(session.parse_license(&ticket()).is_err());
}

#[test]
fn cleaned_up_session_can_be_initialized_again() {
    let module = guest_module();
    let mut session = ready_session(&module);
    session.parse_license(&ticket()).unwrap();
    session.cleanup();

    session.initialize().unwrap();
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(session.context(), Some(65536));

    session.parse_license(&ticket()).unwrap();
    let keys = session.get_keys(None);
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].key, ticket().b64().as_bytes()[..16].to_vec());
}

#[test]
fn failed_session_stays_closed_after_cleanup() {
    let module = guest_module();
    let config = SessionConfig::default().with_layout(MemoryLayout {
        dynamic_base: 1,
        ..MemoryLayout::default()
    });
    let mut session = GuestSession::new("s8", &module, config);
    assert!(session.initialize().is_err());

    session.cleanup();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.initialize().is_err());
}

#[test]
fn get_keys_returns_a_copy() {
    let module = guest_module();
    let mut session = ready_session(&module);
    session.parse_license(&ticket()).unwrap();

    let mut keys = session.get_keys(Some(KeyType::Content));
    keys.push(Key::new(Uuid::nil(), vec![0; 16], KeyType::Signing));

    assert_eq!(session.get_keys(None).len(), 1);
    assert!(session.get_keys(Some(KeyType::Signing)).is_empty());
}

#[test]
fn base64_text_input_reaches_guest_unchanged() {
    let module = guest_module();
    let mut session = ready_session(&module);
    let encoded = encode_base64(b"0123456789abcdefghij");

    session.parse_license(&License::from_text(&encoded)).unwrap();

    assert_eq!(session.get_keys(None)[0].key, encoded.as_bytes()[..16].to_vec());
}
