// Verify the wire format matches what the streaming subprocess emits.
// These tests ensure protocol compatibility is never broken.

use bobbin_wire::{decode_line, encode_line, ContentBlock, ContentUnion, StreamRecord};

#[test]
fn system_init_round_trip() {
    let json = r#"{"type":"system","subtype":"init","session_id":"sess-1","cwd":"/work","tools":["Bash","Read"],"model":"claude-sonnet-4-5"}"#;
    let record = decode_line(json).unwrap();

    let system = match &record {
        StreamRecord::System(r) => r,
        other => panic!("expected system record, got {other:?}"),
    };
    assert!(system.is_init());
    assert_eq!(system.session_id.as_deref(), Some("sess-1"));
    assert_eq!(system.cwd.as_deref(), Some("/work"));
    assert_eq!(system.tools, vec!["Bash", "Read"]);

    let encoded = encode_line(&record).unwrap();
    assert_eq!(decode_line(&encoded).unwrap(), record);
}

#[test]
fn user_record_with_string_content() {
    let json = r#"{"type":"user","message":{"role":"user","content":"hello"},"session_id":"sess-1"}"#;
    let record = decode_line(json).unwrap();

    match &record {
        StreamRecord::User(r) => {
            assert_eq!(r.message.role, "user");
            assert_eq!(r.message.content, ContentUnion::Text("hello".to_string()));
        }
        other => panic!("expected user record, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn user_record_with_block_content() {
    let json = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok","is_error":false}]},"session_id":"sess-1"}"#;
    let record = decode_line(json).unwrap();

    match &record {
        StreamRecord::User(r) => match &r.message.content {
            ContentUnion::Blocks(blocks) => {
                assert!(matches!(blocks[0], ContentBlock::ToolResult(_)));
            }
            other => panic!("expected blocks, got {other:?}"),
        },
        other => panic!("expected user record, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn assistant_record_round_trip() {
    let json = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}],"stop_reason":"tool_use","usage":{"input_tokens":10,"output_tokens":4}},"session_id":"sess-1"}"#;
    let record = decode_line(json).unwrap();

    match &record {
        StreamRecord::Assistant(r) => {
            assert_eq!(r.message.content.len(), 2);
            assert_eq!(r.message.stop_reason.as_deref(), Some("tool_use"));
        }
        other => panic!("expected assistant record, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn result_record_round_trip() {
    let json = r#"{"type":"result","subtype":"success","duration_ms":1234,"duration_api_ms":800,"is_error":false,"num_turns":3,"session_id":"sess-1","usage":{"input_tokens":55},"total_cost_usd":0.012}"#;
    let record = decode_line(json).unwrap();

    match &record {
        StreamRecord::Result(r) => {
            assert_eq!(r.subtype, "success");
            assert_eq!(r.duration_ms, 1234);
            assert_eq!(r.num_turns, 3);
            assert!(!r.is_error);
        }
        other => panic!("expected result record, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn control_request_round_trip() {
    let json = r#"{"type":"control_request","request_id":"req_42","request":{"subtype":"interrupt"}}"#;
    let record = decode_line(json).unwrap();

    match &record {
        StreamRecord::ControlRequest(r) => {
            assert_eq!(r.request_id, "req_42");
            assert_eq!(r.request.subtype, "interrupt");
        }
        other => panic!("expected control_request, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn control_response_success_and_error() {
    let ok = decode_line(
        r#"{"type":"control_response","response":{"request_id":"req_42","subtype":"success"}}"#,
    )
    .unwrap();
    match &ok {
        StreamRecord::ControlResponse(r) => {
            assert_eq!(r.response.subtype, "success");
            assert!(r.response.error.is_none());
        }
        other => panic!("expected control_response, got {other:?}"),
    }

    let err = decode_line(
        r#"{"type":"control_response","response":{"request_id":"req_43","subtype":"error","error":"no turn in flight"}}"#,
    )
    .unwrap();
    match &err {
        StreamRecord::ControlResponse(r) => {
            assert_eq!(r.response.error.as_deref(), Some("no turn in flight"));
        }
        other => panic!("expected control_response, got {other:?}"),
    }
}

#[test]
fn unknown_top_level_type_survives_round_trip() {
    let json = r#"{"type":"diagnostic","payload":{"nested":[1,2,3]}}"#;
    let record = decode_line(json).unwrap();
    assert!(matches!(record, StreamRecord::Unknown(_)));

    let encoded = encode_line(&record).unwrap();
    let reparsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(reparsed["type"], "diagnostic");
    assert_eq!(reparsed["payload"]["nested"][2], 3);
}

#[test]
fn unknown_content_block_survives_inside_assistant() {
    let json = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"server_tool_use","id":"s1","name":"web_search"}]},"session_id":"sess-1"}"#;
    let record = decode_line(json).unwrap();
    match &record {
        StreamRecord::Assistant(r) => {
            assert!(matches!(r.message.content[0], ContentBlock::Unknown(_)));
        }
        other => panic!("expected assistant record, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn extra_system_fields_are_preserved() {
    let json = r#"{"type":"system","subtype":"init","session_id":"sess-1","apiKeySource":"env"}"#;
    let record = decode_line(json).unwrap();
    match &record {
        StreamRecord::System(r) => {
            assert_eq!(r.extra["apiKeySource"], "env");
        }
        other => panic!("expected system record, got {other:?}"),
    }
    assert_eq!(decode_line(&encode_line(&record).unwrap()).unwrap(), record);
}

#[test]
fn encoder_is_byte_stable() {
    let record = decode_line(
        r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]},"session_id":"sess-1"}"#,
    )
    .unwrap();
    assert_eq!(
        encode_line(&record).unwrap(),
        encode_line(&record.clone()).unwrap()
    );
}

#[test]
fn malformed_line_is_a_codec_error() {
    assert!(decode_line("not-json").is_err());
}
