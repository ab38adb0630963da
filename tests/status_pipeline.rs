mod common;

use common::{nanodlp, Reply, ScriptedTransport};
use orion_rs::nanodlp::{nano_status_to_canonical, StateHandler, DEFAULT_HEIGHT_SCALE};
use orion_rs::{PrintStatus, PrinterBackend, RawStatus};
use serde_json::json;

fn raw(value: serde_json::Value) -> RawStatus {
    serde_json::from_value(value).unwrap()
}

#[test]
fn completion_is_reported_once_on_the_edge() {
    let mut handler = StateHandler::new();
    let printing = raw(json!({"Printing": true, "State": 1, "LayerID": 99, "LayersCount": 100}));
    let idle = raw(json!({"Printing": false, "State": 0, "LayersCount": 100}));

    let first = handler.canonicalize(&printing);
    assert_eq!(first.status, PrintStatus::Printing);
    assert!(!first.finished);

    let second = handler.canonicalize(&idle);
    assert_eq!(second.status, PrintStatus::Idle);
    assert!(second.finished);
    let mapped = nano_status_to_canonical(&idle, &second, DEFAULT_HEIGHT_SCALE);
    assert!(mapped.finished);
    assert_eq!(mapped.layer(), Some(99));

    let third = handler.canonicalize(&idle);
    assert!(!third.finished);
}

#[test]
fn printing_without_file_still_has_print_data() {
    let mut handler = StateHandler::new();
    let partial = raw(json!({"Printing": true, "LayerID": 5, "LayersCount": 100}));
    let state = handler.canonicalize(&partial);
    let mapped = nano_status_to_canonical(&partial, &state, DEFAULT_HEIGHT_SCALE);

    assert!(mapped.is_printing());
    let data = mapped.print_data.expect("print data while printing");
    assert_eq!(data.layer_count, 100);
    assert_eq!(data.layer, Some(5));
    assert!(data.file_data.is_none());
}

#[test]
fn heights_are_converted_to_millimetres() {
    let mut handler = StateHandler::new();
    for (height, z) in [(12340, 12.34), (150000, 150.0), (0, 0.0)] {
        let status = raw(json!({"State": 0, "CurrentHeight": height}));
        let state = handler.canonicalize(&status);
        let mapped = nano_status_to_canonical(&status, &state, DEFAULT_HEIGHT_SCALE);
        assert_eq!(mapped.physical_state.z, z);
        assert!(mapped.print_data.is_none());
    }
}

#[tokio::test]
async fn backend_status_follows_a_job_to_completion() {
    let transport = ScriptedTransport::new();
    transport.on_sequence(
        "/status",
        vec![
            Reply::Json(json!({"Printing": true, "State": 1, "LayerID": 1, "LayersCount": 3, "CurrentHeight": 50})),
            Reply::Json(json!({
                "Printing": true, "State": 1, "LayerID": 3, "LayersCount": 3, "CurrentHeight": 150,
                "file": {"path": "models/cube.zip", "name": "cube.zip", "layerCount": 3}
            })),
            Reply::Json(json!({"Printing": false, "State": 0, "LayerID": "", "LayersCount": 3, "CurrentHeight": 150})),
            Reply::Json(json!({"Printing": false, "State": 0, "LayersCount": 3, "CurrentHeight": 150})),
        ],
    );
    let backend = nanodlp(transport);

    let started = backend.get_status().await.unwrap();
    assert!(started.is_printing());
    assert_eq!(started.layer(), Some(1));

    let running = backend.get_status().await.unwrap();
    let file = running.print_data.as_ref().and_then(|d| d.file_data.clone()).unwrap();
    assert_eq!(file.name, "cube.zip");
    assert_eq!(running.physical_state.z, 0.15);

    let finished = backend.get_status().await.unwrap();
    assert!(finished.finished);
    assert!(finished.is_idle());
    assert_eq!(finished.layer(), Some(3));

    let after = backend.get_status().await.unwrap();
    assert!(!after.finished);
    assert!(after.print_data.is_none());
}

#[tokio::test]
async fn reset_session_forgets_the_previous_state() {
    let transport = ScriptedTransport::new();
    transport.on_sequence(
        "/status",
        vec![
            Reply::Json(json!({"Printing": true, "State": 1, "LayerID": 7, "LayersCount": 10})),
            Reply::Json(json!({"Printing": false, "State": 0, "LayersCount": 10})),
        ],
    );
    let backend = nanodlp(transport);

    backend.get_status().await.unwrap();
    backend.reset_session();
    let status = backend.get_status().await.unwrap();
    assert!(!status.finished);
}

#[tokio::test]
async fn unknown_state_code_is_unknown() {
    let transport = ScriptedTransport::new();
    transport.on("/status", Reply::Json(json!({"Printing": false, "State": 7})));
    let backend = nanodlp(transport);

    let status = backend.get_status().await.unwrap();
    assert_eq!(status.status, PrintStatus::Unknown);
}
