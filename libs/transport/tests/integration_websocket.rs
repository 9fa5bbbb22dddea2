//! WebSocket session lifecycle against local mock servers

mod common;

use common::*;
use muse_transport::{Transport, WsHandler, WsState};
use std::time::Duration;

#[test]
fn test_connect_and_echo() {
    let server = MockWsServer::start();
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert_eq!(transport.ws_state(), WsState::Connecting);

    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));
    assert_eq!(recorder.connects, 1);

    transport.ws_send(b"hello").unwrap();
    transport.ws_send_binary(&[1, 2, 3]).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| r.messages.len() == 2));

    assert_eq!(recorder.messages[0], b"hello");
    assert_eq!(recorder.messages[1], vec![1, 2, 3]);
    assert_eq!(server.received(), vec!["hello".to_string()]);
    assert_eq!(recorder.disconnects, 0);
}

#[test]
fn test_send_json_message() {
    let server = MockWsServer::start();
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));

    transport
        .ws_send_json(&serde_json::json!({"op": 1, "d": null}))
        .unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| !r.messages.is_empty()));

    let echoed: serde_json::Value = serde_json::from_slice(&recorder.messages[0]).unwrap();
    assert_eq!(echoed["op"], 1);
    assert!(echoed["d"].is_null());
}

/// Sends a greeting from inside the connect notification
struct Greeter {
    inner: Recorder,
}

impl WsHandler for Greeter {
    fn on_connect(&mut self, transport: &mut Transport) {
        transport.ws_send(b"greetings").unwrap();
        self.inner.on_connect(transport);
    }

    fn on_message(&mut self, transport: &mut Transport, message: &[u8]) {
        self.inner.on_message(transport, message);
    }
}

#[test]
fn test_handler_can_send_from_connect() {
    let server = MockWsServer::start();
    let mut transport = transport();
    let mut greeter = Greeter {
        inner: Recorder::default(),
    };

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut greeter, |_, g| {
        !g.inner.messages.is_empty()
    }));
    assert_eq!(greeter.inner.texts(), vec!["greetings".to_string()]);
}

#[test]
fn test_fragmented_message_is_reassembled() {
    let server = ScriptedWsServer::start(vec![
        server_frame(0x1, false, b"hel"),
        server_frame(0x0, false, b"lo "),
        server_frame(0x0, true, b"world"),
        server_frame(0x1, true, b"second"),
    ]);
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| r.messages.len() == 2));

    assert_eq!(
        recorder.texts(),
        vec!["hello world".to_string(), "second".to_string()]
    );
}

#[test]
fn test_ping_inside_fragmented_message_is_answered() {
    let server = ScriptedWsServer::start(vec![
        server_frame(0x1, false, b"a"),
        server_frame(0x9, true, b"p"),
        server_frame(0x0, true, b"b"),
    ]);
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| !r.messages.is_empty()));
    assert_eq!(recorder.texts(), vec!["ab".to_string()]);

    assert!(poll_until(&mut transport, &mut recorder, |_, _| {
        unmask_client_frame(&server.from_client()).is_some()
    }));
    let (first, payload) = unmask_client_frame(&server.from_client()).unwrap();
    assert_eq!(first, 0x8A);
    assert_eq!(payload, b"p");
}

#[test]
fn test_server_close_notifies_disconnect() {
    let server = ScriptedWsServer::start(vec![server_frame(0x8, true, &[0x03, 0xE8])]);
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| r.disconnects == 1));

    assert_eq!(recorder.connects, 1);
    assert_eq!(transport.ws_state(), WsState::Closed);
    assert!(transport.ws_send(b"late").is_err());
}

#[test]
fn test_close_requested_by_echo_server() {
    let server = MockWsServer::start();
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));

    transport.ws_send(b"close-me").unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| r.disconnects == 1));
    assert!(recorder.messages.is_empty());
}

#[test]
fn test_rejected_upgrade_reports_disconnect_only() {
    let server = MockHttpServer::start(|_| response(400, "Bad Request", b"no"));
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport
        .ws_open(&format!("ws://{}/gateway", server.addr))
        .unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |_, r| r.disconnects == 1));

    assert_eq!(recorder.connects, 0);
    assert_eq!(transport.ws_state(), WsState::Closed);
}

#[test]
fn test_local_close_then_reopen() {
    let server = MockWsServer::start();
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));

    transport.ws_close();
    assert_eq!(transport.ws_state(), WsState::Closed);
    transport
        .poll(&mut recorder, Duration::from_millis(5))
        .unwrap();
    assert_eq!(recorder.disconnects, 1);

    // Closing again is silent
    transport.ws_close();
    poll_for(&mut transport, &mut recorder, Duration::from_millis(30));
    assert_eq!(recorder.disconnects, 1);

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));
    assert_eq!(recorder.connects, 2);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_open_replaces_active_session() {
    let server = MockWsServer::start();
    let mut transport = transport();
    let mut recorder = Recorder::default();

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));

    transport.ws_open(&server.ws_url()).unwrap();
    assert!(poll_until(&mut transport, &mut recorder, |t, _| t.is_ws_open()));

    assert_eq!(recorder.disconnects, 1);
    assert_eq!(recorder.connects, 2);
}
