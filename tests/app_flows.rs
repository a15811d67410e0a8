use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cipherchat_core::{
    AppAction, AppReconciler, AppUpdate, AuthState, ChatApp, ConnectionState,
};
use tempfile::tempdir;

fn write_config(data_dir: &str, extra: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("cipherchat_config.json");
    let mut v = serde_json::json!({
        "disable_network": true,
    });
    if let Some(map) = extra.as_object() {
        for (k, val) in map {
            v[k] = val.clone();
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

fn write_credentials(data_dir: &str, id: i64, nickname: &str) {
    let path = std::path::Path::new(data_dir).join("credentials.json");
    let v = serde_json::json!({ "id": id, "nickname": nickname });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

fn message_frame(
    id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
    timestamp: &str,
) -> String {
    serde_json::json!({
        "type": "message",
        "data": {
            "id": id,
            "sender_id": sender_id,
            "receiver_id": receiver_id,
            "content": content,
            "encrypted_content": format!("enc:{content}"),
            "timestamp": timestamp,
        },
    })
    .to_string()
}

/// Offline app logged in as user 1 ("alice").
fn logged_in_app(data_dir: &str, extra_config: serde_json::Value) -> Arc<ChatApp> {
    write_config(data_dir, extra_config);
    write_credentials(data_dir, 1, "alice");
    let app = ChatApp::new(data_dir.to_string());
    app.dispatch(AppAction::RestoreSession);
    wait_until("restored session", Duration::from_secs(5), || {
        matches!(app.state().auth, AuthState::LoggedIn { .. })
    });
    app
}

#[test]
fn restore_session_uses_saved_credentials() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    let state = app.state();
    let identity = state.identity().expect("logged in");
    assert_eq!(identity.id, 1);
    assert_eq!(identity.nickname, "alice");
    // Offline config never opens a connection.
    assert_eq!(state.connection, ConnectionState::Disconnected);
}

#[test]
fn restore_without_credentials_stays_logged_out() {
    let dir = tempdir().unwrap();
    write_config(dir.path().to_str().unwrap(), serde_json::json!({}));
    let app = ChatApp::new(dir.path().to_str().unwrap().to_string());
    app.dispatch(AppAction::RestoreSession);
    std::thread::sleep(Duration::from_millis(300));
    assert!(matches!(app.state().auth, AuthState::LoggedOut));
}

#[test]
fn update_stream_revisions_are_monotonic() {
    let dir = tempdir().unwrap();
    write_config(dir.path().to_str().unwrap(), serde_json::json!({}));
    write_credentials(dir.path().to_str().unwrap(), 1, "alice");
    let app = ChatApp::new(dir.path().to_str().unwrap().to_string());
    let (reconciler, updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(reconciler));

    app.dispatch(AppAction::RestoreSession);
    app.dispatch(AppAction::SelectPeer { peer_id: 2 });
    wait_until("selection applied", Duration::from_secs(5), || {
        app.state().selected_peer == Some(2)
    });

    let revs: Vec<u64> = updates.lock().unwrap().iter().map(|u| u.rev()).collect();
    assert!(!revs.is_empty());
    assert!(revs.windows(2).all(|w| w[0] < w[1]), "revs not monotonic: {revs:?}");
    // The shared snapshot matches the last published revision.
    assert_eq!(app.state().rev, *revs.last().unwrap());
}

#[test]
fn inbound_message_appends_and_notifies() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
    wait_until("notification raised", Duration::from_secs(5), || {
        app.state().notifications.len() == 1
    });

    let state = app.state();
    let n = &state.notifications[0];
    assert_eq!(n.source_message_id, "10");
    assert_eq!(n.sender_id, 2);
    assert_eq!(n.preview, "hi");
    // No directory offline: sender resolves to the fallback name.
    assert_eq!(n.sender_name, "unknown sender");

    assert_eq!(state.conversations.len(), 1);
    let entry = &state.conversations[0];
    assert_eq!(entry.peer_id, 2);
    let summary = entry.summary.as_ref().expect("summary");
    assert_eq!(summary.last_content, "hi");
    assert_eq!(summary.last_encrypted, "enc:hi");

    // Nothing selected, so no open-conversation projection.
    assert!(state.current_messages.is_empty());
}

#[test]
fn redelivered_frame_is_not_duplicated() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));
    app.dispatch(AppAction::SelectPeer { peer_id: 2 });

    let frame = message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00");
    app.inject_inbound_frame_for_tests(frame.clone());
    wait_until("message visible", Duration::from_secs(5), || {
        app.state().current_messages.len() == 1
    });

    app.inject_inbound_frame_for_tests(frame);
    // Same payload under a fresh id: the tuple rule still catches it.
    app.inject_inbound_frame_for_tests(message_frame(999, 2, 1, "hi", "2024-05-01T10:00:00"));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(app.state().current_messages.len(), 1);
}

#[test]
fn messages_order_by_timestamp_not_arrival() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));
    app.dispatch(AppAction::SelectPeer { peer_id: 2 });

    app.inject_inbound_frame_for_tests(message_frame(12, 2, 1, "second", "2024-05-01T10:02:00"));
    app.inject_inbound_frame_for_tests(message_frame(11, 2, 1, "first", "2024-05-01T10:01:00"));
    wait_until("both messages visible", Duration::from_secs(5), || {
        app.state().current_messages.len() == 2
    });

    let contents: Vec<String> = app
        .state()
        .current_messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[test]
fn active_conversation_suppresses_notification() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));
    app.dispatch(AppAction::SelectPeer { peer_id: 2 });
    wait_until("peer selected", Duration::from_secs(5), || {
        app.state().selected_peer == Some(2)
    });

    // From the open conversation: silent.
    app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
    wait_until("message visible", Duration::from_secs(5), || {
        app.state().current_messages.len() == 1
    });
    assert!(app.state().notifications.is_empty());

    // From anyone else: notifies.
    app.inject_inbound_frame_for_tests(message_frame(11, 3, 1, "psst", "2024-05-01T10:01:00"));
    wait_until("notification raised", Duration::from_secs(5), || {
        app.state().notifications.len() == 1
    });
    assert_eq!(app.state().notifications[0].sender_id, 3);
}

#[test]
fn same_content_from_another_sender_is_a_new_message() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));
    app.dispatch(AppAction::SelectPeer { peer_id: 2 });
    wait_until("peer selected", Duration::from_secs(5), || {
        app.state().selected_peer == Some(2)
    });

    app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
    wait_until("message from open peer", Duration::from_secs(5), || {
        app.state().current_messages.len() == 1
    });
    assert!(app.state().notifications.is_empty());

    // Identical content and timestamp but a third-party sender: a new
    // message in its own conversation, and it notifies.
    app.inject_inbound_frame_for_tests(message_frame(11, 3, 1, "hi", "2024-05-01T10:00:00"));
    wait_until("notification for other sender", Duration::from_secs(5), || {
        app.state().notifications.len() == 1
    });
    let state = app.state();
    assert_eq!(state.notifications[0].sender_id, 3);
    assert_eq!(state.notifications[0].source_message_id, "11");
    assert_eq!(state.conversations.len(), 2);
    // The open conversation did not absorb the look-alike.
    assert_eq!(state.current_messages.len(), 1);
}

#[test]
fn failed_state_write_surfaces_storage_toast() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    // Occupy the chat-state path with a directory so every write fails.
    std::fs::create_dir(dir.path().join("chat_state_1.json")).unwrap();

    app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
    wait_until("storage toast", Duration::from_secs(5), || {
        app.state()
            .toast
            .as_deref()
            .map(|t| t.starts_with("storage error"))
            .unwrap_or(false)
    });
    // The merge itself still went through.
    assert_eq!(app.state().conversations.len(), 1);
}

#[test]
fn open_notification_switches_to_sender() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    app.inject_inbound_frame_for_tests(message_frame(10, 3, 1, "psst", "2024-05-01T10:00:00"));
    wait_until("notification raised", Duration::from_secs(5), || {
        app.state().notifications.len() == 1
    });

    app.dispatch(AppAction::OpenNotification {
        message_id: "10".to_string(),
    });
    wait_until("sender selected", Duration::from_secs(5), || {
        app.state().selected_peer == Some(3)
    });
    let state = app.state();
    assert!(state.notifications.is_empty());
    assert_eq!(state.current_messages.len(), 1);
    assert_eq!(state.current_messages[0].content, "psst");
}

#[test]
fn dismissed_notification_goes_away_and_stays_away() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    app.inject_inbound_frame_for_tests(message_frame(10, 3, 1, "psst", "2024-05-01T10:00:00"));
    wait_until("notification raised", Duration::from_secs(5), || {
        app.state().notifications.len() == 1
    });

    app.dispatch(AppAction::DismissNotification {
        message_id: "10".to_string(),
    });
    wait_until("notification dismissed", Duration::from_secs(5), || {
        app.state().notifications.is_empty()
    });

    // Redelivery is a duplicate append-wise, so nothing re-raises.
    app.inject_inbound_frame_for_tests(message_frame(10, 3, 1, "psst", "2024-05-01T10:00:00"));
    std::thread::sleep(Duration::from_millis(300));
    assert!(app.state().notifications.is_empty());
    // Selection unchanged: dismissal never touches the open conversation.
    assert_eq!(app.state().selected_peer, None);
}

#[test]
fn notifications_expire_on_their_own() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(
        dir.path().to_str().unwrap(),
        serde_json::json!({ "notification_ttl_ms": 200 }),
    );

    app.inject_inbound_frame_for_tests(message_frame(10, 3, 1, "psst", "2024-05-01T10:00:00"));
    wait_until("notification raised", Duration::from_secs(5), || {
        app.state().notifications.len() == 1
    });
    wait_until("notification expired", Duration::from_secs(5), || {
        app.state().notifications.is_empty()
    });
    // The message itself stays.
    app.dispatch(AppAction::SelectPeer { peer_id: 3 });
    wait_until("message still present", Duration::from_secs(5), || {
        app.state().current_messages.len() == 1
    });
}

#[test]
fn notifications_stack_in_arrival_order() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    // Timestamps deliberately reversed; stacking follows arrival.
    app.inject_inbound_frame_for_tests(message_frame(20, 2, 1, "late", "2024-05-01T10:05:00"));
    app.inject_inbound_frame_for_tests(message_frame(21, 3, 1, "early", "2024-05-01T10:01:00"));
    wait_until("both raised", Duration::from_secs(5), || {
        app.state().notifications.len() == 2
    });
    let ids: Vec<String> = app
        .state()
        .notifications
        .iter()
        .map(|n| n.source_message_id.clone())
        .collect();
    assert_eq!(ids, vec!["20", "21"]);
}

#[test]
fn error_frame_surfaces_as_toast() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    let frame = serde_json::json!({ "type": "error", "message": "user not found" }).to_string();
    app.inject_inbound_frame_for_tests(frame);
    wait_until("toast surfaced", Duration::from_secs(5), || {
        app.state().toast.as_deref() == Some("user not found")
    });

    app.dispatch(AppAction::ClearToast);
    wait_until("toast cleared", Duration::from_secs(5), || {
        app.state().toast.is_none()
    });
}

#[test]
fn unknown_frame_type_is_ignored() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    let frame = serde_json::json!({ "type": "presence", "data": { "user_id": 2 } }).to_string();
    app.inject_inbound_frame_for_tests(frame);
    app.inject_inbound_frame_for_tests("not json at all".to_string());
    std::thread::sleep(Duration::from_millis(300));
    let state = app.state();
    assert!(state.conversations.is_empty());
    assert!(state.notifications.is_empty());
    assert!(state.toast.is_none());
}

#[test]
fn foreign_message_is_not_stored() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    // Neither side is user 1.
    app.inject_inbound_frame_for_tests(message_frame(30, 5, 6, "eh", "2024-05-01T10:00:00"));
    std::thread::sleep(Duration::from_millis(300));
    assert!(app.state().conversations.is_empty());
    assert!(app.state().notifications.is_empty());
}

#[test]
fn send_requires_content_selection_key_and_connection() {
    let dir = tempdir().unwrap();
    let app = logged_in_app(dir.path().to_str().unwrap(), serde_json::json!({}));

    app.dispatch(AppAction::SendMessage {
        content: "   ".to_string(),
    });
    wait_until("empty content rejected", Duration::from_secs(5), || {
        app.state().toast.as_deref() == Some("message cannot be empty")
    });
    app.dispatch(AppAction::ClearToast);

    app.dispatch(AppAction::SendMessage {
        content: "hello".to_string(),
    });
    wait_until("no selection rejected", Duration::from_secs(5), || {
        app.state().toast.as_deref() == Some("select a recipient first")
    });
    app.dispatch(AppAction::ClearToast);

    // Offline there is no directory, so the selected peer has no roster
    // entry and the send is rejected before any encryption attempt.
    app.dispatch(AppAction::SelectPeer { peer_id: 2 });
    app.dispatch(AppAction::SendMessage {
        content: "hello".to_string(),
    });
    wait_until("unknown recipient rejected", Duration::from_secs(5), || {
        app.state()
            .toast
            .as_deref()
            .map(|t| t.starts_with("send rejected"))
            .unwrap_or(false)
    });
    assert!(app.state().current_messages.is_empty());
}

#[test]
fn chat_state_survives_restart() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    {
        let app = logged_in_app(data_dir, serde_json::json!({}));
        app.dispatch(AppAction::SelectPeer { peer_id: 2 });
        app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
        wait_until("message stored", Duration::from_secs(5), || {
            app.state().current_messages.len() == 1
        });
    }

    // Fresh process, same data dir.
    let app = ChatApp::new(data_dir.to_string());
    app.dispatch(AppAction::RestoreSession);
    wait_until("session restored", Duration::from_secs(5), || {
        matches!(app.state().auth, AuthState::LoggedIn { .. })
    });
    wait_until("conversation restored", Duration::from_secs(5), || {
        app.state().current_messages.len() == 1
    });
    let state = app.state();
    assert_eq!(state.selected_peer, Some(2));
    assert_eq!(state.current_messages[0].content, "hi");

    // Redelivery after restore still dedups.
    app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(app.state().current_messages.len(), 1);
}

#[test]
fn logout_clears_state_and_credentials() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();
    let app = logged_in_app(data_dir, serde_json::json!({}));

    app.inject_inbound_frame_for_tests(message_frame(10, 2, 1, "hi", "2024-05-01T10:00:00"));
    wait_until("conversation present", Duration::from_secs(5), || {
        !app.state().conversations.is_empty()
    });

    app.dispatch(AppAction::Logout);
    wait_until("logged out", Duration::from_secs(5), || {
        matches!(app.state().auth, AuthState::LoggedOut)
    });
    let state = app.state();
    assert!(state.conversations.is_empty());
    assert!(state.current_messages.is_empty());
    assert!(state.notifications.is_empty());
    assert_eq!(state.selected_peer, None);
    assert!(!std::path::Path::new(data_dir).join("credentials.json").exists());

    // A late frame from the dead session no longer lands anywhere.
    app.inject_inbound_frame_for_tests(message_frame(11, 2, 1, "hi again", "2024-05-01T10:01:00"));
    std::thread::sleep(Duration::from_millis(300));
    assert!(app.state().conversations.is_empty());

    app.dispatch(AppAction::RestoreSession);
    std::thread::sleep(Duration::from_millis(300));
    assert!(matches!(app.state().auth, AuthState::LoggedOut));
}
