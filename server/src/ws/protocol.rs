use crate::chat::{delivery, presence, reactions, typing};
use crate::error::RealtimeError;
use crate::state::AppState;
use crate::voice::signaling;
use crate::ws::events::{ClientEvent, ErrorEvent, ServerEvent};
use crate::ws::ConnectionHandle;

/// Handle an incoming text frame.
/// Decodes the event, runs it to completion, and reports failures back to
/// this connection only.
pub async fn handle_text_message(
    text: &str,
    handle: &ConnectionHandle,
    state: &AppState,
    user_id: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client event"
            );
            send_error(handle, &event_name(text), 400, "Malformed event");
            return;
        }
    };

    let name = event.name();
    if let Err(err) = dispatch_event(event, handle, state, user_id).await {
        if let RealtimeError::Persistence(ref e) = err {
            tracing::error!(user_id = %user_id, event = name, error = %e, "Store failure");
        } else {
            tracing::debug!(user_id = %user_id, event = name, error = %err, "Event rejected");
        }
        send_error(handle, name, err.status().as_u16(), &err.public_message());
    }
}

/// Dispatch a decoded event to the component that owns it.
async fn dispatch_event(
    event: ClientEvent,
    handle: &ConnectionHandle,
    state: &AppState,
    user_id: &str,
) -> Result<(), RealtimeError> {
    match event {
        ClientEvent::Join(claimed) => handle_join(&claimed, handle, state, user_id),
        ClientEvent::SendMessage(req) => {
            delivery::send_message(state, user_id, req).await?;
            Ok(())
        }
        ClientEvent::MessageSeen(req) => {
            delivery::mark_seen(state, user_id, req).await?;
            Ok(())
        }
        ClientEvent::ReactToMessage(req) => {
            reactions::react(state, user_id, req).await?;
            Ok(())
        }
        ClientEvent::Typing(req) => {
            typing::relay_typing(&state.connections, user_id, &req, true);
            Ok(())
        }
        ClientEvent::StopTyping(req) => {
            typing::relay_typing(&state.connections, user_id, &req, false);
            Ok(())
        }
        ClientEvent::CallInvite(req) => signaling::invite(state, user_id, req).await,
        ClientEvent::CallAccept(req) => signaling::accept(state, user_id, req),
        ClientEvent::CallReject(req) => signaling::reject(state, user_id, req),
    }
}

/// `join` re-asserts the session the handshake already opened. The claimed id
/// must be the authenticated one.
fn handle_join(
    claimed: &str,
    handle: &ConnectionHandle,
    state: &AppState,
    user_id: &str,
) -> Result<(), RealtimeError> {
    if claimed != user_id {
        return Err(RealtimeError::unauthorized(
            "join must use the authenticated user id",
        ));
    }
    match state.connections.lookup(user_id) {
        // Superseded connection still draining its frames; must not reclaim
        Some(current) if current.id != handle.id => {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %handle.id,
                "Ignoring join from superseded connection"
            );
        }
        _ => presence::join(state, user_id, handle),
    }
    Ok(())
}

/// Best-effort event name from a frame that failed to decode.
fn event_name(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("event")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Send an error event to this connection.
fn send_error(handle: &ConnectionHandle, event: &str, code: u16, message: &str) {
    handle.push(ServerEvent::Error(ErrorEvent {
        event: event.to_string(),
        code,
        message: message.to_string(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, test_state};
    use serde_json::json;

    #[tokio::test]
    async fn test_malformed_frame_reports_error_to_sender_only() {
        let (state, _db) = test_state();
        let (alice, mut rx_a) = ConnectionHandle::channel();
        let (bob, mut rx_b) = ConnectionHandle::channel();
        presence::join(&state, "alice", &alice);
        presence::join(&state, "bob", &bob);
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle_text_message("{not json", &alice, &state, "alice").await;
        handle_text_message(
            &json!({"event": "sendMessage", "data": {"oops": 1}}).to_string(),
            &alice,
            &state,
            "alice",
        )
        .await;

        let errors = drain(&mut rx_a);
        assert_eq!(errors.len(), 2);
        match &errors[1] {
            ServerEvent::Error(e) => {
                assert_eq!(e.event, "sendMessage");
                assert_eq!(e.code, 400);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(drain(&mut rx_b).is_empty());
        assert!(!alice.is_closed());
    }

    #[tokio::test]
    async fn test_send_message_frame_is_delivered() {
        let (state, _db) = test_state();
        let (alice, mut rx_a) = ConnectionHandle::channel();
        let (bob, mut rx_b) = ConnectionHandle::channel();
        presence::join(&state, "alice", &alice);
        presence::join(&state, "bob", &bob);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let frame = json!({
            "event": "sendMessage",
            "data": {"senderID": "alice", "receiverID": "bob", "content": "hi", "messageType": "text"}
        });
        handle_text_message(&frame.to_string(), &alice, &state, "alice").await;

        match drain(&mut rx_b).as_slice() {
            [ServerEvent::ReceiveMessage(m)] => {
                assert_eq!(m.content, "hi");
                assert!(m.delivered);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerEvent::MessageDelivered(_)]
        ));
    }

    #[tokio::test]
    async fn test_errors_carry_status_codes() {
        let (state, _db) = test_state();
        let (alice, mut rx_a) = ConnectionHandle::channel();
        presence::join(&state, "alice", &alice);
        drain(&mut rx_a);

        let seen = json!({"event": "messageSeen", "data": {"messageID": "missing"}});
        handle_text_message(&seen.to_string(), &alice, &state, "alice").await;
        let spoof = json!({"event": "join", "data": "bob"});
        handle_text_message(&spoof.to_string(), &alice, &state, "alice").await;

        let codes: Vec<u16> = drain(&mut rx_a)
            .into_iter()
            .map(|e| match e {
                ServerEvent::Error(e) => e.code,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(codes, vec![404, 403]);
        assert!(!state.connections.is_online("bob"));
    }

    #[tokio::test]
    async fn test_join_from_superseded_connection_is_ignored() {
        let (state, _db) = test_state();
        let (old, _rx_old) = ConnectionHandle::channel();
        let (new, _rx_new) = ConnectionHandle::channel();
        presence::join(&state, "alice", &old);
        presence::join(&state, "alice", &new);

        let join = json!({"event": "join", "data": "alice"});
        handle_text_message(&join.to_string(), &old, &state, "alice").await;
        assert_eq!(state.connections.lookup("alice").unwrap().id, new.id);
    }
}
