use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::run_blocking;
use crate::error::RealtimeError;
use crate::state::AppState;
use crate::voice::calls::{CallError, PendingCall};
use crate::ws::events::{
    CallAccepted, CallFailed, CallFailureReason, CallInviteRequest, CallRejected,
    CallResponseRequest, IncomingCall, RejectReason, ServerEvent,
};

fn call_failed(state: &AppState, caller_id: &str, callee_id: &str, reason: CallFailureReason) {
    state.connections.send_to_user(
        caller_id,
        ServerEvent::CallFailed(CallFailed {
            callee_id: callee_id.to_string(),
            reason,
        }),
    );
}

/// Handle a callInvite: ring the callee if they are online and free, and arm
/// the answer timeout.
///
/// An offline or busy callee is reported to the caller with `callFailed`; no
/// invitation is recorded in that case.
pub async fn invite(
    state: &AppState,
    acting_user: &str,
    req: CallInviteRequest,
) -> Result<(), RealtimeError> {
    if req.caller_id != acting_user {
        return Err(RealtimeError::unauthorized(
            "callerID does not match the connected user",
        ));
    }
    let callee_id = req.callee_id.trim().to_string();
    if callee_id.is_empty() {
        return Err(RealtimeError::invalid("calleeID is required"));
    }
    if callee_id == acting_user {
        return Err(RealtimeError::invalid("cannot call yourself"));
    }

    let Some(callee) = state.connections.lookup(&callee_id) else {
        tracing::debug!(caller_id = %acting_user, callee_id = %callee_id, "Callee offline");
        call_failed(state, acting_user, &callee_id, CallFailureReason::Offline);
        return Ok(());
    };

    // Display info is best effort, a ring without a name is still a ring
    let uid = acting_user.to_string();
    let profile = match run_blocking(&state.store, move |store| store.find_user(&uid)).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(user_id = %acting_user, "Failed to load caller profile: {}", e);
            None
        }
    };

    let call = PendingCall::new(acting_user, &callee_id, req.call_kind);
    let invite_id = call.invite_id;
    let incoming = IncomingCall {
        caller_id: call.caller_id.clone(),
        caller_name: profile.as_ref().and_then(|p| p.username.clone()),
        caller_profile_pic: profile.and_then(|p| p.profile_pic),
        call_kind: call.kind,
        room_id: call.room_id.clone(),
        issued_at: call.issued_at,
    };

    if let Err(CallError::CalleeBusy) = state.calls.open(call) {
        tracing::debug!(caller_id = %acting_user, callee_id = %callee_id, "Callee busy");
        call_failed(state, acting_user, &callee_id, CallFailureReason::Busy);
        return Ok(());
    }

    if !callee.push(ServerEvent::IncomingCall(incoming)) {
        // Callee's session closed between lookup and push
        state.calls.discard(&callee_id, invite_id);
        call_failed(state, acting_user, &callee_id, CallFailureReason::Offline);
        return Ok(());
    }

    let timer = spawn_timeout(state, callee_id.clone(), invite_id);
    state.calls.attach_timer(&callee_id, invite_id, timer);

    tracing::info!(
        caller_id = %acting_user,
        callee_id = %callee_id,
        invite_id = %invite_id,
        "Call invitation sent"
    );
    Ok(())
}

/// Answer timer: if the same invitation is still pending when it fires, the
/// caller gets `callRejected{timeout}`. An accept or reject that wins the race
/// removes the invitation first, so at most one outcome is ever delivered.
fn spawn_timeout(state: &AppState, callee_id: String, invite_id: Uuid) -> JoinHandle<()> {
    let calls = state.calls.clone();
    let connections = state.connections.clone();
    let timeout = calls.timeout();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(call) = calls.expire(&callee_id, invite_id) else {
            return;
        };
        tracing::info!(
            caller_id = %call.caller_id,
            callee_id = %call.callee_id,
            "Call invitation timed out"
        );
        connections.send_to_user(
            &call.caller_id,
            ServerEvent::CallRejected(CallRejected {
                callee_id: call.callee_id.clone(),
                reason: RejectReason::Timeout,
            }),
        );
    })
}

fn ensure_callee(acting_user: &str, req: &CallResponseRequest) -> Result<(), RealtimeError> {
    if req.callee_id != acting_user {
        return Err(RealtimeError::unauthorized(
            "only the callee can answer an invitation",
        ));
    }
    Ok(())
}

/// Handle a callAccept from the callee.
pub fn accept(
    state: &AppState,
    acting_user: &str,
    req: CallResponseRequest,
) -> Result<(), RealtimeError> {
    ensure_callee(acting_user, &req)?;
    let call = state
        .calls
        .resolve(&req.callee_id, &req.caller_id)
        .ok_or(RealtimeError::NotFound("call invitation"))?;

    tracing::info!(caller_id = %call.caller_id, callee_id = %call.callee_id, "Call accepted");
    state.connections.send_to_user(
        &call.caller_id,
        ServerEvent::CallAccepted(CallAccepted {
            callee_id: call.callee_id.clone(),
            call_kind: call.kind,
            room_id: call.room_id.clone(),
        }),
    );
    Ok(())
}

/// Handle a callReject from the callee.
pub fn reject(
    state: &AppState,
    acting_user: &str,
    req: CallResponseRequest,
) -> Result<(), RealtimeError> {
    ensure_callee(acting_user, &req)?;
    let call = state
        .calls
        .resolve(&req.callee_id, &req.caller_id)
        .ok_or(RealtimeError::NotFound("call invitation"))?;

    tracing::info!(caller_id = %call.caller_id, callee_id = %call.callee_id, "Call rejected");
    state.connections.send_to_user(
        &call.caller_id,
        ServerEvent::CallRejected(CallRejected {
            callee_id: call.callee_id.clone(),
            reason: RejectReason::Declined,
        }),
    );
    Ok(())
}
