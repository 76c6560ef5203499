use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::ws::events::CallKind;

/// Default time a callee has to answer.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// An invitation waiting for the callee's answer.
#[derive(Debug)]
pub struct PendingCall {
    /// Distinguishes this invitation from a later one to the same callee, so a
    /// late timer can never resolve the wrong call.
    pub invite_id: Uuid,
    pub caller_id: String,
    pub callee_id: String,
    pub kind: CallKind,
    pub room_id: String,
    pub issued_at: DateTime<Utc>,
    timer: Option<JoinHandle<()>>,
}

impl PendingCall {
    pub fn new(caller_id: &str, callee_id: &str, kind: CallKind) -> Self {
        Self {
            invite_id: Uuid::now_v7(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            kind,
            room_id: room_id(caller_id, callee_id),
            issued_at: Utc::now(),
            timer: None,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("callee already has a pending invitation")]
    CalleeBusy,
}

/// Room identifier both participants derive independently: the sorted pair.
pub fn room_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", first, second)
}

/// Outstanding invitations, at most one per callee.
#[derive(Debug)]
pub struct CallRegistry {
    /// callee_id -> invitation
    pending: DashMap<String, PendingCall>,
    timeout: Duration,
}

impl CallRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a new invitation unless the callee already has one.
    pub fn open(&self, call: PendingCall) -> Result<(), CallError> {
        match self.pending.entry(call.callee_id.clone()) {
            Entry::Occupied(_) => Err(CallError::CalleeBusy),
            Entry::Vacant(slot) => {
                slot.insert(call);
                Ok(())
            }
        }
    }

    /// Attach the timeout task to its invitation. If the invitation was
    /// already resolved in the meantime the timer is aborted on the spot.
    pub fn attach_timer(&self, callee_id: &str, invite_id: Uuid, timer: JoinHandle<()>) {
        match self.pending.get_mut(callee_id) {
            Some(mut call) if call.invite_id == invite_id => call.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Take the callee's invitation if it came from `caller_id`, cancelling
    /// its timer. Used for accept and reject.
    pub fn resolve(&self, callee_id: &str, caller_id: &str) -> Option<PendingCall> {
        let (_, mut call) = self
            .pending
            .remove_if(callee_id, |_, call| call.caller_id == caller_id)?;
        call.cancel_timer();
        Some(call)
    }

    /// Take the invitation on timeout, only if it is still the same one.
    pub fn expire(&self, callee_id: &str, invite_id: Uuid) -> Option<PendingCall> {
        self.pending
            .remove_if(callee_id, |_, call| call.invite_id == invite_id)
            .map(|(_, call)| call)
    }

    /// Drop an invitation that could not be delivered.
    pub fn discard(&self, callee_id: &str, invite_id: Uuid) {
        if let Some(mut call) = self.expire(callee_id, invite_id) {
            call.cancel_timer();
        }
    }

    pub fn is_pending(&self, callee_id: &str) -> bool {
        self.pending.contains_key(callee_id)
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}
