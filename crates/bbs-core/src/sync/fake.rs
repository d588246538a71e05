//! In-memory remote log for tests
//!
//! Clones share state, so two engines built on clones of one `FakeRemote`
//! behave like two devices talking to the same server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};

use super::change::{OutgoingChange, RemoteChange};
use super::remote::{Accepted, RemoteError, RemoteLog, TokenGrant};

pub(crate) const PASSWORD: &str = "hunter2";
pub(crate) const USER_ID: &str = "user-1";

#[derive(Default)]
struct FakeState {
    devices: Vec<String>,
    rejected_devices: HashSet<String>,
    access_tokens: HashSet<String>,
    refresh_tokens: HashSet<String>,
    next_token: u64,
    log: Vec<RemoteChange>,
    seen: HashMap<String, i64>,
    accept_limit: Option<usize>,
    offline: bool,
    refresh_rejection: Option<u16>,
    refresh_count: usize,
    push_calls: usize,
}

impl FakeState {
    fn grant(&mut self) -> TokenGrant {
        self.next_token += 1;
        let access = format!("access-{}", self.next_token);
        let refresh = format!("refresh-{}", self.next_token);
        self.access_tokens.insert(access.clone());
        self.refresh_tokens.insert(refresh.clone());
        TokenGrant {
            user_id: USER_ID.to_string(),
            access_token: access,
            refresh_token: refresh,
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            return Err(RemoteError::Connect("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_device(&self, device_id: &str) -> Result<(), RemoteError> {
        if self.rejected_devices.contains(device_id) {
            return Err(RemoteError::DeviceRejected(format!(
                "device {} has been revoked",
                device_id
            )));
        }
        Ok(())
    }

    fn check_access(&self, token: &str) -> Result<(), RemoteError> {
        if !self.access_tokens.contains(token) {
            return Err(RemoteError::Unauthorized);
        }
        Ok(())
    }

    fn next_sequence(&self) -> i64 {
        self.log.last().map(|c| c.sequence).unwrap_or(0) + 1
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Accept at most `limit` Changes per push
    pub(crate) fn set_accept_limit(&self, limit: Option<usize>) {
        self.state().accept_limit = limit;
    }

    pub(crate) fn reject_device(&self, device_id: &str) {
        self.state().rejected_devices.insert(device_id.to_string());
    }

    /// Invalidate every access token so the next call gets a 401
    pub(crate) fn expire_access_tokens(&self) {
        self.state().access_tokens.clear();
    }

    pub(crate) fn revoke_refresh_tokens(&self) {
        self.state().refresh_tokens.clear();
    }

    /// Answer every refresh with this HTTP status and an `invalid_grant` body
    pub(crate) fn reject_refresh_with(&self, status: Option<u16>) {
        self.state().refresh_rejection = status;
    }

    /// Append a raw entry to the log, bypassing push
    pub(crate) fn inject(&self, entity: &str, entity_id: &str, op: &str, payload: Vec<u8>) -> i64 {
        let mut state = self.state();
        let sequence = state.next_sequence();
        state.log.push(RemoteChange {
            sequence,
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            op: op.to_string(),
            payload,
            decode_error: None,
        });
        sequence
    }

    /// Append a Change whose payload is given in wire form (base64 text)
    pub(crate) fn inject_wire(&self, entity: &str, entity_id: &str, op: &str, encoded: &str) -> i64 {
        let mut state = self.state();
        let sequence = state.next_sequence();
        state.log.push(RemoteChange::from_wire(
            sequence,
            entity.to_string(),
            entity_id.to_string(),
            op.to_string(),
            Some(encoded),
        ));
        sequence
    }

    pub(crate) fn log(&self) -> Vec<RemoteChange> {
        self.state().log.clone()
    }

    pub(crate) fn registered_devices(&self) -> Vec<String> {
        self.state().devices.clone()
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.state().refresh_count
    }

    pub(crate) fn push_calls(&self) -> usize {
        self.state().push_calls
    }
}

impl RemoteLog for FakeRemote {
    fn login(
        &self,
        _email: &str,
        password: &str,
        device_id: &str,
    ) -> Result<TokenGrant, RemoteError> {
        let mut state = self.state();
        state.check_online()?;
        state.check_device(device_id)?;
        if password != PASSWORD {
            return Err(RemoteError::Unauthorized);
        }
        if !state.devices.iter().any(|d| d == device_id) {
            state.devices.push(device_id.to_string());
        }
        Ok(state.grant())
    }

    fn refresh(&self, refresh_token: &str, device_id: &str) -> Result<TokenGrant, RemoteError> {
        let mut state = self.state();
        state.check_online()?;
        state.check_device(device_id)?;
        if let Some(status) = state.refresh_rejection {
            return Err(RemoteError::Server {
                status,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            });
        }
        if !state.refresh_tokens.remove(refresh_token) {
            return Err(RemoteError::Unauthorized);
        }
        state.refresh_count += 1;
        Ok(state.grant())
    }

    fn push(
        &self,
        access_token: &str,
        device_id: &str,
        changes: &[OutgoingChange],
    ) -> Result<Vec<Accepted>, RemoteError> {
        let mut state = self.state();
        state.check_online()?;
        state.check_device(device_id)?;
        state.check_access(access_token)?;
        state.push_calls += 1;

        let limit = state.accept_limit.unwrap_or(changes.len());
        let mut accepted = Vec::new();
        for change in changes.iter().take(limit) {
            let sequence = match state.seen.get(&change.change_id) {
                Some(&seq) => seq,
                None => {
                    let seq = state.next_sequence();
                    state.log.push(RemoteChange {
                        sequence: seq,
                        entity: change.entity.as_str().to_string(),
                        entity_id: change.entity_id.clone(),
                        op: change.op.as_str().to_string(),
                        payload: change.payload.clone(),
                        decode_error: None,
                    });
                    state.seen.insert(change.change_id.clone(), seq);
                    seq
                }
            };
            accepted.push(Accepted {
                change_id: change.change_id.clone(),
                sequence,
            });
        }
        Ok(accepted)
    }

    fn pull(
        &self,
        access_token: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RemoteChange>, RemoteError> {
        let state = self.state();
        state.check_online()?;
        state.check_access(access_token)?;
        Ok(state
            .log
            .iter()
            .filter(|c| c.sequence > since)
            .take(limit)
            .cloned()
            .collect())
    }
}
