//! Credential rotation state machine. All scalar state lives behind a
//! single `tokio::sync::Mutex`; the check-and-flip of `is_switching`
//! happens while holding that lock for the whole decision.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::{info, warn};

use gw_link::{BrowserAgentLink, QueueFrame};
use gw_protocol::ControlFrame;

use crate::credential_store::CredentialStore;
use crate::events::{EventHub, OperationalEvent};

const REBIND_ACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub failure_threshold: u32,
    pub switch_on_uses: u32,
    pub immediate_switch_status_codes: HashSet<u16>,
}

#[derive(Debug)]
struct RotationState {
    current_index: u32,
    usage_count: u32,
    failure_count: u32,
    pending_switch: bool,
    is_switching: bool,
    active_request_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum GateRejection {
    #[error("rotating accounts")]
    RotatingAccounts,
    #[error("system busy")]
    SystemBusy,
}

#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("fallback to previous credential also failed: {0}")]
    Fatal(String),
}

pub struct RotationController {
    state: Mutex<RotationState>,
    config: RotationConfig,
    credentials: Arc<CredentialStore>,
    link: Arc<BrowserAgentLink>,
    events: EventHub,
    rebind_counter: std::sync::atomic::AtomicU64,
}

impl RotationController {
    pub fn new(
        config: RotationConfig,
        credentials: Arc<CredentialStore>,
        link: Arc<BrowserAgentLink>,
        initial_index: u32,
    ) -> Self {
        Self {
            state: Mutex::new(RotationState {
                current_index: initial_index,
                usage_count: 0,
                failure_count: 0,
                pending_switch: false,
                is_switching: false,
                active_request_count: 0,
            }),
            config,
            credentials,
            link,
            events: EventHub::default(),
            rebind_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn current_index(&self) -> u32 {
        self.state.lock().await.current_index
    }

    pub async fn is_system_busy(&self) -> bool {
        self.state.lock().await.is_switching
    }

    /// Common entry gate steps 1-2. Returns the incremented
    /// `activeRequestCount` on success so the caller's guaranteed-release
    /// scope can always call `release`.
    pub async fn gate_enter(&self) -> Result<(), GateRejection> {
        let mut state = self.state.lock().await;
        if state.pending_switch || state.is_switching {
            return Err(GateRejection::RotatingAccounts);
        }
        state.active_request_count += 1;
        Ok(())
    }

    /// Step 4: re-check busy after the caller attempted silent recovery.
    /// On failure the caller must still call `release`.
    pub async fn gate_busy_after_recovery(&self) -> Result<(), GateRejection> {
        let state = self.state.lock().await;
        if state.is_switching {
            return Err(GateRejection::SystemBusy);
        }
        Ok(())
    }

    /// Step 5: increment usage for generative requests, arming
    /// `pendingSwitch` at threshold.
    pub async fn record_usage(&self, is_generative: bool) {
        if !is_generative {
            return;
        }
        let mut state = self.state.lock().await;
        if state.pending_switch {
            return;
        }
        state.usage_count += 1;
        if self.config.switch_on_uses > 0 && state.usage_count >= self.config.switch_on_uses {
            state.pending_switch = true;
        }
    }

    pub async fn record_success(&self) {
        self.state.lock().await.failure_count = 0;
    }

    /// Returns `true` if the failure threshold was just reached (caller
    /// should begin an immediate switch).
    pub async fn record_failure(&self) -> bool {
        if self.config.failure_threshold == 0 {
            return false;
        }
        let mut state = self.state.lock().await;
        state.failure_count += 1;
        state.failure_count >= self.config.failure_threshold
    }

    pub fn immediate_switch_needed(&self, status: u16) -> bool {
        self.config.immediate_switch_status_codes.contains(&status)
    }

    /// Single silent recovery attempt on the current credential.
    pub async fn attempt_silent_recovery(&self) -> Result<(), String> {
        let current = self.current_index().await;
        self.rebind(current).await
    }

    /// Guaranteed-release step: decrement `activeRequestCount` and drain
    /// the pending switch if one is armed.
    pub async fn release(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            state.active_request_count = state.active_request_count.saturating_sub(1);
        }
        self.try_execute_pending_switch().await;
    }

    pub async fn try_execute_pending_switch(self: &Arc<Self>) {
        let should_switch = {
            let state = self.state.lock().await;
            state.pending_switch && !state.is_switching && state.active_request_count == 0
        };
        if should_switch {
            if let Err(err) = self.switch(None).await {
                warn!(error = %err, "drained switch failed fatally");
            }
        }
    }

    /// Manual switch (operator endpoint): warns on in-flight requests but
    /// does not refuse.
    pub async fn switch_manual(self: &Arc<Self>, target: u32) -> Result<(), SwitchError> {
        let active = self.state.lock().await.active_request_count;
        if active > 0 {
            warn!(active, "manual switch requested with requests in flight");
        }
        self.switch(Some(target)).await
    }

    /// Immediate switch from the failure handler or an immediate-switch
    /// status code.
    pub async fn switch_immediate(self: &Arc<Self>) -> Result<(), SwitchError> {
        self.switch(None).await
    }

    async fn switch(self: &Arc<Self>, target: Option<u32>) -> Result<(), SwitchError> {
        let previous_index = {
            let mut state = self.state.lock().await;
            state.is_switching = true;
            state.current_index
        };

        let available = self.credentials.available_indices();
        let next_index = target.unwrap_or_else(|| next_in_rotation(available, previous_index));

        self.events
            .emit(OperationalEvent::SwitchStarted {
                from: previous_index,
                to: next_index,
                at: SystemTime::now(),
            })
            .await;

        match self.rebind(next_index).await {
            Ok(()) => {
                self.finish_switch(next_index).await;
                self.events
                    .emit(OperationalEvent::SwitchSucceeded {
                        index: next_index,
                        at: SystemTime::now(),
                    })
                    .await;
                Ok(())
            }
            Err(primary_error) => {
                self.events
                    .emit(OperationalEvent::SwitchFailed {
                        index: next_index,
                        error: primary_error.clone(),
                        at: SystemTime::now(),
                    })
                    .await;
                self.events
                    .emit(OperationalEvent::FallbackSwitching {
                        to: previous_index,
                        at: SystemTime::now(),
                    })
                    .await;
                match self.rebind(previous_index).await {
                    Ok(()) => {
                        self.finish_switch(previous_index).await;
                        Ok(())
                    }
                    Err(fallback_error) => {
                        let mut state = self.state.lock().await;
                        state.is_switching = false;
                        Err(SwitchError::Fatal(format!(
                            "primary switch to {next_index} failed ({primary_error}); fallback to {previous_index} also failed ({fallback_error})"
                        )))
                    }
                }
            }
        }
    }

    async fn finish_switch(&self, new_index: u32) {
        let mut state = self.state.lock().await;
        state.current_index = new_index;
        state.usage_count = 0;
        state.failure_count = 0;
        state.pending_switch = false;
        state.is_switching = false;
        info!(new_index, "rotation switch complete");
    }

    async fn rebind(&self, index: u32) -> Result<(), String> {
        let credential = self
            .credentials
            .get(index)
            .map_err(|err| err.to_string())?
            .clone();

        let request_id = format!(
            "rebind-{}",
            self.rebind_counter
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        );
        let queue = self.link.open_queue(&request_id);

        let frame = ControlFrame::RebindSession {
            request_id: request_id.clone(),
            credential_index: index,
            credential,
        };
        if let Err(err) = self.link.send(&frame) {
            self.link.close_queue(&request_id);
            return Err(err.to_string());
        }

        let result = queue.dequeue(REBIND_ACK_TIMEOUT).await;
        self.link.close_queue(&request_id);

        match result {
            Ok(QueueFrame::ResponseHeaders { status, .. }) if status < 400 => Ok(()),
            Ok(QueueFrame::ResponseHeaders { status, .. }) => {
                Err(format!("rebind rejected with status {status}"))
            }
            Ok(QueueFrame::Error { status, message, .. }) => {
                Err(format!("rebind error {status}: {message}"))
            }
            Ok(_) => Err("unexpected rebind acknowledgement frame".to_string()),
            Err(err) => Err(err.to_string()),
        }
    }
}

fn next_in_rotation(available: &[u32], current: u32) -> u32 {
    match available.iter().position(|&index| index == current) {
        Some(pos) => available[(pos + 1) % available.len()],
        None => available[0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_in_rotation_wraps_around() {
        assert_eq!(next_in_rotation(&[1, 2, 3], 1), 2);
        assert_eq!(next_in_rotation(&[1, 2, 3], 3), 1);
    }

    #[test]
    fn next_in_rotation_falls_back_to_first_when_current_missing() {
        assert_eq!(next_in_rotation(&[1, 2, 3], 99), 1);
    }

    #[tokio::test]
    async fn gate_enter_rejects_when_pending_switch() {
        let config = RotationConfig {
            failure_threshold: 3,
            switch_on_uses: 5,
            immediate_switch_status_codes: HashSet::new(),
        };
        let credentials = CredentialStore::from_candidates_for_test(vec![(1, r#"{}"#.to_string())]);
        let link = Arc::new(BrowserAgentLink::new());
        let controller = Arc::new(RotationController::new(
            config,
            Arc::new(credentials),
            link,
            1,
        ));

        controller.gate_enter().await.unwrap();
        controller.record_usage(true).await;
        controller.record_usage(true).await;
        controller.record_usage(true).await;
        controller.record_usage(true).await;
        controller.record_usage(true).await;
        // switch_on_uses=5 reached, pending_switch is now armed
        let result = controller.gate_enter().await;
        assert!(matches!(result, Err(GateRejection::RotatingAccounts)));
    }

    #[tokio::test]
    async fn record_failure_reports_threshold_reached() {
        let config = RotationConfig {
            failure_threshold: 2,
            switch_on_uses: 0,
            immediate_switch_status_codes: HashSet::new(),
        };
        let credentials = CredentialStore::from_candidates_for_test(vec![(1, r#"{}"#.to_string())]);
        let link = Arc::new(BrowserAgentLink::new());
        let controller = Arc::new(RotationController::new(
            config,
            Arc::new(credentials),
            link,
            1,
        ));

        assert!(!controller.record_failure().await);
        assert!(controller.record_failure().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count_not_usage() {
        let config = RotationConfig {
            failure_threshold: 3,
            switch_on_uses: 0,
            immediate_switch_status_codes: HashSet::new(),
        };
        let credentials = CredentialStore::from_candidates_for_test(vec![(1, r#"{}"#.to_string())]);
        let link = Arc::new(BrowserAgentLink::new());
        let controller = Arc::new(RotationController::new(
            config,
            Arc::new(credentials),
            link,
            1,
        ));

        controller.record_usage(true).await;
        assert!(!controller.record_failure().await);
        controller.record_success().await;
        assert_eq!(controller.state.lock().await.failure_count, 0);
        assert_eq!(controller.state.lock().await.usage_count, 1);
    }
}
