use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use gw_common::config::StreamingMode;
use gw_common::GatewayConfig;
use gw_link::BrowserAgentLink;

use crate::credential_store::CredentialStore;
use crate::rotation::RotationController;

/// Operator-mutable toggles layered on top of the immutable `GatewayConfig`
/// snapshot. `GatewayConfig` is shared as an `Arc` and never mutated in
/// place; these are the knobs that actually change at runtime.
pub struct RuntimeSettings {
    streaming_mode: RwLock<StreamingMode>,
    include_thoughts: AtomicBool,
    native_reasoning: AtomicBool,
    resume_limit: std::sync::atomic::AtomicU32,
}

impl RuntimeSettings {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            streaming_mode: RwLock::new(config.streaming_mode),
            include_thoughts: AtomicBool::new(false),
            native_reasoning: AtomicBool::new(true),
            resume_limit: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn streaming_mode(&self) -> StreamingMode {
        *self.streaming_mode.read().unwrap()
    }

    pub fn set_streaming_mode(&self, mode: StreamingMode) {
        *self.streaming_mode.write().unwrap() = mode;
    }

    pub fn include_thoughts(&self) -> bool {
        self.include_thoughts.load(Ordering::Relaxed)
    }

    pub fn toggle_include_thoughts(&self) -> bool {
        !self.include_thoughts.fetch_xor(true, Ordering::Relaxed)
    }

    /// `true`: Google `thought:true` parts are kept in
    /// `reasoning_content`. `false`: folded into `content` behind a
    /// `<think>` tag, for OpenAI clients that don't read the separate
    /// field.
    pub fn native_reasoning(&self) -> bool {
        self.native_reasoning.load(Ordering::Relaxed)
    }

    pub fn toggle_native_reasoning(&self) -> bool {
        !self.native_reasoning.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn resume_limit(&self) -> u32 {
        self.resume_limit.load(Ordering::Relaxed)
    }

    pub fn set_resume_limit(&self, limit: u32) {
        self.resume_limit.store(limit, Ordering::Relaxed);
    }
}

/// Everything the HTTP layer needs to hand a request to the coordinator.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub credentials: Arc<CredentialStore>,
    pub link: Arc<BrowserAgentLink>,
    pub rotation: Arc<RotationController>,
    pub settings: Arc<RuntimeSettings>,
}
