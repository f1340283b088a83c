//! Browser bindings
//!
//! Everything crosses the boundary as JSON strings so the JS side never has
//! to know about Rust layouts.

use wasm_bindgen::prelude::*;

use crate::error::PollError;
use crate::settings::SyncSettings;
use crate::sim::{BuildRequest, RoundKey, build_script};
use crate::sync::{PollResponse, ReconciliationEngine};

fn to_js(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Install panic hook and console logging
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    // A second init (hot reload) only means a logger is already installed
    let _ = console_log::init_with_level(log::Level::Info);
}

/// Build a race script from a JSON `BuildRequest`, returning the script JSON
#[wasm_bindgen]
pub fn build_race_script(request_json: &str) -> Result<String, JsValue> {
    let request: BuildRequest = serde_json::from_str(request_json).map_err(to_js)?;
    let script = build_script(&request).map_err(to_js)?;
    script.to_json().map_err(to_js)
}

/// Client playback for one round.
///
/// The host owns the transport: it sends whatever `poll_request` returns and
/// feeds the reply (or the failure) back through `receive`/`fail`.
#[wasm_bindgen]
pub struct WebReconciler {
    engine: ReconciliationEngine,
}

#[wasm_bindgen]
impl WebReconciler {
    #[wasm_bindgen(constructor)]
    pub fn new(
        room_id: &str,
        round: u32,
        settings_json: Option<String>,
        now_ms: f64,
    ) -> Result<WebReconciler, JsValue> {
        let settings = match settings_json {
            Some(json) => serde_json::from_str::<SyncSettings>(&json).map_err(to_js)?,
            None => SyncSettings::default(),
        };
        Ok(Self {
            engine: ReconciliationEngine::new(RoundKey::new(room_id, round), settings, now_ms),
        })
    }

    /// JSON poll request to send now, if one is due
    pub fn poll_request(&mut self, now_ms: f64) -> Result<Option<String>, JsValue> {
        self.engine
            .poll_request(now_ms)
            .map(|request| serde_json::to_string(&request).map_err(to_js))
            .transpose()
    }

    /// Deliver a poll response body
    pub fn receive(&mut self, now_ms: f64, response_json: &str) {
        let result = PollResponse::from_json(response_json);
        self.engine.receive(now_ms, result);
    }

    /// Report that the in-flight poll failed
    pub fn fail(&mut self, now_ms: f64, message: &str) {
        self.engine
            .receive(now_ms, Err(PollError::Network(message.to_string())));
    }

    /// Advance one render frame; returns the frame as JSON
    pub fn frame(&mut self, now_ms: f64) -> Result<String, JsValue> {
        let frame = self.engine.frame(now_ms);
        serde_json::to_string(&frame).map_err(to_js)
    }

    pub fn diagnostics(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.engine.diagnostics()).map_err(to_js)
    }
}
