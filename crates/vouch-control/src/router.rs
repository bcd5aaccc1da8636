// SPDX-License-Identifier: MIT OR Apache-2.0

//! The router dispatch port.
//!
//! The router is the external collaborator that actually performs
//! governed operations. The control plane compiles a request, dispatches
//! it here, and records the outcome — it never sees router internals.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::Value;

/// A compiled router run request.
#[derive(Debug, Clone)]
pub struct RouterRunRequest {
    /// What to accomplish.
    pub goal: String,
    /// Adapter to execute through.
    pub adapter_id: String,
    /// Whether to simulate only.
    pub dry_run: bool,
    /// Optional pre-defined plan.
    pub plan: Option<String>,
    /// Cap on execution steps.
    pub max_steps: Option<u32>,
    /// Capabilities the adapter must provide.
    pub require_capabilities: Option<Vec<String>>,
}

/// The dispatch port.
pub trait Router: Send + Sync {
    /// Execute a run. The response dict must carry at least `run_id`;
    /// `steps_executed` is read when present.
    ///
    /// # Errors
    ///
    /// Any failure surfaces as an error; the control plane records it as
    /// an `EXECUTION_FAILED` event with code `ROUTER_ERROR`.
    fn run(&self, request: &RouterRunRequest) -> Result<Value>;

    /// Advertised capabilities of an adapter. `None` means "unknown" and
    /// skips the capability gate.
    fn adapter_capabilities(&self, adapter_id: &str) -> Option<BTreeSet<String>>;
}
