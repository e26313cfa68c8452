//! Host functions exposed to guest modules under the `host` namespace.

use tracing::{debug, info};
use wasmtime::{Caller, Linker};

use crate::unit::ModuleIdentity;

/// Import namespace resolved by the host.
pub const HOST_NAMESPACE: &str = "host";

/// Functions the host provides; any other import is optional.
pub const HOST_FUNCTIONS: &[&str] = &["log", "now_ms"];

/// Per-store state visible to host functions.
#[derive(Debug)]
pub struct HostState {
    identity: ModuleIdentity,
    logged: u64,
}

impl HostState {
    #[must_use]
    pub fn new(identity: ModuleIdentity) -> Self {
        Self { identity, logged: 0 }
    }

    /// Number of `host.log` calls made by the guest.
    #[must_use]
    pub fn logged(&self) -> u64 {
        self.logged
    }
}

/// Whether `module.name` is provided by the host.
#[must_use]
pub fn provides(module: &str, name: &str) -> bool {
    module == HOST_NAMESPACE && HOST_FUNCTIONS.contains(&name)
}

/// Register all host functions on `linker`.
///
/// # Errors
///
/// Returns an error if a definition clashes with an existing one.
pub fn register(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_NAMESPACE,
        "log",
        |mut caller: Caller<'_, HostState>, value: i32| {
            let state = caller.data_mut();
            state.logged = state.logged.saturating_add(1);
            info!(module = %state.identity, value, "guest log");
        },
    )?;
    linker.func_wrap(
        HOST_NAMESPACE,
        "now_ms",
        |caller: Caller<'_, HostState>| -> i64 {
            let now = chrono::Utc::now().timestamp_millis();
            debug!(module = %caller.data().identity, now, "guest clock read");
            now
        },
    )?;
    Ok(())
}
