//! Dynamic loading of validated modules.
//!
//! # Architecture
//!
//! ```text
//! AnalyzedModule ──compile──▶ Module ──link (host + optional traps)──▶ Instance
//!                                                                   │
//!                        ModuleRegistry[identity] ◀── LoadedModule ─┘
//!                                                         │
//!                                 lookup(entry) ──▶ WasmWidgetFactory ──▶ WasmWidget
//! ```
//!
//! Each identity owns one store. Loading evicts the previous entry for the
//! identity before inserting, so a reload never observes a stale module.

pub mod host;
mod widget;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, Instance, Linker, Module, Store, Trap, WasmBacktrace};

pub use host::HostState;
pub use widget::{WasmWidget, WasmWidgetFactory};

use crate::barrier::{self, Breach};
use crate::capability::CapabilityFactory;
use crate::error::{Diagnostic, HostError, HostResult, Stage};
use crate::pipeline::analysis::AnalyzedModule;
use crate::pipeline::syntax::ParsedSource;
use crate::unit::{ModuleIdentity, SourceUnit};

/// A compiled, linked and started module.
pub struct LoadedModule {
    identity: ModuleIdentity,
    file_name: String,
    digest: String,
    imported_functions: usize,
    function_lines: Vec<usize>,
    exports: Vec<String>,
    tolerated_imports: Vec<String>,
    instance: Instance,
    store: Mutex<Store<HostState>>,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("identity", &self.identity)
            .field("digest", &self.digest)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl LoadedModule {
    #[must_use]
    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    /// BLAKE3 hex digest of the module text this was built from.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// Imports that were neither host-provided nor fatal; calling them traps.
    #[must_use]
    pub fn tolerated_imports(&self) -> &[String] {
        &self.tolerated_imports
    }

    /// Factory for `entry_point`, if the module exports it.
    #[must_use]
    pub fn lookup(self: &Arc<Self>, entry_point: &str) -> Option<Arc<dyn CapabilityFactory>> {
        if !self.exports.iter().any(|e| e == entry_point) {
            return None;
        }
        Some(Arc::new(WasmWidgetFactory::new(
            Arc::clone(self),
            entry_point,
        )))
    }

    pub(crate) fn file_name(&self) -> &str {
        &self.file_name
    }

    pub(crate) fn instance(&self) -> Instance {
        self.instance
    }

    pub(crate) fn with_store<R>(&self, f: impl FnOnce(&mut Store<HostState>) -> R) -> R {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    /// Describe a guest error, naming the innermost frame and its source line.
    pub(crate) fn describe(&self, err: &wasmtime::Error) -> (String, Option<usize>) {
        describe_guest_error(err, self.imported_functions, &self.function_lines)
    }
}

fn describe_guest_error(
    err: &wasmtime::Error,
    imported_functions: usize,
    function_lines: &[usize],
) -> (String, Option<usize>) {
    let message = err
        .downcast_ref::<Trap>()
        .map_or_else(|| err.root_cause().to_string(), ToString::to_string);
    let Some(frame) = err
        .downcast_ref::<WasmBacktrace>()
        .and_then(|bt| bt.frames().first())
    else {
        return (message, None);
    };
    let index = usize::try_from(frame.func_index()).ok();
    let line = index
        .and_then(|i| i.checked_sub(imported_functions))
        .and_then(|i| function_lines.get(i).copied());
    let location = frame
        .func_name()
        .map_or_else(|| format!("func[{}]", frame.func_index()), str::to_owned);
    (format!("{message} (in {location})"), line)
}

/// Loaded modules keyed by identity.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleIdentity, Arc<LoadedModule>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, identity: &ModuleIdentity) -> Option<Arc<LoadedModule>> {
        self.modules.get(identity).cloned()
    }

    /// Remove and return the entry for `identity`.
    pub fn evict(&mut self, identity: &ModuleIdentity) -> Option<Arc<LoadedModule>> {
        self.modules.remove(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn insert(&mut self, module: Arc<LoadedModule>) {
        self.modules.insert(module.identity.clone(), module);
    }
}

/// Compiles and instantiates analyzed modules.
pub struct ModuleLoader {
    engine: Engine,
}

impl ModuleLoader {
    /// Create a loader with its own engine.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::ModuleLoad`] if the engine cannot be configured.
    pub fn new() -> HostResult<Self> {
        let mut config = Config::new();
        config.wasm_backtrace(true);
        let engine = Engine::new(&config).map_err(|e| {
            HostError::ModuleLoad(Diagnostic::new(
                Stage::Load,
                "<engine>",
                format!("failed to create engine: {e}"),
            ))
        })?;
        Ok(Self { engine })
    }

    /// Load `analyzed` under the unit's identity, replacing any earlier load.
    ///
    /// Imports outside the host namespace are tolerated: they are linked to
    /// trapping stubs and logged. A trap in the start function fails the load.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::ModuleLoad`] on compile, link or start failure.
    pub fn load(
        &self,
        registry: &mut ModuleRegistry,
        unit: &SourceUnit,
        parsed: &ParsedSource,
        analyzed: &AnalyzedModule,
    ) -> HostResult<Arc<LoadedModule>> {
        let identity = unit.identity();
        if registry.evict(identity).is_some() {
            debug!(module = %identity, "Evicted previous load");
        }

        let fail = |message: String| {
            HostError::ModuleLoad(Diagnostic::new(
                Stage::Load,
                parsed.file_name.clone(),
                message,
            ))
        };

        let module = Module::from_binary(&self.engine, &analyzed.bytes)
            .map_err(|e| fail(format!("compile failed: {e:#}")))?;

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        host::register(&mut linker).map_err(|e| fail(format!("host link failed: {e:#}")))?;

        let tolerated_imports: Vec<String> = module
            .imports()
            .filter(|i| !host::provides(i.module(), i.name()))
            .map(|i| format!("{}.{}", i.module(), i.name()))
            .collect();
        for import in &tolerated_imports {
            warn!(module = %identity, import = %import, "Optional import not provided, calls will trap");
        }
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| fail(format!("link failed: {e:#}")))?;

        let mut store = Store::new(&self.engine, HostState::new(identity.clone()));
        let instance = match barrier::contain(|| linker.instantiate(&mut store, &module)) {
            Ok(instance) => instance,
            Err(Breach::Failed(e)) => {
                let (message, line) =
                    describe_guest_error(&e, analyzed.imported_functions, &parsed.function_lines);
                let diag = Diagnostic::new(Stage::Load, parsed.file_name.clone(), message)
                    .with_line(line)
                    .with_source_line(line.and_then(|l| parsed.line_text(l)));
                return Err(HostError::ModuleLoad(diag));
            },
            Err(Breach::Panicked(msg)) => {
                return Err(fail(format!("host panicked during start-up: {msg}")));
            },
        };

        let loaded = Arc::new(LoadedModule {
            identity: identity.clone(),
            file_name: parsed.file_name.clone(),
            digest: blake3::hash(parsed.text.as_bytes()).to_hex().to_string(),
            imported_functions: analyzed.imported_functions,
            function_lines: parsed.function_lines.clone(),
            exports: analyzed.exports.clone(),
            tolerated_imports,
            instance,
            store: Mutex::new(store),
        });
        registry.insert(Arc::clone(&loaded));

        info!(
            module = %identity,
            digest = %loaded.digest,
            exports = loaded.exports.len(),
            "Module loaded"
        );
        Ok(loaded)
    }
}
