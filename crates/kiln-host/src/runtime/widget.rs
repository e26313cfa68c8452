//! Capabilities backed by a loaded wasm instance.
//!
//! A guest capability is an `i32` handle returned by the entry point, driven
//! through the module's `paint` and `on_event` exports:
//!
//! ```text
//! (func (export "build") (result i32))                         ;; entry point, returns a handle
//! (func (export "paint") (param i32 i32 i32) (result i32))      ;; handle, width, height -> 0xRRGGBB
//! (func (export "on_event") (param i32 i32 i32 i32) (result i32)) ;; handle, kind, a, b -> consumed
//! (func (export "teardown") (param i32))                        ;; optional
//! ```

use std::sync::Arc;

use tracing::debug;
use wasmtime::{Instance, Store, TypedFunc, WasmParams, WasmResults};

use super::{HostState, LoadedModule};
use crate::capability::{
    Capability, CapabilityError, CapabilityFactory, CapabilityResult, InputEvent, Surface,
};

type PaintFn = TypedFunc<(i32, i32, i32), i32>;
type EventFn = TypedFunc<(i32, i32, i32, i32), i32>;
type TeardownFn = TypedFunc<i32, ()>;

/// Builds [`WasmWidget`]s from one export of a loaded module.
#[derive(Debug)]
pub struct WasmWidgetFactory {
    module: Arc<LoadedModule>,
    entry_point: String,
}

impl WasmWidgetFactory {
    pub(crate) fn new(module: Arc<LoadedModule>, entry_point: &str) -> Self {
        Self {
            module,
            entry_point: entry_point.to_string(),
        }
    }
}

fn typed<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    instance: Instance,
    name: &str,
    shape: &str,
) -> CapabilityResult<Option<TypedFunc<P, R>>> {
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store)
        .map(Some)
        .map_err(|e| CapabilityError::Contract(format!("`{name}` must have type {shape}: {e}")))
}

fn required<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    instance: Instance,
    name: &str,
    shape: &str,
) -> CapabilityResult<TypedFunc<P, R>> {
    typed(store, instance, name, shape)?
        .ok_or_else(|| CapabilityError::Contract(format!("missing required export `{name}`")))
}

impl CapabilityFactory for WasmWidgetFactory {
    fn entry_point(&self) -> &str {
        &self.entry_point
    }

    fn origin(&self) -> &str {
        self.module.file_name()
    }

    fn instantiate(&self) -> CapabilityResult<Box<dyn Capability>> {
        let module = &self.module;
        let instance = module.instance();
        let (handle, paint, on_event, teardown) = module.with_store(|store| {
            let entry: TypedFunc<(), i32> =
                required(store, instance, &self.entry_point, "() -> i32")?;
            let paint: PaintFn = required(store, instance, "paint", "(i32, i32, i32) -> i32")?;
            let on_event: EventFn =
                required(store, instance, "on_event", "(i32, i32, i32, i32) -> i32")?;
            let teardown: Option<TeardownFn> = typed(store, instance, "teardown", "(i32) -> ()")?;
            let handle = entry
                .call(&mut *store, ())
                .map_err(|e| CapabilityError::Trap(module.describe(&e).0))?;
            Ok::<_, CapabilityError>((handle, paint, on_event, teardown))
        })?;

        let name = format!("{}::{}", module.identity(), self.entry_point);
        debug!(capability = %name, handle, "Capability instantiated");
        Ok(Box::new(WasmWidget {
            module: Arc::clone(module),
            name,
            handle,
            paint,
            on_event,
            teardown,
        }))
    }
}

/// A hosted guest capability.
pub struct WasmWidget {
    module: Arc<LoadedModule>,
    name: String,
    handle: i32,
    paint: PaintFn,
    on_event: EventFn,
    teardown: Option<TeardownFn>,
}

impl WasmWidget {
    fn trap(&self, err: &wasmtime::Error) -> CapabilityError {
        let (message, line) = self.module.describe(err);
        match line {
            Some(line) => CapabilityError::Trap(format!("{message} at line {line}")),
            None => CapabilityError::Trap(message),
        }
    }
}

impl Capability for WasmWidget {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn paint(&mut self, surface: &mut Surface) -> CapabilityResult<()> {
        let width = i32::try_from(surface.width).unwrap_or(i32::MAX);
        let height = i32::try_from(surface.height).unwrap_or(i32::MAX);
        let color = self
            .module
            .with_store(|store| self.paint.call(store, (self.handle, width, height)))
            .map_err(|e| self.trap(&e))?;
        surface.fill = u32::from_ne_bytes(color.to_ne_bytes()) & 0x00FF_FFFF;
        surface.overlay = None;
        Ok(())
    }

    fn handle_event(&mut self, event: InputEvent) -> CapabilityResult<bool> {
        let (kind, a, b) = event.abi();
        let consumed = self
            .module
            .with_store(|store| self.on_event.call(store, (self.handle, kind, a, b)))
            .map_err(|e| self.trap(&e))?;
        Ok(consumed != 0)
    }

    fn teardown(&mut self) -> CapabilityResult<()> {
        let Some(teardown) = &self.teardown else {
            return Ok(());
        };
        self.module
            .with_store(|store| teardown.call(store, self.handle))
            .map_err(|e| self.trap(&e))
    }
}
