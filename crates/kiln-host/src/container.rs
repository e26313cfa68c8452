//! Crash-isolating host for at most one live capability.
//!
//! Swaps are atomic: the replacement is fully built before the current
//! capability is released, so observers see the old one, then the new one,
//! never an empty gap. Every call into the capability goes through the
//! fault barrier; a fault degrades the container (`has_error`) instead of
//! propagating.
//!
//! Between [`HostContainer::begin_update`] and the end of the returned
//! [`UpdateGuard`], painting shows an updating placeholder, input is ignored
//! and state notices are held back so only the final state is announced.

use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use crate::barrier::{self, Breach};
use crate::capability::{Capability, CapabilityError, CapabilityFactory, InputEvent, Surface};
use crate::error::{Diagnostic, HostError, HostResult, Stage};

/// Surface tint applied while the hosted capability is faulted.
pub const ERROR_TINT: u32 = 0x00FF_F0F0;

/// Overlay shown when nothing is hosted.
pub const PLACEHOLDER_TEXT: &str = "No widget loaded";

/// Overlay shown during an update window.
pub const UPDATING_TEXT: &str = "Updating...";

const OVERLAY_MESSAGE_LIMIT: usize = 50;

/// Identifies one hosted capability instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedInfo {
    pub display_name: String,
    /// Increases by one on every successful swap.
    pub serial: u64,
}

/// Something a shell may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerNotice {
    /// A new capability is live.
    Hosted(HostedInfo),
    /// The container is empty again.
    Cleared,
    /// The live capability faulted and the container is degraded.
    Faulted {
        display_name: String,
        message: String,
    },
    /// A swap failed; the previous capability (if any) is still live.
    InstantiationFailed { diagnostic: String },
}

impl ContainerNotice {
    fn is_state(&self) -> bool {
        matches!(self, Self::Hosted(_) | Self::Cleared)
    }
}

struct Hosted {
    capability: Box<dyn Capability>,
    info: HostedInfo,
    fault: Option<String>,
}

/// Hosts at most one capability.
#[derive(Default)]
pub struct HostContainer {
    current: Option<Hosted>,
    next_serial: u64,
    update_depth: u32,
    held: Vec<ContainerNotice>,
    notices: Vec<ContainerNotice>,
}

impl std::fmt::Debug for HostContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContainer")
            .field("hosted", &self.hosted())
            .field("has_error", &self.has_error())
            .field("updating", &self.is_updating())
            .finish_non_exhaustive()
    }
}

impl HostContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a capability from `factory` and make it the live one.
    ///
    /// The old capability is torn down only after the new one exists; on
    /// failure it stays live and untouched.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Instantiation`] if the factory fails, panics or
    /// yields something that is not a capability.
    pub fn swap(&mut self, factory: &dyn CapabilityFactory) -> HostResult<HostedInfo> {
        let capability = match barrier::contain(|| factory.instantiate()) {
            Ok(capability) => capability,
            Err(breach) => {
                let message = match breach {
                    Breach::Failed(CapabilityError::Contract(msg)) => {
                        format!("entry point `{}` did not yield a capability: {msg}", factory.entry_point())
                    },
                    Breach::Failed(e) => format!("entry point `{}` failed: {e}", factory.entry_point()),
                    Breach::Panicked(msg) => {
                        format!("entry point `{}` panicked: {msg}", factory.entry_point())
                    },
                };
                let diagnostic = Diagnostic::new(Stage::Instantiation, factory.origin(), message);
                warn!(entry_point = %factory.entry_point(), "Instantiation failed: {diagnostic}");
                self.notify(ContainerNotice::InstantiationFailed {
                    diagnostic: diagnostic.to_string(),
                });
                return Err(HostError::Instantiation(diagnostic));
            },
        };

        let serial = self.next_serial;
        self.next_serial = self.next_serial.saturating_add(1);
        let info = HostedInfo {
            display_name: capability.display_name().to_string(),
            serial,
        };
        let replacement = Hosted {
            capability,
            info: info.clone(),
            fault: None,
        };
        if let Some(previous) = self.current.replace(replacement) {
            release(previous);
        }
        info!(capability = %info.display_name, serial, "Capability hosted");
        self.notify(ContainerNotice::Hosted(info.clone()));
        Ok(info)
    }

    /// Release the live capability, if any.
    pub fn clear(&mut self) {
        if let Some(previous) = self.current.take() {
            release(previous);
            self.notify(ContainerNotice::Cleared);
        }
    }

    /// Open an update window; it closes when the guard drops.
    pub fn begin_update(&mut self) -> UpdateGuard<'_> {
        self.update_depth = self.update_depth.saturating_add(1);
        UpdateGuard { container: self }
    }

    fn end_update(&mut self) {
        self.update_depth = self.update_depth.saturating_sub(1);
        if self.update_depth > 0 {
            return;
        }
        let held = std::mem::take(&mut self.held);
        let mut final_state = None;
        for notice in held {
            if notice.is_state() {
                final_state = Some(notice);
            } else {
                self.notices.push(notice);
            }
        }
        self.notices.extend(final_state);
    }

    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.update_depth > 0
    }

    /// Paint the live capability onto `surface`.
    pub fn paint(&mut self, surface: &mut Surface) {
        surface.reset();
        if self.is_updating() {
            surface.overlay = Some(UPDATING_TEXT.to_string());
            return;
        }
        let Some(hosted) = self.current.as_mut() else {
            surface.overlay = Some(PLACEHOLDER_TEXT.to_string());
            return;
        };
        let outcome = barrier::contain(|| hosted.capability.paint(surface));
        if let Err(breach) = outcome {
            let message = breach.to_string();
            surface.reset();
            surface.fill = ERROR_TINT;
            surface.overlay = Some(format!(
                "Paint Error: {}...",
                truncate(&message, OVERLAY_MESSAGE_LIMIT)
            ));
            self.record_fault("paint", message);
        }
    }

    /// Route `event` to the live capability. Returns whether it was consumed.
    ///
    /// Ignored during an update window and while empty.
    pub fn dispatch(&mut self, event: InputEvent) -> bool {
        if self.is_updating() {
            debug!(?event, "Input ignored during update");
            return false;
        }
        let Some(hosted) = self.current.as_mut() else {
            return false;
        };
        match barrier::contain(|| hosted.capability.handle_event(event)) {
            Ok(consumed) => consumed,
            Err(breach) => {
                self.record_fault("input", breach.to_string());
                true
            },
        }
    }

    fn record_fault(&mut self, during: &str, message: String) {
        let Some(hosted) = self.current.as_mut() else {
            return;
        };
        let diagnostic = Diagnostic::new(
            Stage::Runtime,
            hosted.info.display_name.clone(),
            format!("{during} failed: {message}"),
        );
        warn!(capability = %hosted.info.display_name, "Runtime fault: {diagnostic}");
        let display_name = hosted.info.display_name.clone();
        hosted.fault = Some(message.clone());
        self.notify(ContainerNotice::Faulted {
            display_name,
            message,
        });
    }

    /// The live capability, if any.
    #[must_use]
    pub fn hosted(&self) -> Option<HostedInfo> {
        self.current.as_ref().map(|h| h.info.clone())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Whether the live capability has faulted since it was hosted.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.current.as_ref().is_some_and(|h| h.fault.is_some())
    }

    /// Message of the most recent fault of the live capability.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.current.as_ref()?.fault.as_deref()
    }

    /// Drain notices accumulated outside update windows.
    pub fn take_notices(&mut self) -> Vec<ContainerNotice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, notice: ContainerNotice) {
        if self.is_updating() {
            self.held.push(notice);
        } else {
            self.notices.push(notice);
        }
    }
}

impl Drop for HostContainer {
    fn drop(&mut self) {
        if let Some(previous) = self.current.take() {
            release(previous);
        }
    }
}

fn release(mut hosted: Hosted) {
    let name = hosted.info.display_name.clone();
    match barrier::contain(|| hosted.capability.teardown()) {
        Ok(()) => debug!(capability = %name, "Capability released"),
        Err(breach) => warn!(capability = %name, "Teardown failed: {breach}"),
    }
}

fn truncate(message: &str, limit: usize) -> &str {
    match message.char_indices().nth(limit) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

/// An open update window on a [`HostContainer`].
pub struct UpdateGuard<'a> {
    container: &'a mut HostContainer,
}

impl Deref for UpdateGuard<'_> {
    type Target = HostContainer;

    fn deref(&self) -> &HostContainer {
        self.container
    }
}

impl DerefMut for UpdateGuard<'_> {
    fn deref_mut(&mut self) -> &mut HostContainer {
        self.container
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.container.end_update();
    }
}
