//! The capability contract between the host and loaded code.
//!
//! A [`CapabilityFactory`] is what validation hands out; the host container
//! calls it to obtain a fresh [`Capability`] each time it swaps.

use thiserror::Error;

/// Surface fill used when nothing has painted.
pub const BLANK_FILL: u32 = 0x00FF_FFFF;

/// Errors raised by a capability or factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Guest code trapped.
    #[error("{0}")]
    Trap(String),

    /// The guest does not have the shape a capability requires.
    #[error("not a capability: {0}")]
    Contract(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// Result type alias for capability calls.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Input routed to the hosted capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Pointer click at surface coordinates.
    Click { x: i32, y: i32 },
    /// Key press.
    Key { code: i32 },
    /// The surface changed size.
    Resize { width: i32, height: i32 },
}

impl InputEvent {
    /// `(kind, a, b)` triple passed across the guest boundary.
    #[must_use]
    pub fn abi(self) -> (i32, i32, i32) {
        match self {
            Self::Click { x, y } => (1, x, y),
            Self::Key { code } => (2, code, 0),
            Self::Resize { width, height } => (3, width, height),
        }
    }
}

/// What a paint produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    /// `0xRRGGBB` background.
    pub fill: u32,
    /// Text drawn over the fill, if any.
    pub overlay: Option<String>,
}

impl Surface {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fill: BLANK_FILL,
            overlay: None,
        }
    }

    /// Clear back to a blank surface of the same size.
    pub fn reset(&mut self) {
        self.fill = BLANK_FILL;
        self.overlay = None;
    }
}

/// A live, hosted unit of behaviour.
pub trait Capability: Send {
    /// Name shown by shells, e.g. `widget_a::build`.
    fn display_name(&self) -> &str;

    /// Draw onto `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest faults while painting.
    fn paint(&mut self, surface: &mut Surface) -> CapabilityResult<()>;

    /// Handle an input event. Returns whether the event was consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest faults while handling the event.
    fn handle_event(&mut self, event: InputEvent) -> CapabilityResult<bool>;

    /// Release guest resources. Called once, when the container lets go.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest faults during teardown.
    fn teardown(&mut self) -> CapabilityResult<()> {
        Ok(())
    }
}

/// Builds capabilities from a validated entry point.
pub trait CapabilityFactory: Send + Sync {
    /// Entry point symbol this factory invokes.
    fn entry_point(&self) -> &str;

    /// File the entry point lives in, for diagnostics.
    fn origin(&self) -> &str {
        "<host>"
    }

    /// Invoke the entry point and wrap the result.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Contract`] if the result is not shaped like a
    /// capability, or the guest's own error if the entry point faults.
    fn instantiate(&self) -> CapabilityResult<Box<dyn Capability>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_abi_kinds() {
        assert_eq!(InputEvent::Click { x: 4, y: 9 }.abi(), (1, 4, 9));
        assert_eq!(InputEvent::Key { code: 65 }.abi(), (2, 65, 0));
        assert_eq!(
            InputEvent::Resize {
                width: 640,
                height: 480
            }
            .abi(),
            (3, 640, 480)
        );
    }

    #[test]
    fn test_surface_reset() {
        let mut surface = Surface::new(10, 10);
        surface.fill = 0x12_3456;
        surface.overlay = Some("x".into());
        surface.reset();
        assert_eq!(surface, Surface::new(10, 10));
    }
}
