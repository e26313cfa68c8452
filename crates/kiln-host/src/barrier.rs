//! Fault barrier around every call into hosted code.
//!
//! Guest failures arrive either as returned errors or as panics unwinding
//! through host glue. Both are converted into a [`Breach`] so the caller can
//! record them without the process going down.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// How a barrier-wrapped call failed.
#[derive(Debug)]
pub enum Breach<E> {
    /// The call returned an error.
    Failed(E),
    /// The call panicked; carries the panic payload as text.
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for Breach<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Run `call`, converting both errors and panics into a [`Breach`].
///
/// # Errors
///
/// Returns [`Breach::Failed`] with the call's own error, or
/// [`Breach::Panicked`] if it unwound.
pub fn contain<T, E>(call: impl FnOnce() -> Result<T, E>) -> Result<T, Breach<E>> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Breach::Failed(e)),
        Err(payload) => Err(Breach::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_passes_values_through() {
        let out: Result<u32, Breach<String>> = contain(|| Ok(7));
        assert_eq!(out.unwrap(), 7);
    }

    #[test]
    fn test_contain_keeps_error() {
        let out: Result<(), Breach<&str>> = contain(|| Err("nope"));
        assert!(matches!(out, Err(Breach::Failed("nope"))));
    }

    #[test]
    fn test_contain_catches_panics() {
        let out: Result<(), Breach<String>> = contain(|| panic!("boom {}", 42));
        match out {
            Err(Breach::Panicked(msg)) => assert_eq!(msg, "boom 42"),
            other => panic!("expected panic breach, got {other:?}"),
        }
    }

    #[test]
    fn test_breach_display() {
        assert_eq!(Breach::<String>::Panicked("x".into()).to_string(), "panicked: x");
        assert_eq!(Breach::Failed("bad").to_string(), "bad");
    }
}
