//! Error types surfaced by the capability traits.
//!
//! Kernel-internal failures (clock, configuration, action tables) live in
//! `runway-engine`; the types here are the ones a controller or an event
//! handler written outside the kernel needs to construct.

/// Errors a [`Controller`](crate::Controller) can report from `start()`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// The controller's worker could not be brought up.
    #[error("controller '{name}' failed to start: {reason}")]
    StartFailed {
        /// Name of the controller.
        name: String,
        /// Human-readable cause.
        reason: String,
    },
    /// No controller with this name is managed.
    #[error("no controller named '{name}'")]
    Unknown {
        /// The name that was looked up.
        name: String,
    },
}

/// Failure of an event-bus subscriber or a dispatched work item.
///
/// Handlers return this instead of unwinding; the bus and the dispatcher
/// count it against the event and keep going.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("handler for '{event}' failed: {reason}")]
    Failed {
        /// Event being handled.
        event: String,
        /// Human-readable cause.
        reason: String,
    },
    /// The handler panicked; the panic was caught at the call site.
    #[error("handler for '{event}' panicked: {message}")]
    Panicked {
        /// Event being handled.
        event: String,
        /// Panic payload, if it was a string.
        message: String,
    },
    /// A controller operation inside the handler failed.
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`].
    pub fn failed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`HandlerError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(event: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked {
            event: event.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_str_is_captured() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let err = HandlerError::from_panic("EV", payload.as_ref());
        assert_eq!(
            err,
            HandlerError::Panicked {
                event: "EV".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn panic_payload_string_is_captured() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("formatted 3"));
        let err = HandlerError::from_panic("EV", payload.as_ref());
        assert!(err.to_string().contains("formatted 3"));
    }

    #[test]
    fn controller_error_converts_transparently() {
        let err: HandlerError = ControllerError::Unknown {
            name: "brake".into(),
        }
        .into();
        assert_eq!(err.to_string(), "no controller named 'brake'");
    }
}
