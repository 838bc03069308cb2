//! Simulator error kinds.
//!
//! Three families, with different propagation policies:
//! - `CallError`: errors observable by ops and replicas (injected transport
//!   failures, cancellation, application failures). The first op error ends
//!   the simulation and becomes `Results::err`.
//! - `BuildError`: construction-time failures returned from `Simulator::new`.
//! - `RegisterError`: invalid op registrations; surfaced as a panic because
//!   they are programming errors.

use std::fmt;

/// Error returned by component method invocations and op bodies.
///
/// `RemoteCall` is the distinguished value the scheduler substitutes for a
/// pending call or reply to model transport failure. It compares equal to
/// itself so callers can detect injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Injected remote-call failure.
    RemoteCall,
    /// The simulation was cancelled while the call was in flight.
    Cancelled,
    /// Application-level failure raised by a replica or an op body.
    App(String),
}

impl CallError {
    /// Build an application error from any displayable message.
    pub fn app(message: impl Into<String>) -> CallError {
        CallError::App(message.into())
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::RemoteCall => write!(f, "RemoteCallError"),
            CallError::Cancelled => write!(f, "simulation cancelled"),
            CallError::App(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CallError {}

/// Construction errors returned from `Simulator::new`.
/// No simulation occurs when one of these is produced.
#[derive(Debug)]
pub enum BuildError {
    /// An option that must be strictly positive was zero.
    InvalidOption { option: &'static str },
    /// The configuration document failed to parse.
    ConfigParse { filename: String, message: String },
    /// A component's configuration section could not be deserialized.
    ConfigSection { component: String, message: String },
    /// Two components were registered under the same name.
    DuplicateComponent { component: String },
    /// A fake was supplied for a component that is not registered.
    UnknownFake { component: String },
    /// A handle was requested for a component that is not registered.
    UnknownComponent { component: String },
    /// A component's build closure failed.
    Build { component: String, replica: usize, message: String },
    /// A replica's init hook failed.
    Init { component: String, replica: usize, source: CallError },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InvalidOption { option } => {
                write!(f, "option {} must be strictly positive", option)
            }
            BuildError::ConfigParse { filename, message } => {
                write!(f, "parse config {:?}: {}", filename, message)
            }
            BuildError::ConfigSection { component, message } => {
                write!(f, "config section for component {:?}: {}", component, message)
            }
            BuildError::DuplicateComponent { component } => {
                write!(f, "duplicate registration of component {:?}", component)
            }
            BuildError::UnknownFake { component } => {
                write!(f, "fake supplied for unregistered component {:?}", component)
            }
            BuildError::UnknownComponent { component } => {
                write!(f, "component {:?} not found", component)
            }
            BuildError::Build { component, replica, message } => {
                write!(f, "build component {:?} replica {}: {}", component, replica, message)
            }
            BuildError::Init { component, replica, source } => {
                write!(
                    f,
                    "component {:?} replica {} initialization failed: {}",
                    component, replica, source
                )
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Invalid op registrations. `Simulator::register_op` panics with one of
/// these rendered into the panic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The op name was empty.
    EmptyName,
    /// An op with the same name is already registered.
    DuplicateOp { op: String },
    /// The op declared a dependency on an unregistered component.
    UnknownComponent { op: String, component: String },
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::EmptyName => write!(f, "missing op name"),
            RegisterError::DuplicateOp { op } => {
                write!(f, "duplicate registration of op {:?}", op)
            }
            RegisterError::UnknownComponent { op, component } => {
                write!(f, "op {:?} depends on unregistered component {:?}", op, component)
            }
        }
    }
}

impl std::error::Error for RegisterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_call_error_display_and_equality() {
        assert_eq!(CallError::RemoteCall.to_string(), "RemoteCallError");
        assert_eq!(CallError::RemoteCall, CallError::RemoteCall);
        assert_ne!(CallError::RemoteCall, CallError::Cancelled);
        assert_ne!(CallError::RemoteCall, CallError::app("RemoteCallError"));
    }

    #[test]
    fn test_build_error_messages_name_the_component() {
        let err = BuildError::Init {
            component: "Counter".to_string(),
            replica: 2,
            source: CallError::app("no backing store"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("Counter"));
        assert!(rendered.contains("initialization failed"));
        assert!(rendered.contains("no backing store"));
    }
}
