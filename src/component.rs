//! Component contracts: replicas, definitions, and invocation context.
//!
//! A component is a named method set backed by one or more replica
//! implementations. The simulator never sees typed signatures; replicas
//! dispatch on the method name and a dynamic argument vector, and the
//! per-interface typed wrappers (when a user wants them) live on top of
//! [`Handle::call`](crate::sim::proxy::Handle::call).

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::errors::{BuildError, CallError};
use crate::fiber::CancelToken;
use crate::sim::proxy::Handle;
use crate::sim::scheduler::Core;
use crate::value::Value;

/// Outcome of a method invocation: the non-error return values, or the
/// method's error return.
pub type MethodResult = Result<Vec<Value>, CallError>;

/// Per-invocation context passed to op bodies and replica methods.
///
/// Carries the trace id of the originating op (which proxies recover when
/// minting nested calls) and the span id of the enclosing op or call.
#[derive(Clone)]
pub struct SimContext {
    trace_id: u64,
    span_id: u64,
    cancel: CancelToken,
}

impl SimContext {
    pub(crate) fn new(trace_id: u64, span_id: u64, cancel: CancelToken) -> SimContext {
        SimContext { trace_id, span_id, cancel }
    }

    /// Trace id of the op this invocation belongs to. 0 outside any op
    /// (e.g. during replica initialization).
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// Span id of the enclosing op start or method call.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Whether the simulation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One instance of a component's implementation.
///
/// Replicas are shared among fibers; the simulator does not serialize
/// invocations, so two deliveries to the same replica may run concurrently
/// and implementations must guard their own state.
pub trait Replica: Send + Sync + 'static {
    /// Dispatch a named method with a dynamic argument vector.
    fn invoke(&self, cx: &SimContext, method: &str, args: &[Value]) -> MethodResult;

    /// Post-construction hook. A failure aborts simulator construction.
    fn init(&self, _cx: &SimContext) -> Result<(), CallError> {
        Ok(())
    }
}

/// Builds one replica of a component.
pub type BuildFn = Box<dyn Fn(&BuildCtx<'_>) -> Result<Arc<dyn Replica>, BuildError> + Send + Sync>;

/// Registration record for a component: a stable name, the method set the
/// proxies will accept, and a constructor for replica instances.
pub struct ComponentDef {
    /// Stable component name, unique within a simulator.
    pub name: &'static str,
    /// Methods callable through handles to this component.
    pub methods: &'static [&'static str],
    /// Replica constructor, invoked once per replica (or not at all when a
    /// fake is installed for this component).
    pub build: BuildFn,
}

/// Construction context handed to a component's build closure.
///
/// Exposes the component's configuration section and outgoing handles to
/// other registered components, wired with this replica's identity.
pub struct BuildCtx<'a> {
    core: &'a Arc<Core>,
    component: &'a str,
    replica: usize,
    section: Option<&'a toml::Value>,
}

impl<'a> BuildCtx<'a> {
    pub(crate) fn new(
        core: &'a Arc<Core>,
        component: &'a str,
        replica: usize,
        section: Option<&'a toml::Value>,
    ) -> BuildCtx<'a> {
        BuildCtx { core, component, replica, section }
    }

    /// Name of the component being built.
    pub fn component(&self) -> &str {
        self.component
    }

    /// Index of the replica being built.
    pub fn replica(&self) -> usize {
        self.replica
    }

    /// Deserialize this component's configuration section, if the simulator
    /// was given a configuration document containing one.
    pub fn config_section<T: DeserializeOwned>(&self) -> Result<Option<T>, BuildError> {
        match self.section {
            None => Ok(None),
            Some(value) => value.clone().try_into().map(Some).map_err(|err| {
                BuildError::ConfigSection {
                    component: self.component.to_string(),
                    message: err.to_string(),
                }
            }),
        }
    }

    /// A handle to another registered component, with this replica recorded
    /// as the caller.
    pub fn handle(&self, component: &str) -> Result<Handle, BuildError> {
        self.core.handle_for(component, self.component, self.replica as u64)
    }

    /// A build failure attributed to this component and replica.
    pub fn fail(&self, message: impl Into<String>) -> BuildError {
        BuildError::Build {
            component: self.component.to_string(),
            replica: self.replica,
            message: message.into(),
        }
    }
}
