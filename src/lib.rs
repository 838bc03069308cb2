//! detsim: a deterministic simulator for component-based applications.
//!
//! An application is a set of named components (method sets backed by one or
//! more replica implementations) exercised by randomized ops. Given a seed,
//! the simulator interleaves op execution, call and reply delivery, and
//! injected remote-call failures pseudo-randomly but reproducibly, and
//! records a totally-ordered event history for property checking and
//! diagram rendering.

pub mod check;
pub mod component;
pub mod demo;
pub mod errors;
pub mod event;
pub mod fiber;
pub mod mermaid;
pub mod op;
mod registry;
pub mod sim;
pub mod value;

pub use component::{BuildCtx, ComponentDef, MethodResult, Replica, SimContext};
pub use errors::{BuildError, CallError, RegisterError};
pub use event::{Event, History};
pub use fiber::CancelToken;
pub use op::{Op, SimRng};
pub use sim::proxy::Handle;
pub use sim::{Options, Results, Simulator};
pub use value::Value;
