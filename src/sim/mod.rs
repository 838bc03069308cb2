//! The simulator: options, construction, op registration, and the run loop.
//!
//! A `Simulator` deterministically exercises a component-based application:
//! given a seed it interleaves op execution, call/reply delivery, and
//! injected remote-call failures, and records the full event history.

pub mod proxy;
pub(crate) mod scheduler;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::component::{ComponentDef, Replica};
use crate::errors::{BuildError, CallError, RegisterError};
use crate::event::Event;
use crate::fiber::CancelToken;
use crate::op::{ErasedOp, Op};
use crate::registry::{build_replicas, Registry};
use scheduler::Core;

/// Configuration for a simulator.
pub struct Options {
    /// Sole source of randomness for the run.
    pub seed: i64,
    /// Replicas per component; strictly positive. Ignored for faked
    /// components, which get exactly one replica.
    pub num_replicas: usize,
    /// Total ops to spawn across the run; strictly positive.
    pub num_ops: usize,
    /// Configuration file name, used only in diagnostics.
    pub config_filename: String,
    /// TOML configuration document; when empty, components receive no
    /// configuration section.
    pub config: String,
    /// Fake implementations, keyed by component name. A fake replaces the
    /// whole replica set of its component.
    pub fakes: HashMap<String, Arc<dyn Replica>>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            seed: 0,
            num_replicas: 1,
            num_ops: 1,
            config_filename: String::new(),
            config: String::new(),
            fakes: HashMap::new(),
        }
    }
}

/// The results of running a simulation.
#[derive(Debug)]
pub struct Results {
    /// First non-nil error returned by an op, or `CallError::Cancelled` if
    /// the run was cancelled externally without any op failing. `None` when
    /// every op succeeded.
    pub err: Option<CallError>,
    /// The ordered history of all simulation events.
    pub history: Vec<Event>,
}

impl Results {
    /// Render the history as a Mermaid sequence diagram.
    pub fn mermaid(&self) -> String {
        crate::mermaid::render(&self.history)
    }
}

/// Deterministically simulates a component-based application.
pub struct Simulator {
    core: Arc<Core>,
}

impl Simulator {
    /// Create a simulator over the given component registrations.
    ///
    /// Validates the options, parses the configuration document, and
    /// constructs every component's replica set (a fake replaces the whole
    /// set). Construction failure means no simulation occurs.
    pub fn new(mut opts: Options, components: Vec<ComponentDef>) -> Result<Simulator, BuildError> {
        if opts.num_replicas == 0 {
            return Err(BuildError::InvalidOption { option: "num_replicas" });
        }
        if opts.num_ops == 0 {
            return Err(BuildError::InvalidOption { option: "num_ops" });
        }

        let sections: Option<toml::Table> = if opts.config.is_empty() {
            None
        } else {
            Some(toml::from_str(&opts.config).map_err(|err| BuildError::ConfigParse {
                filename: opts.config_filename.clone(),
                message: err.to_string(),
            })?)
        };

        let fakes = std::mem::take(&mut opts.fakes);
        let registry = Registry::new(&components)?;
        let core = Arc::new(Core::new(opts, registry));
        build_replicas(&core, components, fakes, sections.as_ref())?;
        Ok(Simulator { core })
    }

    /// Register an operation.
    ///
    /// # Panics
    ///
    /// Panics if the op is invalid: empty or duplicate name, or a
    /// dependency on an unregistered component.
    pub fn register_op<T>(&self, op: Op<T>)
    where
        T: fmt::Debug + Send + 'static,
    {
        if let Err(err) = self.try_register_op(op) {
            panic!("register_op: {}", err);
        }
    }

    fn try_register_op<T>(&self, op: Op<T>) -> Result<(), RegisterError>
    where
        T: fmt::Debug + Send + 'static,
    {
        if op.name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        let mut indices = Vec::with_capacity(op.components.len());
        for component in &op.components {
            match self.core.registry.index_of(component) {
                Some(index) => indices.push(index),
                None => {
                    return Err(RegisterError::UnknownComponent {
                        op: op.name.to_string(),
                        component: component.to_string(),
                    })
                }
            }
        }
        let mut ops = self.core.ops.write().unwrap();
        if ops.contains(op.name) {
            return Err(RegisterError::DuplicateOp { op: op.name.to_string() });
        }
        ops.insert(ErasedOp::erase(op, indices));
        Ok(())
    }

    /// The run's cancellation token. Cancelling it from any thread stops the
    /// scheduler from taking further steps and unblocks waiting fibers.
    pub fn cancel_token(&self) -> CancelToken {
        self.core.cancel.clone()
    }

    /// Execute the simulation to completion.
    ///
    /// Returns once every fiber has finished. An op failure cancels the
    /// remaining work and is reported in `Results::err`; the simulator
    /// itself completing is not an error, even when the run found a bug.
    pub fn simulate(&self) -> Results {
        debug!(
            seed = self.core.opts.seed,
            num_ops = self.core.opts.num_ops,
            num_replicas = self.core.opts.num_replicas,
            "starting simulation"
        );
        self.core.step();
        let err = match self.core.group.wait() {
            Some(err) => Some(err),
            None if self.core.cancel.is_cancelled() => Some(CallError::Cancelled),
            None => None,
        };
        let history = self.core.shared.lock().unwrap().history.snapshot();
        debug!(events = history.len(), error = ?err, "simulation finished");
        Results { err, history }
    }
}
