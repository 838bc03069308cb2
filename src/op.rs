//! Randomized user operations.
//!
//! An `Op<T>` pairs a deterministic generator with a body that exercises
//! components through handles. Registration erases the `T`: the stored form
//! is a closure that, run under the scheduler lock, draws from the shared
//! RNG and yields a one-shot body capturing the generated value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::component::SimContext;
use crate::errors::CallError;
use crate::sim::proxy::Handle;

/// The simulation RNG. A seeded ChaCha stream, so the same seed produces
/// the same draws on every platform.
pub type SimRng = ChaCha8Rng;

/// A randomized operation performed as part of a simulation.
///
/// `gen` must be deterministic: the same RNG state must produce the same
/// value. `body` receives the invocation context, the generated value, and
/// one handle per component named in `components`, in declaration order.
/// A simulation fails if any op body returns an error.
pub struct Op<T> {
    /// Unique, non-empty op name.
    pub name: &'static str,
    /// Generates a pseudo-random instance of `T` from the simulation RNG.
    pub gen: Box<dyn Fn(&mut SimRng) -> T + Send + Sync>,
    /// The operation body.
    pub body: Box<dyn Fn(&SimContext, T, &[Handle]) -> Result<(), CallError> + Send + Sync>,
    /// Registered component names the body depends on.
    pub components: Vec<&'static str>,
}

/// An `Op<T>` with the `T` erased, ready for storage in the op set.
pub(crate) struct ErasedOp {
    pub name: String,
    /// Resolved component indices, in declaration order.
    pub components: Vec<usize>,
    make: Box<dyn Fn(&mut SimRng) -> PreparedOp + Send + Sync>,
}

/// A generated invocation: the stringified value for the `OpStart` event and
/// a one-shot body capturing it.
pub(crate) struct PreparedOp {
    pub args: String,
    pub body: Box<dyn FnOnce(&SimContext, &[Handle]) -> Result<(), CallError> + Send>,
}

impl ErasedOp {
    pub fn erase<T>(op: Op<T>, components: Vec<usize>) -> ErasedOp
    where
        T: fmt::Debug + Send + 'static,
    {
        let Op { name, gen, body, .. } = op;
        let body: Arc<dyn Fn(&SimContext, T, &[Handle]) -> Result<(), CallError> + Send + Sync> =
            Arc::from(body);
        ErasedOp {
            name: name.to_string(),
            components,
            make: Box::new(move |rng| {
                let value = gen(rng);
                let args = format!("{:?}", value);
                let body = Arc::clone(&body);
                PreparedOp {
                    args,
                    body: Box::new(move |cx, handles| body(cx, value, handles)),
                }
            }),
        }
    }

    /// Run the generator against the simulation RNG. Must be called under
    /// the scheduler lock.
    pub fn prepare(&self, rng: &mut SimRng) -> PreparedOp {
        (self.make)(rng)
    }
}

/// Registered ops, materialized into an insertion-ordered sequence so that
/// selection depends only on the RNG state, never on map iteration order.
pub(crate) struct OpSet {
    ops: Vec<Arc<ErasedOp>>,
    by_name: HashMap<String, usize>,
}

impl OpSet {
    pub fn new() -> OpSet {
        OpSet { ops: Vec::new(), by_name: HashMap::new() }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn insert(&mut self, op: ErasedOp) {
        self.by_name.insert(op.name.clone(), self.ops.len());
        self.ops.push(Arc::new(op));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Pick an op uniformly at random.
    pub fn pick(&self, rng: &mut SimRng) -> Arc<ErasedOp> {
        let index = rng.gen_range(0..self.ops.len());
        Arc::clone(&self.ops[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn noop_op(name: &'static str) -> ErasedOp {
        let op: Op<u8> = Op {
            name,
            gen: Box::new(|rng| rng.gen_range(0..10)),
            body: Box::new(|_, _, _| Ok(())),
            components: Vec::new(),
        };
        ErasedOp::erase(op, Vec::new())
    }

    #[test]
    fn test_pick_is_deterministic_per_seed() {
        let mut set = OpSet::new();
        for name in ["a", "b", "c", "d"] {
            set.insert(noop_op(name));
        }

        let picks = |seed: u64| -> Vec<String> {
            let mut rng = SimRng::seed_from_u64(seed);
            (0..8).map(|_| set.pick(&mut rng).name.clone()).collect()
        };
        assert_eq!(picks(7), picks(7));
    }

    #[test]
    fn test_prepare_renders_generated_value() {
        let set = {
            let mut set = OpSet::new();
            set.insert(noop_op("only"));
            set
        };
        let mut rng = SimRng::seed_from_u64(1);
        let op = set.pick(&mut rng);
        let prepared = op.prepare(&mut rng);
        // Debug rendering of a u8 in 0..10.
        let n: u8 = prepared.args.parse().unwrap();
        assert!(n < 10);
    }
}
