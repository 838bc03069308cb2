//! Component registry: schemas and replica sets.
//!
//! The registry is populated in two phases. Schemas are indexed up front so
//! handles can be created while replicas are still being constructed (a
//! replica's outgoing references may point at components built later);
//! replica sets are installed as construction completes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::component::{BuildCtx, ComponentDef, Replica, SimContext};
use crate::errors::BuildError;
use crate::sim::scheduler::Core;

/// Schema of one registered component.
pub(crate) struct ComponentSpec {
    pub name: String,
    pub methods: Vec<String>,
}

/// Component interface table plus the constructed replica sets.
pub(crate) struct Registry {
    specs: Vec<ComponentSpec>,
    by_name: HashMap<String, usize>,
    replicas: RwLock<Vec<Vec<Arc<dyn Replica>>>>,
}

impl Registry {
    /// Index the component schemas. Replica sets start empty and are filled
    /// by [`build_replicas`].
    pub fn new(defs: &[ComponentDef]) -> Result<Registry, BuildError> {
        let mut specs = Vec::with_capacity(defs.len());
        let mut by_name = HashMap::with_capacity(defs.len());
        for (index, def) in defs.iter().enumerate() {
            if by_name.insert(def.name.to_string(), index).is_some() {
                return Err(BuildError::DuplicateComponent { component: def.name.to_string() });
            }
            specs.push(ComponentSpec {
                name: def.name.to_string(),
                methods: def.methods.iter().map(|m| m.to_string()).collect(),
            });
        }
        let sets = vec![Vec::new(); defs.len()];
        Ok(Registry { specs, by_name, replicas: RwLock::new(sets) })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn spec(&self, index: usize) -> &ComponentSpec {
        &self.specs[index]
    }

    pub fn replica_count(&self, index: usize) -> usize {
        self.replicas.read().unwrap()[index].len()
    }

    pub fn replica(&self, index: usize, replica: usize) -> Arc<dyn Replica> {
        Arc::clone(&self.replicas.read().unwrap()[index][replica])
    }

    fn install(&self, index: usize, set: Vec<Arc<dyn Replica>>) {
        self.replicas.write().unwrap()[index] = set;
    }
}

/// Construct every component's replica set: either the user-supplied fake
/// (installed alone, uninitialized) or `num_replicas` fresh instances, each
/// configured, wired, and initialized.
pub(crate) fn build_replicas(
    core: &Arc<Core>,
    defs: Vec<ComponentDef>,
    fakes: HashMap<String, Arc<dyn Replica>>,
    sections: Option<&toml::Table>,
) -> Result<(), BuildError> {
    for name in fakes.keys() {
        if core.registry.index_of(name).is_none() {
            return Err(BuildError::UnknownFake { component: name.clone() });
        }
    }

    for (index, def) in defs.into_iter().enumerate() {
        if let Some(fake) = fakes.get(def.name) {
            debug!(component = def.name, "installing fake replica");
            core.registry.install(index, vec![Arc::clone(fake)]);
            continue;
        }

        let section = sections.and_then(|table| table.get(def.name));
        let mut set: Vec<Arc<dyn Replica>> = Vec::with_capacity(core.opts.num_replicas);
        for replica in 0..core.opts.num_replicas {
            let cx = BuildCtx::new(core, def.name, replica, section);
            let instance = (def.build)(&cx)?;
            let init_cx = SimContext::new(0, 0, core.cancel.clone());
            instance.init(&init_cx).map_err(|err| BuildError::Init {
                component: def.name.to_string(),
                replica,
                source: err,
            })?;
            set.push(instance);
        }
        core.registry.install(index, set);
    }
    Ok(())
}
