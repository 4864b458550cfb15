//! Dependency resolution using a depth-first walk
//!
//! Produces the order in which add-ins must be loaded so that every
//! dependency precedes its dependents. Already loaded add-ins end the walk.
//! Optional modules are resolved on a scratch copy of the walk state and
//! dropped from the plan when their dependencies cannot be satisfied.

use crate::error::{EngineError, Result};
use semver::{Version, VersionReq};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use trellis_core::types::{AddinDependency, AddinDescription};
use trellis_core::AddinRegistry;

/// One add-in to load, with the optional modules that resolved
#[derive(Debug, Clone)]
pub(crate) struct LoadStep {
    pub addin: Arc<AddinDescription>,
    pub optional_modules: Vec<usize>,
}

#[derive(Clone, Default)]
struct Walk {
    plan: Vec<LoadStep>,
    seen: HashSet<String>,
    visiting: Vec<String>,
}

pub(crate) struct DependencyResolver<'a> {
    registry: &'a dyn AddinRegistry,
    check_versions: bool,
    is_enabled: &'a dyn Fn(&str) -> bool,
    is_loaded: &'a dyn Fn(&str) -> bool,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(
        registry: &'a dyn AddinRegistry,
        check_versions: bool,
        is_enabled: &'a dyn Fn(&str) -> bool,
        is_loaded: &'a dyn Fn(&str) -> bool,
    ) -> Self {
        Self {
            registry,
            check_versions,
            is_enabled,
            is_loaded,
        }
    }

    /// Resolve the load plan for `addin_id`, dependencies first
    pub fn resolve(&self, addin_id: &str) -> Result<Vec<LoadStep>> {
        let addin = self
            .registry
            .get_addin(addin_id)
            .ok_or_else(|| EngineError::UnknownAddin {
                id: addin_id.to_string(),
            })?;
        if !(self.is_enabled)(addin_id) {
            return Err(EngineError::AddinDisabled {
                id: addin_id.to_string(),
            });
        }

        let mut walk = Walk::default();
        self.visit(&addin, &mut walk)?;
        Ok(walk.plan)
    }

    fn visit(&self, addin: &Arc<AddinDescription>, walk: &mut Walk) -> Result<()> {
        // Cycle detection
        if let Some(start) = walk.visiting.iter().position(|id| *id == addin.id) {
            let mut chain = walk.visiting[start..].to_vec();
            chain.push(addin.id.clone());
            return Err(EngineError::CyclicDependency {
                chain: chain.join(" -> "),
            });
        }

        // Already planned
        if walk.seen.contains(&addin.id) {
            return Ok(());
        }

        walk.visiting.push(addin.id.clone());

        for dependency in &addin.main_module.dependencies {
            self.visit_dependency(addin, dependency, walk)?;
        }

        let mut optional_modules = Vec::new();
        for (index, module) in addin.optional_modules.iter().enumerate() {
            let mut scratch = walk.clone();
            let resolved = module
                .dependencies
                .iter()
                .try_for_each(|dependency| self.visit_dependency(addin, dependency, &mut scratch));
            match resolved {
                Ok(()) => {
                    *walk = scratch;
                    optional_modules.push(index);
                }
                // A cycle is an error in the add-in graph, not an
                // unsatisfied optional dependency
                Err(e @ EngineError::CyclicDependency { .. }) => return Err(e),
                Err(e) => debug!(
                    "Skipping optional module {} of add-in {}: {}",
                    index, addin.id, e
                ),
            }
        }

        walk.visiting.pop();
        walk.seen.insert(addin.id.clone());
        walk.plan.push(LoadStep {
            addin: addin.clone(),
            optional_modules,
        });
        Ok(())
    }

    fn visit_dependency(
        &self,
        addin: &AddinDescription,
        dependency: &AddinDependency,
        walk: &mut Walk,
    ) -> Result<()> {
        let target = self
            .registry
            .get_addin(&dependency.addin_id)
            .filter(|_| (self.is_enabled)(&dependency.addin_id))
            .ok_or_else(|| EngineError::missing_dependency(&addin.id, &dependency.addin_id))?;

        if self.check_versions {
            if let Some(requirement) = &dependency.version {
                check_version(addin, dependency, requirement, &target.version)?;
            }
        }

        if (self.is_loaded)(&target.id) {
            return Ok(());
        }
        self.visit(&target, walk)
    }
}

fn check_version(
    addin: &AddinDescription,
    dependency: &AddinDependency,
    requirement: &str,
    found: &str,
) -> Result<()> {
    let incompatible = || EngineError::IncompatibleVersion {
        addin: addin.id.clone(),
        dependency: dependency.addin_id.clone(),
        required: requirement.to_string(),
        found: found.to_string(),
    };
    let requirement = VersionReq::parse(requirement).map_err(|_| incompatible())?;
    let version = Version::parse(found).map_err(|_| incompatible())?;
    if requirement.matches(&version) {
        Ok(())
    } else {
        Err(incompatible())
    }
}
