//! Pipeline files.
//!
//! A pipeline declares a base phase order, extension orders that are
//! zip-merged into it, and per-phase options and handlers:
//!
//! ```toml
//! order = ["initial", "auth", "routes"]
//! extensions = [["initial", "preauth", "auth"]]
//!
//! [phases.auth]
//! parallel = false
//!
//! [[phases.auth.handlers]]
//! sub = "before"
//! action = "log"
//! message = "checking credentials"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use phaseflow_core::{merge, PhaseOptions, Sub, ERROR_PHASE, FINAL_PHASE};
use scheduler::{Phase, PhaseList};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::{Action, ActionHandler};

pub const DEFAULT_CONFIG: &str = "phaseflow.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<Vec<String>>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub parallel: Option<bool>,
    pub fail_fast: Option<bool>,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub sub: Sub,
    #[serde(flatten)]
    pub action: Action,
}

impl PipelineConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The base order with every extension zip-merged into it.
    pub fn phase_order(&self) -> Result<Vec<String>> {
        let mut order = self.order.clone();
        for extension in &self.extensions {
            order = merge(&order, extension)
                .with_context(|| format!("Cannot merge extension {:?}", extension))?;
        }

        for id in self.phases.keys() {
            if !is_reserved(id) && !order.contains(id) {
                bail!("Phase '{}' is configured but not part of the order", id);
            }
        }
        Ok(order)
    }

    /// Build a runnable phase list.
    pub fn build(&self) -> Result<PhaseList> {
        let mut list = PhaseList::new();
        for id in self.phase_order()? {
            let options = self
                .phases
                .get(&id)
                .map(|phase| phase.options(PhaseOptions::default()))
                .unwrap_or_default();
            list.add(Phase::with_options(id, options))?;
        }

        for (id, config) in &self.phases {
            if is_reserved(id) && (config.parallel.is_some() || config.fail_fast.is_some()) {
                bail!("Options of '{}' cannot be changed", id);
            }

            let phase = list
                .find_mut(id)
                .with_context(|| format!("Phase '{}' not found", id))?;
            for (index, handler) in config.handlers.iter().enumerate() {
                let name = format!("{}:{}[{}]", id, handler.sub, index);
                phase.add_handler(handler.sub, ActionHandler::new(name, handler.action.clone()));
            }
        }

        debug!(order = ?list.phase_ids(), "Built pipeline");
        Ok(list)
    }
}

impl PhaseConfig {
    fn options(&self, defaults: PhaseOptions) -> PhaseOptions {
        defaults
            .with_parallel(self.parallel.unwrap_or(defaults.parallel))
            .with_fail_fast(self.fail_fast.unwrap_or(defaults.fail_fast))
    }
}

fn is_reserved(id: &str) -> bool {
    id == ERROR_PHASE || id == FINAL_PHASE
}
