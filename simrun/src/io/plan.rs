//! Run plan: which subjects to simulate under which configurations.
//!
//! The plan is a JSON document produced by the caller:
//!
//! ```json
//! { "subjects": ["101", "102"], "configs": [ { "name": "L_R", ... } ] }
//! ```
//!
//! Jobs are the subject × configuration cross product in subject-major order,
//! which is also the order they are queued in.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{Job, JobConfig, Placement};
use crate::io::layout::validate_id;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub configs: Vec<JobConfig>,
}

impl RunPlan {
    /// Check ids and parameter sanity. An empty plan is valid.
    pub fn validate(&self) -> Result<()> {
        let mut subjects = BTreeSet::new();
        for subject in &self.subjects {
            validate_id("subject id", subject)?;
            if !subjects.insert(subject.as_str()) {
                bail!("duplicate subject id '{subject}'");
            }
        }
        let mut names = BTreeSet::new();
        for config in &self.configs {
            validate_id("config name", &config.name)?;
            if !names.insert(config.name.as_str()) {
                bail!("duplicate config name '{}'", config.name);
            }
            validate_config(config).with_context(|| format!("config '{}'", config.name))?;
        }
        // Both halves of a job id may contain `_`, so distinct pairs can collide.
        let mut ids = BTreeSet::new();
        for subject in &self.subjects {
            for config in &self.configs {
                let id = Job::id_for(subject, &config.name);
                if !ids.insert(id.clone()) {
                    bail!(
                        "duplicate job id '{id}' (subject '{subject}', config '{}')",
                        config.name
                    );
                }
            }
        }
        Ok(())
    }

    /// Every subject × config pair, subject-major.
    pub fn jobs(&self) -> Vec<Job> {
        self.subjects
            .iter()
            .flat_map(|subject| {
                self.configs
                    .iter()
                    .map(move |config| Job::new(subject, config.clone()))
            })
            .collect()
    }
}

fn validate_config(config: &JobConfig) -> Result<()> {
    if config.currents_ma.is_empty() {
        bail!("currents_ma must not be empty");
    }
    if let Some(current) = config.currents_ma.iter().find(|c| !c.is_finite()) {
        bail!("currents_ma must be finite (got {current})");
    }
    let electrode = &config.electrode;
    if electrode.dimensions_mm.iter().any(|d| !positive(*d)) {
        bail!(
            "electrode dimensions must be > 0 (got {:?})",
            electrode.dimensions_mm
        );
    }
    if !positive(electrode.thickness_mm) {
        bail!(
            "electrode thickness must be > 0 (got {})",
            electrode.thickness_mm
        );
    }
    match &config.placement {
        Placement::Montage { pairs } => {
            if pairs.len() != config.currents_ma.len() {
                return Err(anyhow!(
                    "montage has {} electrode pairs but {} channel currents",
                    pairs.len(),
                    config.currents_ma.len()
                ));
            }
            if let Some(pair) = pairs
                .iter()
                .find(|pair| pair[0].is_empty() || pair[1].is_empty() || pair[0] == pair[1])
            {
                bail!("invalid electrode pair {pair:?}");
            }
        }
        Placement::Mapped { positions } => {
            if positions.is_empty() {
                bail!("mapped placement needs at least one position");
            }
            let mut labels = BTreeSet::new();
            for electrode in positions {
                if electrode.label.is_empty() || !labels.insert(electrode.label.as_str()) {
                    bail!("mapped electrode labels must be unique and non-empty");
                }
                if electrode.position.iter().any(|v| !v.is_finite()) {
                    bail!("electrode {} has a non-finite position", electrode.label);
                }
            }
        }
    }
    Ok(())
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Read and validate a plan file.
pub fn load_plan(path: &Path) -> Result<RunPlan> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let plan: RunPlan =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("invalid plan {}", path.display()))?;
    debug!(
        subjects = plan.subjects.len(),
        configs = plan.configs.len(),
        "loaded plan"
    );
    Ok(plan)
}
