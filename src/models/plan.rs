//! Execution-plan input model.
//!
//! The plan is computed by an external collaborator and consumed here as an
//! ordered set of phases; this crate never decides *what order* features
//! should be worked, only drives the sessions the plan calls for.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// One unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Stable item identifier (feature/task id).
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Git branch the work lands on; derived from the id when absent.
    #[serde(default)]
    pub branch: Option<String>,
    /// Ids of items that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// The prompt sent to the agent session for this item.
    pub prompt: String,
}

impl WorkItem {
    /// The branch to work on, falling back to a `feature/<id>` convention.
    #[must_use]
    pub fn branch_name(&self) -> String {
        self.branch
            .clone()
            .unwrap_or_else(|| format!("feature/{}", self.id))
    }
}

/// An ordered group of items; `parallel` groups run one session per item
/// concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanPhase {
    /// Phase label (display only).
    pub name: String,
    /// Whether the phase's items may run concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// Work items in execution order.
    pub items: Vec<WorkItem>,
}

/// The full externally computed plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Phases in execution order.
    pub phases: Vec<PlanPhase>,
}

impl ExecutionPlan {
    /// Parse a plan from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] (invalid kind, key `execution_plan`)
    /// when the JSON does not match the plan schema.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let plan: Self = serde_json::from_str(raw).map_err(|e| {
            AppError::config_invalid("execution_plan", format!("invalid execution plan: {e}"))
        })?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load and parse a plan file.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when the file cannot be read, plus the
    /// parse/validation failures of [`ExecutionPlan::from_json_str`].
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Io(format!(
                "failed to read plan {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Total number of work items across all phases.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        let count: usize = self.phases.iter().map(|p| p.items.len()).sum();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Iterate all items in plan order.
    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.phases.iter().flat_map(|p| p.items.iter())
    }

    /// Check structural invariants: at least one item, unique item ids, and
    /// every dependency resolvable to an item that appears earlier in the
    /// plan.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] (invalid kind) describing the first
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        if self.total_items() == 0 {
            return Err(AppError::config_invalid(
                "execution_plan",
                "execution plan contains no work items",
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for item in self.items() {
            if !seen.insert(item.id.as_str()) {
                return Err(AppError::config_invalid(
                    "execution_plan",
                    format!("duplicate work item id `{}`", item.id),
                ));
            }
            for dep in &item.depends_on {
                if !seen.contains(dep.as_str()) && dep != &item.id {
                    // Dependencies must appear earlier in plan order; a
                    // forward or dangling reference is unsatisfiable.
                    return Err(AppError::config_invalid(
                        "execution_plan",
                        format!(
                            "item `{}` depends on `{dep}`, which does not appear earlier in the plan",
                            item.id
                        ),
                    ));
                }
            }
            if item.depends_on.iter().any(|dep| dep == &item.id) {
                return Err(AppError::config_invalid(
                    "execution_plan",
                    format!("item `{}` depends on itself", item.id),
                ));
            }
        }

        Ok(())
    }
}
