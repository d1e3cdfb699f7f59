use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    InProgress,
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Idle,
    Running,
    Recovered,
    ManualInterventionRequired,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStepOutcome {
    pub step: String,
    pub status: StepStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeRecoveryRecord {
    pub node: String,
    pub overall: OverallStatus,
    pub last_update: DateTime<Utc>,
    pub steps: BTreeMap<String, RecoveryStepOutcome>,
}

/// Process-local, in-memory record of every node's latest recovery state.
/// Backed by a `BTreeMap` so a snapshot is always returned sorted by node
/// name, with no separate sort step needed at the `/node-states` handler.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<BTreeMap<String, NodeRecoveryRecord>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: &str, step: &str, status: StepStatus, overall: OverallStatus) {
        let now = Utc::now();
        let mut map = self.inner.lock().unwrap();
        let record = map.entry(node.to_string()).or_insert_with(|| NodeRecoveryRecord {
            node: node.to_string(),
            overall,
            last_update: now,
            steps: BTreeMap::new(),
        });
        record.overall = overall;
        record.last_update = now;
        record.steps.insert(
            step.to_string(),
            RecoveryStepOutcome {
                step: step.to_string(),
                status,
                at: now,
            },
        );
    }

    pub fn snapshot(&self) -> Vec<NodeRecoveryRecord> {
        self.inner.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_by_node_name() {
        let registry = Registry::new();
        registry.record("z-node", "initial_check", StepStatus::Skipped, OverallStatus::Idle);
        registry.record("a-node", "initial_check", StepStatus::Skipped, OverallStatus::Idle);
        registry.record("m-node", "initial_check", StepStatus::Skipped, OverallStatus::Idle);

        let names: Vec<_> = registry.snapshot().into_iter().map(|r| r.node).collect();
        assert_eq!(names, vec!["a-node", "m-node", "z-node"]);
    }

    #[test]
    fn later_steps_for_the_same_node_accumulate_rather_than_replace() {
        let registry = Registry::new();
        registry.record("node-a", "ssh_and_reboot", StepStatus::InProgress, OverallStatus::Running);
        registry.record("node-a", "ssh_and_reboot", StepStatus::Failure, OverallStatus::Running);
        registry.record("node-a", "hard_reboot", StepStatus::InProgress, OverallStatus::Running);

        let snapshot = registry.snapshot();
        let record = snapshot.iter().find(|r| r.node == "node-a").unwrap();
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps["ssh_and_reboot"].status, StepStatus::Failure);
        assert_eq!(record.steps["hard_reboot"].status, StepStatus::InProgress);
    }
}
