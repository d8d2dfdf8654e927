//! Plant context: locations, worker roles and resources.
//!
//! Resources are informational. They can be queried by location or by the
//! step they serve, but they never gate production.

use crate::id::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRole {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub role: Option<WorkerRoleId>,
}

/// A resource is exactly one of a machine or a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Machine(Machine),
    Worker(Worker),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub location: Option<LocationId>,
    pub process_step: Option<ProcessStepId>,
    pub kind: ResourceKind,
}

impl Resource {
    pub fn is_machine(&self) -> bool {
        matches!(self.kind, ResourceKind::Machine(_))
    }

    pub fn role(&self) -> Option<WorkerRoleId> {
        match &self.kind {
            ResourceKind::Worker(worker) => worker.role,
            ResourceKind::Machine(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn worker_exposes_role() {
        let mut roles: SlotMap<WorkerRoleId, WorkerRole> = SlotMap::with_key();
        let operator = roles.insert(WorkerRole {
            name: "operator".into(),
        });
        let worker = Resource {
            name: "alice".into(),
            location: None,
            process_step: None,
            kind: ResourceKind::Worker(Worker {
                role: Some(operator),
            }),
        };
        assert!(!worker.is_machine());
        assert_eq!(worker.role(), Some(operator));
    }

    #[test]
    fn machine_has_no_role() {
        let press = Resource {
            name: "press-1".into(),
            location: None,
            process_step: None,
            kind: ResourceKind::Machine(Machine { model: None }),
        };
        assert!(press.is_machine());
        assert_eq!(press.role(), None);
    }
}
