//! The persistence collaborator: where layouts come from and where committed
//! tick reports go.

use crate::layout::PlantLayout;
use crate::sim::TickReport;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding tick report failed: {0}")]
    Encode(String),
    #[error("layout unavailable: {0}")]
    Load(String),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// Load/save boundary to storage. The coordinator calls `save_tick_result`
/// once per tick, after every engine has reported and before the tick commits.
pub trait Persistence: Send {
    fn load_graph(&mut self) -> Result<PlantLayout, PersistError>;
    fn save_tick_result(&mut self, report: &TickReport) -> Result<(), PersistError>;
}

/// Keeps everything in memory. Useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub layout: PlantLayout,
    pub reports: Vec<TickReport>,
}

impl MemoryStore {
    pub fn new(layout: PlantLayout) -> Self {
        Self {
            layout,
            reports: Vec::new(),
        }
    }
}

impl Persistence for MemoryStore {
    fn load_graph(&mut self) -> Result<PlantLayout, PersistError> {
        Ok(self.layout.clone())
    }

    fn save_tick_result(&mut self, report: &TickReport) -> Result<(), PersistError> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let layout = PlantLayout {
            materials: vec!["ore".into()],
            ..PlantLayout::default()
        };
        let mut store = MemoryStore::new(layout.clone());
        assert_eq!(store.load_graph().unwrap(), layout);
        store.save_tick_result(&TickReport::new(0)).unwrap();
        store.save_tick_result(&TickReport::new(1)).unwrap();
        assert_eq!(store.reports.len(), 2);
        assert_eq!(store.reports[1].tick, 1);
    }
}
