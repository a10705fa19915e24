use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryEntry {
    pub entity_type: String,
    pub handler: String,
    pub id: String,
}

impl HistoryEntry {
    pub fn new(entity_type: &str, handler: &str, id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            handler: handler.to_string(),
            id: id.to_string(),
        }
    }
}

/// Handlers that already ran in one session, including nested operations
/// started from deferred work. A forced handler that appears here is not
/// forced again.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    entries: HashSet<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the entry was already present.
    pub fn record(&mut self, entity_type: &str, handler: &str, id: &str) -> bool {
        self.entries.insert(HistoryEntry::new(entity_type, handler, id))
    }

    pub fn contains(&self, entity_type: &str, handler: &str, id: &str) -> bool {
        self.entries
            .contains(&HistoryEntry::new(entity_type, handler, id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
