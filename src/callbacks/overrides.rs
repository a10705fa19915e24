use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Caller-supplied selector for a handler to skip or force.
///
/// Unset selectors match anything: a specifier with no `entity_type`
/// applies to every entity type, no `handler` to every handler and no `ids`
/// to every record. A `once` specifier fires at most once per record id
/// within one session, so a bulk save consumes it independently per record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSpecifier {
    pub entity_type: Option<String>,
    pub handler: Option<String>,
    pub ids: Option<BTreeSet<String>>,
    pub once: bool,
    #[serde(skip)]
    consumed: HashSet<String>,
}

impl CallbackSpecifier {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn handler(name: impl Into<String>) -> Self {
        Self {
            handler: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn for_entity(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn for_id(mut self, id: impl Into<String>) -> Self {
        self.ids.get_or_insert_with(BTreeSet::new).insert(id.into());
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Whether this specifier selects the handler, ignoring consumption.
    pub fn selects(&self, entity_type: &str, handler: &str, id: &str) -> bool {
        self.entity_type.as_deref().is_none_or(|e| e == entity_type)
            && self.handler.as_deref().is_none_or(|h| h == handler)
            && self.ids.as_ref().is_none_or(|ids| ids.contains(id))
    }

    pub fn is_consumed(&self, id: &str) -> bool {
        self.once && self.consumed.contains(id)
    }

    pub fn matches(&self, entity_type: &str, handler: &str, id: &str) -> bool {
        self.selects(entity_type, handler, id) && !self.is_consumed(id)
    }

    pub fn match_consume(&mut self, entity_type: &str, handler: &str, id: &str) -> bool {
        if !self.matches(entity_type, handler, id) {
            return false;
        }
        if self.once {
            self.consumed.insert(id.to_string());
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierList {
    specifiers: Vec<CallbackSpecifier>,
}

impl SpecifierList {
    pub fn new(specifiers: Vec<CallbackSpecifier>) -> Self {
        Self { specifiers }
    }

    pub fn push(&mut self, specifier: CallbackSpecifier) {
        self.specifiers.push(specifier);
    }

    pub fn is_empty(&self) -> bool {
        self.specifiers.is_empty()
    }

    /// Read-only check; never consumes.
    pub fn matches(&self, entity_type: &str, handler: &str, id: &str) -> bool {
        self.specifiers
            .iter()
            .any(|specifier| specifier.matches(entity_type, handler, id))
    }

    /// Consumes the first live specifier selecting the handler, if any.
    pub fn match_consume(&mut self, entity_type: &str, handler: &str, id: &str) -> bool {
        self.specifiers
            .iter_mut()
            .find(|specifier| specifier.matches(entity_type, handler, id))
            .is_some_and(|specifier| specifier.match_consume(entity_type, handler, id))
    }
}

/// Skip and force selectors of one session. The two lists are independent;
/// a handler selected by both runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideSet {
    pub skip: SpecifierList,
    pub force: SpecifierList,
}

impl OverrideSet {
    pub fn new(skip: Vec<CallbackSpecifier>, force: Vec<CallbackSpecifier>) -> Self {
        Self {
            skip: SpecifierList::new(skip),
            force: SpecifierList::new(force),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.skip.is_empty() && self.force.is_empty()
    }
}
