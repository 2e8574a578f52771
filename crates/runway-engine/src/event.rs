//! Event definitions and the event table.
//!
//! The table owns every [`EventDefinition`] of a run together with one
//! [`TriggerState`] per event. Both the monitor ("detected") and the
//! controller manager ("acted") record their transitions in that single
//! ledger under one lock, and each transition happens at most once.

use std::fmt;
use std::sync::Mutex;

use indexmap::IndexMap;
use runway_core::sync::lock;
use runway_core::SharedState;
use smallvec::SmallVec;

use crate::action::ControllerAction;
use crate::config::ConfigError;

/// A pure predicate over the state store.
pub type Predicate = Box<dyn Fn(&SharedState) -> bool + Send + Sync>;

/// Action list carried by an event.
pub type Actions = SmallVec<[ControllerAction; 4]>;

// ── EventDefinition ──────────────────────────────────────────────

/// A named trigger and the actions it requests.
pub struct EventDefinition {
    name: String,
    description: String,
    trigger: Predicate,
    actions: Actions,
    response: String,
}

impl fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDefinition")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl EventDefinition {
    /// An event named `name` that fires when `trigger` returns `true`.
    ///
    /// The predicate must be free of side effects; it may be evaluated on
    /// any tick and in any order relative to other events.
    pub fn new<F>(name: impl Into<String>, trigger: F) -> Self
    where
        F: Fn(&SharedState) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            trigger: Box::new(trigger),
            actions: Actions::new(),
            response: String::new(),
        }
    }

    /// Set the human-readable description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Set the ordered action list.
    pub fn actions(mut self, actions: impl IntoIterator<Item = ControllerAction>) -> Self {
        self.actions = actions.into_iter().collect();
        self
    }

    /// Describe the expected response.
    pub fn response(mut self, text: impl Into<String>) -> Self {
        self.response = text.into();
        self
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description text.
    pub fn description_text(&self) -> &str {
        &self.description
    }

    /// Expected-response text.
    pub fn response_text(&self) -> &str {
        &self.response
    }

    /// Requested actions, in order.
    pub fn action_list(&self) -> &[ControllerAction] {
        &self.actions
    }

    /// Evaluate the trigger against `state`.
    pub fn is_triggered_by(&self, state: &SharedState) -> bool {
        (self.trigger)(state)
    }
}

// ── EventTable ───────────────────────────────────────────────────

/// Detection and dispatch state for one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerState {
    /// The monitor saw the predicate hold and published the event.
    pub detected: bool,
    /// The controller manager accepted the event for dispatch.
    pub acted: bool,
}

/// Every event of a run plus its trigger ledger.
///
/// Definitions are fixed once the table is shared; the ledger is the only
/// mutable part.
#[derive(Default)]
pub struct EventTable {
    events: IndexMap<String, EventDefinition>,
    ledger: Mutex<Vec<TriggerState>>,
}

// Compile-time assertion: EventTable must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<EventTable>();
};

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.events.keys().zip(lock(&self.ledger).iter()))
            .finish()
    }
}

impl EventTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from definitions, rejecting duplicate names.
    pub fn from_definitions(
        defs: impl IntoIterator<Item = EventDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut table = Self::new();
        for def in defs {
            table.insert(def)?;
        }
        Ok(table)
    }

    /// Add a definition.
    pub fn insert(&mut self, def: EventDefinition) -> Result<(), ConfigError> {
        if self.events.contains_key(def.name()) {
            return Err(ConfigError::DuplicateEvent {
                name: def.name().to_string(),
            });
        }
        self.events.insert(def.name().to_string(), def);
        self.ledger
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(TriggerState::default());
        Ok(())
    }

    /// Look up a definition.
    pub fn get(&self, name: &str) -> Option<&EventDefinition> {
        self.events.get(name)
    }

    /// Definitions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EventDefinition> {
        self.events.values()
    }

    /// Event names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record that `name` was detected. Returns `true` only for the first
    /// call per event.
    pub fn try_mark_detected(&self, name: &str) -> bool {
        self.transition(name, false)
    }

    /// Record that `name` was acted upon. Returns `true` only for the first
    /// call per event.
    pub fn try_mark_acted(&self, name: &str) -> bool {
        self.transition(name, true)
    }

    fn transition(&self, name: &str, acted: bool) -> bool {
        let Some(idx) = self.events.get_index_of(name) else {
            return false;
        };
        let mut ledger = lock(&self.ledger);
        let entry = &mut ledger[idx];
        let flag = if acted {
            &mut entry.acted
        } else {
            &mut entry.detected
        };
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    /// Ledger entry for `name`.
    pub fn trigger_state(&self, name: &str) -> Option<TriggerState> {
        let idx = self.events.get_index_of(name)?;
        Some(lock(&self.ledger)[idx])
    }

    /// Returns `true` once `name` has been detected.
    pub fn is_detected(&self, name: &str) -> bool {
        self.trigger_state(name).is_some_and(|s| s.detected)
    }

    /// Clear every ledger entry.
    pub fn reset(&self) {
        lock(&self.ledger).fill(TriggerState::default());
    }
}
