use std::{collections::HashSet, sync::Mutex};

use crate::draw::{Draw, DrawKey};

/// Whether a run may emit the same trait combination twice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessPolicy {
    #[default]
    Enforce,
    None,
}

/// History of accepted draws for one run.
///
/// `accept` is a single check-and-insert under one lock, so concurrent callers can never both
/// accept equal draws.
#[derive(Debug, Default)]
pub struct UniquenessGuard {
    history: Mutex<HashSet<DrawKey>>,
}

impl UniquenessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `draw` and return `true` unless an equal draw was accepted before.
    pub fn accept(&self, draw: &Draw<'_>) -> bool {
        self.accept_key(draw.key())
    }

    pub fn accept_key(&self, key: DrawKey) -> bool {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        history.insert(key)
    }

    pub fn contains(&self, draw: &Draw<'_>) -> bool {
        let key = draw.key();
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
