//! Object identifiers and the providers that hand them out.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Identifier of a managed object, unique within one registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        ObjectId(raw)
    }
}

/// Source of fresh object ids.
///
/// Implementations must never return an id twice during their lifetime.
pub trait IdProvider: Send + Sync {
    fn pop(&self) -> ObjectId;
}

/// Monotonic provider that first drains a queue of seeded ids.
///
/// Seeded ids let a caller predict the ids of objects created next (useful
/// when replaying a session). An id is never issued twice: seeds that were
/// already handed out are skipped, and the counter skips over seeds.
#[derive(Debug)]
pub struct SequentialIds {
    state: Mutex<IdState>,
}

#[derive(Debug)]
struct IdState {
    given: VecDeque<ObjectId>,
    next: u64,
    issued: HashSet<ObjectId>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            state: Mutex::new(IdState {
                given: VecDeque::new(),
                next: first,
                issued: HashSet::new(),
            }),
        }
    }

    /// Queue ids to be returned (in order) before the counter is consulted.
    pub fn with_given(self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.push_given(ids);
        self
    }

    pub fn push_given(&self, ids: impl IntoIterator<Item = ObjectId>) {
        let mut state = self.state.lock().expect("id provider poisoned");
        state.given.extend(ids);
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> usize {
        self.state.lock().expect("id provider poisoned").issued.len()
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdProvider for SequentialIds {
    fn pop(&self) -> ObjectId {
        let mut state = self.state.lock().expect("id provider poisoned");
        while let Some(id) = state.given.pop_front() {
            if state.issued.insert(id) {
                return id;
            }
        }
        loop {
            let id = ObjectId(state.next);
            state.next += 1;
            if state.issued.insert(id) {
                return id;
            }
        }
    }
}
