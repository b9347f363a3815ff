//! Ordered stub storage with first-match resolution.
//!
//! Readers take a snapshot (`Arc<Vec<Arc<Stub>>>`) and evaluate it without
//! holding the lock. Every mutation is a [`StubCommand`] applied under the
//! write lock: the command builds a new list and swaps it in, so a resolver
//! sees either the old list or the new one, never a partial edit.

use super::types::{ResponseSpec, Stub, StubDefinition, StubId, StubStats};
use crate::error::StoreError;
use crate::predicate::{EvaluationScope, PredicateInjector};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Administrative and recording mutations.
#[derive(Debug, Clone)]
pub enum StubCommand {
    /// Insert at `position` (clamped), or append when `None`
    Insert {
        definition: StubDefinition,
        position: Option<usize>,
    },
    Remove(StubId),
    RemoveAt(usize),
    /// Swap a stub's definition, keeping its id, cursor and statistics
    Replace {
        id: StubId,
        definition: StubDefinition,
    },
    ReplaceAll(Vec<StubDefinition>),
    /// Insert a recorded stub immediately before the proxy stub `before`
    RecordStub {
        before: StubId,
        definition: StubDefinition,
    },
    /// Append responses to the first stub after `after` with identical
    /// predicates, or insert the definition right after `after`
    AppendResponse {
        after: StubId,
        definition: StubDefinition,
    },
}

/// What a command changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted(StubId),
    Removed(StubId),
    Replaced(StubId),
    ReplacedAll(Vec<StubId>),
    Appended(StubId),
}

impl StoreChange {
    /// Id of the single stub affected, if the change concerns one.
    pub fn stub_id(&self) -> Option<StubId> {
        match self {
            StoreChange::Inserted(id)
            | StoreChange::Removed(id)
            | StoreChange::Replaced(id)
            | StoreChange::Appended(id) => Some(*id),
            StoreChange::ReplacedAll(_) => None,
        }
    }
}

/// The first matching stub for a request and the response selected from it.
#[derive(Debug, Clone)]
pub struct StubMatch {
    pub stub: Arc<Stub>,
    pub response_index: usize,
    pub response: ResponseSpec,
}

#[derive(Debug, Default)]
pub struct StubStore {
    stubs: RwLock<Arc<Vec<Arc<Stub>>>>,
    next_id: AtomicU64,
    injector: Option<Arc<dyn PredicateInjector>>,
}

impl StubStore {
    /// Store without script injection; inject predicates are rejected.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_injector(injector: Arc<dyn PredicateInjector>) -> Self {
        Self {
            injector: Some(injector),
            ..Self::default()
        }
    }

    /// Consistent view of the current stub list.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Stub>>> {
        Arc::clone(&self.stubs.read())
    }

    /// First stub whose predicates hold, with its cursor advanced.
    pub fn resolve(&self, scope: &EvaluationScope<'_>) -> Option<StubMatch> {
        let snapshot = self.snapshot();
        let (position, stub) = snapshot
            .iter()
            .enumerate()
            .find(|(_, stub)| stub.predicates().evaluate(scope))?;

        stub.state().count_match();
        let responses = stub.responses();
        if responses.is_empty() {
            debug!(stub_id = %stub.id(), position, "matched stub has no responses");
            return None;
        }
        let count = u32::try_from(responses.len()).unwrap_or(u32::MAX);
        let index = stub
            .state()
            .cursor
            .select_and_advance(count, |i| responses.get(i as usize).and_then(ResponseSpec::repeat))
            as usize;

        debug!(stub_id = %stub.id(), position, response_index = index, "stub matched");
        Some(StubMatch {
            stub: Arc::clone(stub),
            response_index: index,
            response: responses[index].clone(),
        })
    }

    /// Single serialization point for every mutation.
    pub fn apply(&self, command: StubCommand) -> Result<StoreChange, StoreError> {
        // Compile before taking the lock; configuration errors never touch the list.
        let prepared = self.prepare(command)?;

        let mut guard = self.stubs.write();
        let mut stubs: Vec<Arc<Stub>> = guard.as_ref().clone();
        let change = match prepared {
            Prepared::Insert { stub, position } => {
                let id = stub.id();
                let index = position.unwrap_or(stubs.len()).min(stubs.len());
                stubs.insert(index, Arc::new(stub));
                StoreChange::Inserted(id)
            }
            Prepared::Remove(id) => {
                let index = index_of(&stubs, id)?;
                stubs.remove(index);
                StoreChange::Removed(id)
            }
            Prepared::RemoveAt(index) => {
                if index >= stubs.len() {
                    return Err(StoreError::IndexOutOfBounds(index));
                }
                StoreChange::Removed(stubs.remove(index).id())
            }
            Prepared::Replace(stub) => {
                let index = index_of(&stubs, stub.id())?;
                let state = Arc::clone(stubs[index].state());
                let id = stub.id();
                stubs[index] = Arc::new(stub.with_state(state));
                StoreChange::Replaced(id)
            }
            Prepared::ReplaceAll(replacements) => {
                let ids = replacements.iter().map(Stub::id).collect();
                stubs = replacements.into_iter().map(Arc::new).collect();
                StoreChange::ReplacedAll(ids)
            }
            Prepared::Record { before, stub } => {
                let index = index_of(&stubs, before)?;
                let id = stub.id();
                stubs.insert(index, Arc::new(stub));
                info!(stub_id = %id, proxy_stub = %before, index, "recorded stub before proxy");
                StoreChange::Inserted(id)
            }
            Prepared::Append { after, stub } => {
                let proxy_index = index_of(&stubs, after)?;
                let existing = stubs
                    .iter()
                    .enumerate()
                    .skip(proxy_index + 1)
                    .find(|(_, s)| {
                        !s.definition().predicates.is_empty()
                            && s.definition().predicates == stub.definition().predicates
                    })
                    .map(|(i, _)| i);

                match existing {
                    Some(index) => {
                        let appended = stubs[index].with_appended(stub.responses().to_vec());
                        let id = appended.id();
                        info!(
                            stub_id = %id,
                            responses = appended.responses().len(),
                            "appended recorded response"
                        );
                        stubs[index] = Arc::new(appended);
                        StoreChange::Appended(id)
                    }
                    None => {
                        let id = stub.id();
                        stubs.insert(proxy_index + 1, Arc::new(stub));
                        info!(stub_id = %id, proxy_stub = %after, "recorded stub after proxy");
                        StoreChange::Inserted(id)
                    }
                }
            }
        };
        *guard = Arc::new(stubs);
        Ok(change)
    }

    fn prepare(&self, command: StubCommand) -> Result<Prepared, StoreError> {
        Ok(match command {
            StubCommand::Insert {
                definition,
                position,
            } => Prepared::Insert {
                stub: self.compile(self.allocate_id(), definition)?,
                position,
            },
            StubCommand::Remove(id) => Prepared::Remove(id),
            StubCommand::RemoveAt(index) => Prepared::RemoveAt(index),
            StubCommand::Replace { id, definition } => {
                Prepared::Replace(self.compile(id, definition)?)
            }
            StubCommand::ReplaceAll(definitions) => Prepared::ReplaceAll(
                definitions
                    .into_iter()
                    .map(|definition| self.compile(self.allocate_id(), definition))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            StubCommand::RecordStub { before, definition } => Prepared::Record {
                before,
                stub: self.compile(self.allocate_id(), definition)?,
            },
            StubCommand::AppendResponse { after, definition } => Prepared::Append {
                after,
                stub: self.compile(self.allocate_id(), definition)?,
            },
        })
    }

    fn compile(&self, id: StubId, definition: StubDefinition) -> Result<Stub, StoreError> {
        Ok(Stub::compile(id, definition, self.injector.as_deref())?)
    }

    fn allocate_id(&self) -> StubId {
        StubId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------------
    // Convenience wrappers
    // ------------------------------------------------------------------------

    /// Add a stub at `position` (clamped to the list), or at the end.
    pub fn add(
        &self,
        definition: StubDefinition,
        position: Option<usize>,
    ) -> Result<StubId, StoreError> {
        let change = self.apply(StubCommand::Insert {
            definition,
            position,
        })?;
        Ok(change.stub_id().unwrap_or(StubId(0)))
    }

    pub fn remove(&self, id: StubId) -> Result<(), StoreError> {
        self.apply(StubCommand::Remove(id)).map(|_| ())
    }

    /// Remove by position; returns the removed stub's id.
    pub fn remove_at(&self, index: usize) -> Result<StubId, StoreError> {
        let change = self.apply(StubCommand::RemoveAt(index))?;
        change.stub_id().ok_or(StoreError::IndexOutOfBounds(index))
    }

    pub fn replace(&self, id: StubId, definition: StubDefinition) -> Result<(), StoreError> {
        self.apply(StubCommand::Replace { id, definition }).map(|_| ())
    }

    pub fn replace_all(&self, definitions: Vec<StubDefinition>) -> Result<Vec<StubId>, StoreError> {
        match self.apply(StubCommand::ReplaceAll(definitions))? {
            StoreChange::ReplacedAll(ids) => Ok(ids),
            other => Ok(other.stub_id().into_iter().collect()),
        }
    }

    pub fn get(&self, id: StubId) -> Option<Arc<Stub>> {
        self.snapshot().iter().find(|s| s.id() == id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Stub>> {
        self.snapshot().as_ref().clone()
    }

    pub fn stats(&self) -> Vec<StubStats> {
        self.snapshot()
            .iter()
            .map(|stub| {
                let count = stub.responses().len();
                StubStats {
                    id: stub.id(),
                    matches: stub.matches(),
                    response_count: count,
                    next_response: stub
                        .state()
                        .cursor
                        .peek(u32::try_from(count).unwrap_or(u32::MAX))
                        as usize,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_injector(&self) -> bool {
        self.injector.is_some()
    }
}

/// A command whose stubs are already compiled.
enum Prepared {
    Insert { stub: Stub, position: Option<usize> },
    Remove(StubId),
    RemoveAt(usize),
    Replace(Stub),
    ReplaceAll(Vec<Stub>),
    Record { before: StubId, stub: Stub },
    Append { after: StubId, stub: Stub },
}

fn index_of(stubs: &[Arc<Stub>], id: StubId) -> Result<usize, StoreError> {
    stubs
        .iter()
        .position(|s| s.id() == id)
        .ok_or(StoreError::StubNotFound(id))
}
