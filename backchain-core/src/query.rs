use std::sync::{Arc, Mutex, MutexGuard};

use crate::generator::{TopId, Tables};

use super::config::LogLevel;
use super::engine::Engine;
use super::error::{EngineResult, OperationalError, RuntimeError};
use super::terms::*;
use super::vm::*;

struct TopState {
    interpreter: Option<Interpreter>,
    /// An answer found by `has_next` and not yet returned.
    lookahead: Option<Triple>,
    closed: bool,
    finished: bool,
}

struct QueryInner {
    engine: Engine,
    id: TopId,
    /// Store version the query was started against.
    version: u64,
    state: Mutex<TopState>,
}

/// The answers to one `Engine::find` call.
///
/// Handles are cheap to clone and share one position; any of them may
/// close the query, and it is closed automatically once the last handle is
/// dropped. Every call fails with `ConcurrentModification` once the triple
/// store has changed.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
    done: bool,
}

impl Query {
    pub(crate) fn new(engine: Engine, id: TopId, version: u64, interpreter: Interpreter) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                engine,
                id,
                version,
                state: Mutex::new(TopState {
                    interpreter: Some(interpreter),
                    lookahead: None,
                    closed: false,
                    finished: false,
                }),
            }),
            done: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Is there another answer? Finds it, but does not consume it.
    pub fn has_next(&self) -> EngineResult<bool> {
        Ok(self.inner.fill(false)?.is_some())
    }

    /// The next answer, or `None` once every answer has been returned.
    pub fn next_triple(&self) -> EngineResult<Option<Triple>> {
        self.inner.fill(true)
    }

    /// Stop the query and release what it holds in the engine's tables.
    /// Closing twice is harmless.
    pub fn close(&self) {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.closed)
            .unwrap_or(true)
    }
}

impl QueryInner {
    fn lock_state(&self) -> EngineResult<MutexGuard<'_, TopState>> {
        self.state.lock().map_err(|_| {
            OperationalError::InvalidState("query state lock poisoned".to_string()).into()
        })
    }

    fn check(&self, tables: &Tables, state: &TopState) -> EngineResult<()> {
        if state.closed {
            return Err(RuntimeError::IteratorClosed.into());
        }
        let found = self.engine.store().version();
        if found != self.version {
            return Err(RuntimeError::ConcurrentModification {
                expected: self.version,
                found,
            }
            .into());
        }
        if let Some(msg) = &tables.poisoned {
            return Err(RuntimeError::SessionInvalid { msg: msg.clone() }.into());
        }
        if !tables.has_top(self.id) {
            // The engine was reset underneath us.
            return Err(RuntimeError::IteratorClosed.into());
        }
        Ok(())
    }

    /// Find the next answer if `lookahead` is empty, then return it. A
    /// consumed answer is taken out under the same locks, so handles on
    /// other threads never see it twice.
    fn fill(&self, consume: bool) -> EngineResult<Option<Triple>> {
        let mut tables = self.engine.lock_tables()?;
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        self.check(&tables, state)?;
        if state.lookahead.is_none() && !state.finished {
            if let Err(err) = self.advance(&mut tables, state) {
                if err.is_fatal() {
                    tables.poisoned = Some(err.to_string());
                }
                state.interpreter = None;
                state.finished = true;
                return Err(err);
            }
        }
        Ok(if consume {
            state.lookahead.take()
        } else {
            state.lookahead.clone()
        })
    }

    fn advance(&self, tables: &mut Tables, state: &mut TopState) -> EngineResult<()> {
        let session = self.engine.session();
        let interpreter = match state.interpreter.as_mut() {
            Some(interpreter) => interpreter,
            None => {
                state.finished = true;
                return Ok(());
            }
        };
        'answers: loop {
            if let Answer::Triple(triple) = interpreter.next(session, tables)? {
                state.lookahead = Some(triple);
                return Ok(());
            }
            loop {
                if let Some(consumer) = tables.take_ready_blocked(self.id) {
                    interpreter.restore(consumer, session, tables)?;
                    continue 'answers;
                }
                if !tables.has_blocked(self.id) {
                    break 'answers;
                }
                tables.run_agenda(session, self.id)?;
                if tables.top_ready(self.id) {
                    continue;
                }
                let blocked = tables.blocked_generators(self.id);
                tables.check_for_completions(session, &blocked);
                if !tables.top_ready(self.id) {
                    tables.force_complete(session, &blocked);
                }
            }
        }
        session
            .logger
            .log(LogLevel::Debug, || format!("DONE query {}", self.id));
        state.interpreter = None;
        state.finished = true;
        Ok(())
    }

    fn close(&self) {
        let tables = self.engine.lock_tables();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return;
        }
        state.closed = true;
        state.interpreter = None;
        state.lookahead = None;
        if let Ok(mut tables) = tables {
            tables.close_top(self.engine.session(), self.id);
        }
    }
}

impl Drop for QueryInner {
    fn drop(&mut self) {
        self.close();
    }
}

// Query as an iterator returns `None` after the first error or the last answer.
impl Iterator for Query {
    type Item = EngineResult<Triple>;

    fn next(&mut self) -> Option<EngineResult<Triple>> {
        if self.done {
            return None;
        }
        match self.next_triple() {
            Ok(Some(triple)) => Some(Ok(triple)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
