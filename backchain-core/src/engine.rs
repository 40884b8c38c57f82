use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::config::{EngineConfig, LogLevel};
use super::error::{EngineResult, OperationalError, RuntimeError};
use super::generator::{Context, TableInfo, Tables};
use super::messages::*;
use super::query::Query;
use super::rules::RuleStore;
use super::store::TripleStore;
use super::terms::*;
use super::vm::Interpreter;

/// What every interpreter of one engine shares.
pub(crate) struct Session {
    pub store: Arc<dyn TripleStore>,
    pub rules: Arc<RuleStore>,
    pub config: EngineConfig,
    pub logger: Logger,
}

impl Session {
    pub fn new(
        store: Arc<dyn TripleStore>,
        rules: RuleStore,
        config: EngineConfig,
        messages: MessageQueue,
    ) -> Self {
        let logger = Logger::new(&config, messages);
        Self {
            store,
            rules: Arc::new(rules),
            config,
            logger,
        }
    }
}

/// How often a clause was entered while profiling was on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub clause: usize,
    pub rule: String,
    pub entries: u64,
}

/// A backward-chaining engine over one triple store and one set of rules.
///
/// Memoized tables are shared by every query the engine runs and stay valid
/// until the store changes. The first query after a change starts from
/// empty tables; iterators still open over the old tables fail with a
/// concurrent modification error.
#[derive(Clone)]
pub struct Engine {
    session: Arc<Session>,
    tables: Arc<Mutex<Tables>>,
    messages: MessageQueue,
}

pub(crate) fn lock_error() -> OperationalError {
    OperationalError::InvalidState("engine tables lock poisoned".to_string())
}

impl Engine {
    /// Create an engine configured from the environment.
    pub fn new(store: Arc<dyn TripleStore>, rules: RuleStore) -> Self {
        Self::with_config(store, rules, EngineConfig::from_env())
    }

    pub fn with_config(store: Arc<dyn TripleStore>, rules: RuleStore, config: EngineConfig) -> Self {
        let messages = MessageQueue::new();
        let mut tables = Tables::new();
        tables.version = store.version();
        Self {
            session: Arc::new(Session::new(store, rules, config, messages.clone())),
            tables: Arc::new(Mutex::new(tables)),
            messages,
        }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn lock_tables(&self) -> EngineResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| lock_error().into())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.session.config
    }

    pub fn store(&self) -> &Arc<dyn TripleStore> {
        &self.session.store
    }

    pub fn rules(&self) -> &RuleStore {
        &self.session.rules
    }

    /// Start a query for every triple matching `pattern`, stored or derived.
    pub fn find(&self, pattern: &TriplePattern) -> EngineResult<Query> {
        let mut tables = self.lock_tables()?;
        if let Some(msg) = &tables.poisoned {
            return Err(RuntimeError::SessionInvalid { msg: msg.clone() }.into());
        }
        let version = self.session.store.version();
        if tables.version != version {
            self.session.logger.log(LogLevel::Debug, || {
                format!(
                    "RESET tables: store version {} -> {}",
                    tables.version, version
                )
            });
            tables.clear(version);
        }

        let top = tables.register_top();
        self.session
            .logger
            .log(LogLevel::Info, || format!("QUERY {}: {}", top, pattern));
        let interpreter =
            Interpreter::new(pattern, Context::Top(top), true, &self.session, &mut tables);
        let interpreter = match interpreter {
            Ok(interpreter) => interpreter,
            Err(err) => {
                if err.is_fatal() {
                    tables.poisoned = Some(err.to_string());
                }
                tables.close_top(&self.session, top);
                return Err(err);
            }
        };
        drop(tables);
        Ok(Query::new(self.clone(), top, version, interpreter))
    }

    /// Throw away every table. Open iterators are closed.
    pub fn reset(&self) -> EngineResult<()> {
        let mut tables = self.lock_tables()?;
        tables.clear(self.session.store.version());
        self.session.logger.log(LogLevel::Debug, || "RESET tables");
        Ok(())
    }

    /// The state of the table for `pattern`'s variant, if one exists.
    pub fn table_info(&self, pattern: &TriplePattern) -> EngineResult<Option<TableInfo>> {
        Ok(self.lock_tables()?.table_info(pattern))
    }

    /// Results memoized so far for `pattern`'s variant.
    pub fn table_results(&self, pattern: &TriplePattern) -> EngineResult<Option<Vec<Triple>>> {
        Ok(self.lock_tables()?.results(pattern).map(|r| r.to_vec()))
    }

    /// Clause entry counts, busiest first. Empty unless profiling is on.
    pub fn profile(&self) -> EngineResult<Vec<ProfileEntry>> {
        let tables = self.lock_tables()?;
        let mut entries: Vec<ProfileEntry> = tables
            .profile()
            .iter()
            .map(|(clause, entries)| ProfileEntry {
                clause: *clause,
                rule: self
                    .session
                    .rules
                    .clause(*clause)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
                entries: *entries,
            })
            .collect();
        entries.sort_by(|a, b| b.entries.cmp(&a.entries).then(a.clause.cmp(&b.clause)));
        Ok(entries)
    }

    /// Print every profile entry to the message queue.
    pub fn print_profile(&self) -> EngineResult<()> {
        for entry in self.profile()? {
            self.messages.push(
                MessageKind::Print,
                format!("{:>8} {}", entry.entries, entry.rule),
            );
        }
        Ok(())
    }

    pub fn next_message(&self) -> Option<Message> {
        self.messages.next()
    }
}
