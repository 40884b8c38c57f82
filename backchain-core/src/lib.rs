#[cfg(test)]
#[macro_use]
extern crate maplit;

#[macro_use]
pub mod macros;
pub mod bindings;
pub mod builtins;
mod code;
mod compiler;
pub mod config;
mod counter;
pub mod engine;
pub mod error;
pub mod formatting;
mod frames;
mod generator;
pub mod messages;
pub mod query;
pub mod rules;
pub mod store;
pub mod terms;
mod vm;

pub use builtins::{Builtin, BuiltinRegistry, RuleContext};
pub use config::{EngineConfig, LogLevel};
pub use engine::{Engine, ProfileEntry};
pub use error::{EngineError, EngineResult};
pub use generator::{Context, TableInfo};
pub use query::Query;
pub use rules::{ClauseEntry, Rule, RuleSet, RuleStore};
pub use store::{MemoryGraph, TripleIter, TripleStore};
pub use terms::{Functor, Literal, Node, Symbol, Term, Triple, TriplePattern};
