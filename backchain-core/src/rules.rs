use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::builtins::BuiltinRegistry;
use crate::code::{ClauseCode, ClauseList};
use crate::compiler::compile_clause;
use crate::error::EngineResult;

use super::terms::*;

/// Predicates with at least this many clauses get indexed on the head object.
pub const INDEX_THRESHOLD: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClauseEntry {
    Triple(TriplePattern),
    Builtin(Functor),
}

/// A backward rule: `head <- body`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub head: TriplePattern,
    pub body: Vec<ClauseEntry>,
}

impl Rule {
    pub fn new(name: &str, head: TriplePattern, body: Vec<ClauseEntry>) -> Self {
        Self {
            name: name.to_string(),
            head,
            body,
        }
    }

    /// A rule whose head predicate is a variable applies to every predicate.
    pub fn is_wildcard(&self) -> bool {
        self.head.predicate.is_var()
    }
}

/// Rules plus tabling declarations, ready to be compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<Rule>,
    tabled: HashSet<Term>,
    all_tabled: bool,
    indexed: HashSet<Term>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Memoize every goal on this predicate.
    pub fn table(&mut self, predicate: Term) {
        self.tabled.insert(predicate);
    }

    pub fn table_all(&mut self) {
        self.all_tabled = true;
    }

    /// Index the clauses of this predicate on their head object regardless
    /// of how many there are.
    pub fn index_predicate(&mut self, predicate: Term) {
        self.indexed.insert(predicate);
    }

    pub fn compile(&self, builtins: &BuiltinRegistry) -> EngineResult<RuleStore> {
        let mut layout = Layout {
            heads: HashMap::new(),
            has_wildcards: false,
            has_rules: !self.rules.is_empty(),
            tabled: self.tabled.clone(),
            all_tabled: self.all_tabled,
            indexed: self.indexed.clone(),
        };
        for rule in &self.rules {
            if rule.is_wildcard() {
                layout.has_wildcards = true;
            } else {
                *layout.heads.entry(rule.head.predicate.clone()).or_default() += 1;
            }
        }
        for (predicate, count) in &layout.heads {
            if *count >= INDEX_THRESHOLD {
                layout.indexed.insert(predicate.clone());
            }
        }

        let mut clauses = Vec::with_capacity(self.rules.len());
        for (id, rule) in self.rules.iter().enumerate() {
            clauses.push(Arc::new(compile_clause(
                id,
                Arc::new(rule.clone()),
                &layout,
                builtins,
            )?));
        }
        Ok(RuleStore::new(clauses, layout))
    }
}

/// What the compiler needs to know about the predicates it calls.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    heads: HashMap<Term, usize>,
    has_wildcards: bool,
    has_rules: bool,
    tabled: HashSet<Term>,
    all_tabled: bool,
    indexed: HashSet<Term>,
}

impl Layout {
    /// Are there any clauses for this (possibly variable) predicate?
    pub fn has_code(&self, predicate: &Term) -> bool {
        if predicate.is_var() {
            self.has_rules
        } else {
            self.has_wildcards || self.heads.contains_key(predicate)
        }
    }

    pub fn is_tabled(&self, predicate: &Term) -> bool {
        self.all_tabled
            || (predicate.is_var() && !self.tabled.is_empty())
            || self.tabled.contains(predicate)
    }

    pub fn is_indexed(&self, predicate: &Term) -> bool {
        self.indexed.contains(predicate)
    }
}

#[derive(Debug, Clone)]
struct PredicateCode {
    clauses: ClauseList,
    /// Clauses applicable to each ground head object.
    by_object: HashMap<Term, ClauseList>,
    /// Clauses applicable to a ground object not in `by_object`.
    variable_objects: ClauseList,
}

/// Compiled clauses grouped by head predicate.
#[derive(Debug)]
pub struct RuleStore {
    all: ClauseList,
    by_predicate: HashMap<Term, PredicateCode>,
    wildcards: ClauseList,
    layout: Layout,
}

impl RuleStore {
    fn new(all: Vec<Arc<ClauseCode>>, layout: Layout) -> Self {
        let head = |c: &Arc<ClauseCode>| c.rule.as_ref().map(|r| r.head.clone());
        let wildcards: Vec<Arc<ClauseCode>> = all
            .iter()
            .filter(|c| head(*c).map(|h| h.predicate.is_var()).unwrap_or(false))
            .cloned()
            .collect();

        let mut grouped: HashMap<Term, Vec<Arc<ClauseCode>>> = HashMap::new();
        for clause in &all {
            if let Some(h) = head(clause) {
                if !h.predicate.is_var() {
                    grouped.entry(h.predicate).or_default().push(clause.clone());
                }
            }
        }

        let mut by_predicate = HashMap::new();
        for (predicate, mut clauses) in grouped {
            clauses.extend(wildcards.iter().cloned());
            let mut by_object: HashMap<Term, Vec<Arc<ClauseCode>>> = HashMap::new();
            let mut variable_objects = vec![];
            if layout.is_indexed(&predicate) {
                for clause in &clauses {
                    let object = head(clause).map(|h| h.object).unwrap_or(Term::Any);
                    if object.is_var() {
                        variable_objects.push(clause.clone());
                    } else if let Term::Node(_) = object {
                        by_object.entry(object).or_default();
                    }
                }
                // Keep clause order: each object list is the subsequence of
                // clauses whose head object is that node or a variable.
                for (object, list) in by_object.iter_mut() {
                    for clause in &clauses {
                        let head_object = head(clause).map(|h| h.object).unwrap_or(Term::Any);
                        if head_object.is_var() || &head_object == object {
                            list.push(clause.clone());
                        }
                    }
                }
            }
            by_predicate.insert(
                predicate,
                PredicateCode {
                    clauses: clauses.into(),
                    by_object: by_object
                        .into_iter()
                        .map(|(k, v)| (k, ClauseList::from(v)))
                        .collect(),
                    variable_objects: variable_objects.into(),
                },
            );
        }

        Self {
            all: all.into(),
            by_predicate,
            wildcards: wildcards.into(),
            layout,
        }
    }

    /// The clauses for a predicate: its own followed by the wildcard-head ones.
    pub fn clauses_for(&self, predicate: &Term) -> ClauseList {
        if predicate.is_var() {
            self.all.clone()
        } else {
            match self.by_predicate.get(predicate) {
                Some(code) => code.clauses.clone(),
                None => self.wildcards.clone(),
            }
        }
    }

    /// The clauses that might match a goal, using the object index when the
    /// predicate is indexed and the object is a ground node.
    pub fn code_for(&self, goal: &TriplePattern) -> ClauseList {
        if let (Some(code), Term::Node(_)) =
            (self.by_predicate.get(&goal.predicate), &goal.object)
        {
            if self.layout.is_indexed(&goal.predicate) {
                return code
                    .by_object
                    .get(&goal.object)
                    .cloned()
                    .unwrap_or_else(|| code.variable_objects.clone());
            }
        }
        self.clauses_for(&goal.predicate)
    }

    pub fn is_tabled(&self, predicate: &Term) -> bool {
        self.layout.is_tabled(predicate)
    }

    pub fn is_indexed(&self, predicate: &Term) -> bool {
        self.layout.is_indexed(predicate)
    }

    pub fn clause(&self, id: usize) -> Option<&Arc<ClauseCode>> {
        self.all.get(id)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

#[cfg(test)]
impl RuleStore {
    /// The same store with the code of the clauses named `name` replaced.
    pub(crate) fn with_code(&self, name: &str, code: Vec<crate::code::Instruction>) -> Self {
        let all = self
            .all
            .iter()
            .map(|c| {
                if c.name() != name {
                    return c.clone();
                }
                Arc::new(ClauseCode {
                    id: c.id,
                    rule: c.rule.clone(),
                    code: code.clone(),
                    permanent_vars: c.permanent_vars,
                })
            })
            .collect();
        Self::new(all, self.layout.clone())
    }
}
