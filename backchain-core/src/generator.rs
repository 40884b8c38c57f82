//! Memoized goals and the scheduler that fills them.
//!
//! Every tabled goal variant has one `Generator`: an interpreter that derives
//! the goal's answers into a shared result list. Callers read that list
//! through consumers. A consumer that runs out of results before its
//! generator is complete suspends; it is resumed from the agenda once new
//! results arrive. A set of generators that only wait on each other can
//! produce nothing more, and is marked complete by `check_for_completions`.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::LogLevel;
use crate::counter::Counter;
use crate::engine::Session;
use crate::error::EngineResult;
use crate::frames::FrameId;
use crate::terms::{Triple, TriplePattern};
use crate::vm::{Answer, Interpreter};

pub type GenId = u64;
pub type ConsumerId = u64;
pub type TopId = u64;

/// Who a consumer's interpreter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    Generator(GenId),
    Top(TopId),
}

pub(crate) enum NextResult {
    Result(Triple),
    /// The generator is complete and every result has been read.
    Exhausted,
    /// More results may still arrive.
    Pending,
}

/// A snapshot of one memoized goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub results: usize,
    pub complete: bool,
}

struct Generator {
    goal: TriplePattern,
    results: Vec<Triple>,
    /// `None` for a ground goal, which has at most one answer.
    result_set: Option<HashSet<Triple>>,
    interpreter: Option<Interpreter>,
    /// Consumers reading this generator's results.
    consumers: Vec<ConsumerId>,
    /// Suspended consumers inside this generator's own interpreter.
    generating: Vec<ConsumerId>,
    /// Not yet started.
    ready: bool,
    complete: bool,
}

impl Generator {
    fn is_singleton(&self) -> bool {
        self.result_set.is_none()
    }

    /// Record a result; returns false for a duplicate.
    fn add_result(&mut self, triple: Triple) -> bool {
        let fresh = match &mut self.result_set {
            Some(set) => set.insert(triple.clone()),
            None => self.results.is_empty(),
        };
        if fresh {
            self.results.push(triple);
        }
        fresh
    }
}

struct ConsumerRecord {
    generator: GenId,
    result_index: usize,
    context: Context,
    frame: FrameId,
    suspended: bool,
    scheduled: bool,
}

#[derive(Default)]
struct TopRecord {
    blocked: Vec<ConsumerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgendaEntry {
    Generator(GenId),
    Consumer(ConsumerId),
}

/// All generators and consumers of one engine.
#[derive(Default)]
pub(crate) struct Tables {
    generators: HashMap<GenId, Generator>,
    by_goal: HashMap<TriplePattern, GenId>,
    consumers: HashMap<ConsumerId, ConsumerRecord>,
    tops: HashMap<TopId, TopRecord>,
    agenda: VecDeque<AgendaEntry>,
    ids: Counter,
    /// Store version the tables were filled against.
    pub version: u64,
    /// Set by a fatal error; the tables must be reset before further use.
    pub poisoned: Option<String>,
    profile: HashMap<usize, u64>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every table and query, keeping the id counter.
    pub fn clear(&mut self, version: u64) {
        self.generators.clear();
        self.by_goal.clear();
        self.consumers.clear();
        self.tops.clear();
        self.agenda.clear();
        self.profile.clear();
        self.poisoned = None;
        self.version = version;
    }

    /// The generator for the variant of `goal`, created (and scheduled) on
    /// first use.
    pub fn generator_for(&mut self, goal: &TriplePattern, session: &Session) -> EngineResult<GenId> {
        let key = goal.variant_key();
        if let Some(id) = self.by_goal.get(&key) {
            return Ok(*id);
        }
        let id = self.ids.next();
        let interpreter = Interpreter::new(&key, Context::Generator(id), false, session, self)?;
        session
            .logger
            .log(LogLevel::Debug, || format!("NEW generator {} for {}", id, key));
        let result_set = if key.is_ground() {
            None
        } else {
            Some(HashSet::new())
        };
        self.generators.insert(
            id,
            Generator {
                goal: key.clone(),
                results: vec![],
                result_set,
                interpreter: Some(interpreter),
                consumers: vec![],
                generating: vec![],
                ready: true,
                complete: false,
            },
        );
        self.by_goal.insert(key, id);
        self.agenda.push_back(AgendaEntry::Generator(id));
        Ok(id)
    }

    pub fn add_consumer(&mut self, generator: GenId, context: Context) -> ConsumerId {
        let id = self.ids.next();
        self.consumers.insert(
            id,
            ConsumerRecord {
                generator,
                result_index: 0,
                context,
                frame: 0,
                suspended: false,
                scheduled: false,
            },
        );
        if let Some(gen) = self.generators.get_mut(&generator) {
            gen.consumers.push(id);
        }
        id
    }

    pub fn set_consumer_frame(&mut self, consumer: ConsumerId, frame: FrameId) {
        if let Some(record) = self.consumers.get_mut(&consumer) {
            record.frame = frame;
        }
    }

    pub fn next_result(&mut self, consumer: ConsumerId) -> NextResult {
        let record = match self.consumers.get_mut(&consumer) {
            Some(record) => record,
            None => return NextResult::Exhausted,
        };
        let gen = match self.generators.get(&record.generator) {
            Some(gen) => gen,
            None => return NextResult::Exhausted,
        };
        if let Some(triple) = gen.results.get(record.result_index) {
            record.result_index += 1;
            NextResult::Result(triple.clone())
        } else if gen.complete {
            NextResult::Exhausted
        } else {
            NextResult::Pending
        }
    }

    pub fn remove_consumer(&mut self, consumer: ConsumerId) {
        let record = match self.consumers.remove(&consumer) {
            Some(record) => record,
            None => return,
        };
        if let Some(gen) = self.generators.get_mut(&record.generator) {
            gen.consumers.retain(|c| *c != consumer);
        }
        match record.context {
            Context::Generator(g) => {
                if let Some(gen) = self.generators.get_mut(&g) {
                    gen.generating.retain(|c| *c != consumer);
                }
            }
            Context::Top(t) => {
                if let Some(top) = self.tops.get_mut(&t) {
                    top.blocked.retain(|c| *c != consumer);
                }
            }
        }
    }

    /// A consumer has suspended inside the interpreter of `context`.
    pub fn notify_blocked(&mut self, context: Context, consumer: ConsumerId) {
        if let Some(record) = self.consumers.get_mut(&consumer) {
            record.suspended = true;
        }
        let waiting = match context {
            Context::Generator(g) => self.generators.get_mut(&g).map(|gen| &mut gen.generating),
            Context::Top(t) => self.tops.get_mut(&t).map(|top| &mut top.blocked),
        };
        if let Some(waiting) = waiting {
            if !waiting.contains(&consumer) {
                waiting.push(consumer);
            }
        }
    }

    /// Mark a consumer as running again and return its choice point.
    pub fn resume_consumer(&mut self, consumer: ConsumerId) -> Option<FrameId> {
        self.consumers.get_mut(&consumer).map(|record| {
            record.suspended = false;
            record.frame
        })
    }

    /// A suspended consumer that has something to read, or that will find
    /// its generator complete.
    pub fn consumer_ready(&self, consumer: ConsumerId) -> bool {
        match self.consumers.get(&consumer) {
            Some(record) => {
                record.suspended
                    && match self.generators.get(&record.generator) {
                        Some(gen) => record.result_index < gen.results.len() || gen.complete,
                        None => true,
                    }
            }
            None => false,
        }
    }

    /// Run a generator's interpreter until it has nothing more to offer,
    /// first restoring `resume` if given.
    fn pump(&mut self, session: &Session, g: GenId, resume: Option<ConsumerId>) -> EngineResult<()> {
        let mut interpreter = match self.generators.get_mut(&g) {
            Some(gen) if !gen.complete => {
                match resume {
                    Some(c) => gen.generating.retain(|x| *x != c),
                    None => gen.ready = false,
                }
                match gen.interpreter.take() {
                    Some(interpreter) => interpreter,
                    None => return Ok(()),
                }
            }
            _ => return Ok(()),
        };

        let mut added = 0;
        let mut finished = false;
        let outcome = (|| -> EngineResult<()> {
            if let Some(c) = resume {
                interpreter.restore(c, session, self)?;
            }
            while let Answer::Triple(triple) = interpreter.next(session, self)? {
                let gen = match self.generators.get_mut(&g) {
                    Some(gen) => gen,
                    None => break,
                };
                if gen.add_result(triple) {
                    added += 1;
                    if gen.is_singleton() {
                        finished = true;
                        return Ok(());
                    }
                }
            }
            finished = self
                .generators
                .get(&g)
                .map(|gen| gen.generating.is_empty())
                .unwrap_or(true);
            Ok(())
        })();

        if let Some(gen) = self.generators.get_mut(&g) {
            gen.interpreter = Some(interpreter);
            session.logger.log(LogLevel::Trace, || {
                format!(
                    "PUMP {} for {}: {} new, {} total",
                    g,
                    gen.goal,
                    added,
                    gen.results.len()
                )
            });
        }
        outcome?;

        if finished {
            self.set_complete(session, g, "COMPLETE");
        } else if added > 0 {
            self.notify_results(g);
        }
        Ok(())
    }

    /// Schedule the suspended consumers of `g` that belong to generators.
    fn notify_results(&mut self, g: GenId) {
        let consumers = match self.generators.get(&g) {
            Some(gen) => gen.consumers.clone(),
            None => return,
        };
        for c in consumers {
            if let Some(record) = self.consumers.get_mut(&c) {
                if record.suspended
                    && !record.scheduled
                    && matches!(record.context, Context::Generator(_))
                {
                    record.scheduled = true;
                    self.agenda.push_back(AgendaEntry::Consumer(c));
                }
            }
        }
    }

    fn set_complete(&mut self, session: &Session, g: GenId, label: &str) {
        match self.generators.get_mut(&g) {
            Some(gen) if !gen.complete => {
                gen.complete = true;
                gen.interpreter = None;
                gen.generating.clear();
                gen.ready = false;
                session.logger.log(LogLevel::Debug, || {
                    format!("{} {} with {} results", label, gen.goal, gen.results.len())
                });
            }
            _ => return,
        }
        let owned: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|(_, record)| record.context == Context::Generator(g))
            .map(|(id, _)| *id)
            .collect();
        for c in owned {
            self.remove_consumer(c);
        }
        self.notify_results(g);
    }

    /// Complete every generator reachable from `roots` that can no longer
    /// make progress.
    ///
    /// A generator is live if it has not started yet, if one of its own
    /// suspended consumers can be resumed, or if it waits on a live
    /// generator. Everything else only waits on results that will never
    /// arrive.
    pub fn check_for_completions(&mut self, session: &Session, roots: &[GenId]) {
        let mut visited: HashSet<GenId> = HashSet::new();
        let mut order = vec![];
        let mut pending: Vec<GenId> = roots.to_vec();
        while let Some(g) = pending.pop() {
            let gen = match self.generators.get(&g) {
                Some(gen) if !gen.complete => gen,
                _ => continue,
            };
            if !visited.insert(g) {
                continue;
            }
            order.push(g);
            for c in &gen.generating {
                if let Some(record) = self.consumers.get(c) {
                    pending.push(record.generator);
                }
            }
        }

        let mut live: HashSet<GenId> = order
            .iter()
            .copied()
            .filter(|g| {
                self.generators.get(g).map_or(false, |gen| {
                    gen.ready || gen.generating.iter().any(|c| self.consumer_ready(*c))
                })
            })
            .collect();
        let mut frontier: Vec<GenId> = live.iter().copied().collect();
        while let Some(g) = frontier.pop() {
            let consumers = match self.generators.get(&g) {
                Some(gen) => &gen.consumers,
                None => continue,
            };
            for c in consumers {
                if let Some(Context::Generator(z)) = self.consumers.get(c).map(|r| r.context) {
                    if visited.contains(&z) && live.insert(z) {
                        frontier.push(z);
                    }
                }
            }
        }

        for g in order {
            if !live.contains(&g) {
                self.set_complete(session, g, "DEADLOCK");
            }
        }
    }

    /// Pump generators until the top-level query `top` has a consumer that
    /// can be resumed, or until there is nothing left to run.
    pub fn run_agenda(&mut self, session: &Session, top: TopId) -> EngineResult<()> {
        let batch_size = session.config.completion_check_cycles.max(1);
        let mut batch = vec![];
        while !self.top_ready(top) {
            let entry = match self.agenda.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            let pumped = match entry {
                AgendaEntry::Generator(g) => {
                    let runnable = self
                        .generators
                        .get(&g)
                        .map_or(false, |gen| gen.ready && !gen.complete);
                    if runnable {
                        self.pump(session, g, None)?;
                        Some(g)
                    } else {
                        None
                    }
                }
                AgendaEntry::Consumer(c) => {
                    let context = match self.consumers.get_mut(&c) {
                        Some(record) => {
                            record.scheduled = false;
                            record.context
                        }
                        None => continue,
                    };
                    match context {
                        Context::Generator(z) if self.consumer_ready(c) => {
                            self.pump(session, z, Some(c))?;
                            Some(z)
                        }
                        _ => None,
                    }
                }
            };
            if let Some(g) = pumped {
                batch.push(g);
                if batch.len() >= batch_size {
                    self.check_for_completions(session, &batch);
                    batch.clear();
                }
            }
        }
        if !batch.is_empty() {
            self.check_for_completions(session, &batch);
        }
        Ok(())
    }

    pub fn register_top(&mut self) -> TopId {
        let id = self.ids.next();
        self.tops.insert(id, TopRecord::default());
        id
    }

    pub fn has_top(&self, top: TopId) -> bool {
        self.tops.contains_key(&top)
    }

    pub fn top_ready(&self, top: TopId) -> bool {
        match self.tops.get(&top) {
            Some(record) => record.blocked.iter().any(|c| self.consumer_ready(*c)),
            None => true,
        }
    }

    pub fn has_blocked(&self, top: TopId) -> bool {
        self.tops.get(&top).map_or(false, |t| !t.blocked.is_empty())
    }

    /// Take the longest-waiting resumable consumer of a top-level query.
    pub fn take_ready_blocked(&mut self, top: TopId) -> Option<ConsumerId> {
        let position = {
            let record = self.tops.get(&top)?;
            record
                .blocked
                .iter()
                .position(|c| self.consumer_ready(*c))?
        };
        self.tops
            .get_mut(&top)
            .map(|record| record.blocked.remove(position))
    }

    /// The generators a top-level query is waiting on.
    pub fn blocked_generators(&self, top: TopId) -> Vec<GenId> {
        self.tops
            .get(&top)
            .map(|record| {
                record
                    .blocked
                    .iter()
                    .filter_map(|c| self.consumers.get(c).map(|r| r.generator))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Complete the given generators regardless of liveness.
    pub fn force_complete(&mut self, session: &Session, generators: &[GenId]) {
        for g in generators {
            self.set_complete(session, *g, "DEADLOCK");
        }
    }

    /// Release everything a top-level query holds.
    pub fn close_top(&mut self, session: &Session, top: TopId) {
        let owned: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|(_, record)| record.context == Context::Top(top))
            .map(|(id, _)| *id)
            .collect();
        let generators: Vec<GenId> = owned
            .iter()
            .filter_map(|c| self.consumers.get(c).map(|r| r.generator))
            .collect();
        for c in owned {
            self.remove_consumer(c);
        }
        if self.tops.remove(&top).is_some() {
            self.check_for_completions(session, &generators);
            session
                .logger
                .log(LogLevel::Debug, || format!("CLOSE query {}", top));
        }
    }

    pub fn note_entry(&mut self, clause: usize) {
        *self.profile.entry(clause).or_default() += 1;
    }

    pub fn profile(&self) -> &HashMap<usize, u64> {
        &self.profile
    }

    pub fn table_info(&self, goal: &TriplePattern) -> Option<TableInfo> {
        let gen = self.by_goal.get(&goal.variant_key())?;
        self.generators.get(gen).map(|gen| TableInfo {
            results: gen.results.len(),
            complete: gen.complete,
        })
    }

    /// Results memoized for the variant of `goal`, complete or not.
    pub fn results(&self, goal: &TriplePattern) -> Option<&[Triple]> {
        let gen = self.by_goal.get(&goal.variant_key())?;
        self.generators.get(gen).map(|gen| gen.results.as_slice())
    }

    #[cfg(test)]
    pub fn generator_count(&self) -> usize {
        self.generators.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::BuiltinRegistry;
    use crate::config::EngineConfig;
    use crate::rules::RuleSet;
    use crate::store::MemoryGraph;
    use crate::terms::Term;
    use std::sync::Arc;

    fn session(rules: RuleSet, triples: Vec<Triple>) -> Session {
        Session::new(
            Arc::new(MemoryGraph::with_triples(triples).unwrap()),
            rules.compile(&BuiltinRegistry::new()).unwrap(),
            EngineConfig::default(),
            Default::default(),
        )
    }

    /// Read a goal's table the way a top-level query does.
    fn drain(session: &Session, tables: &mut Tables, goal: &TriplePattern) -> HashSet<Triple> {
        let top = tables.register_top();
        let g = tables.generator_for(goal, session).unwrap();
        let c = tables.add_consumer(g, Context::Top(top));
        let mut found = HashSet::new();
        loop {
            match tables.next_result(c) {
                NextResult::Result(t) => {
                    found.insert(t);
                }
                NextResult::Exhausted => break,
                NextResult::Pending => {
                    tables.notify_blocked(Context::Top(top), c);
                    tables.run_agenda(session, top).unwrap();
                    if !tables.top_ready(top) {
                        tables.check_for_completions(session, &[g]);
                    }
                    tables.take_ready_blocked(top);
                    tables.resume_consumer(c);
                }
            }
        }
        tables.close_top(session, top);
        found
    }

    fn ancestor_rules() -> RuleSet {
        let mut rules = RuleSet::new();
        rules.table(uri!("anc"));
        rules.add_rule(rule!("step", triple!(var!("x"), uri!("anc"), var!("y")) =>
            triple!(var!("x"), uri!("anc"), var!("z")),
            triple!(var!("z"), uri!("parent"), var!("y"))));
        rules.add_rule(rule!("base", triple!(var!("x"), uri!("anc"), var!("y")) =>
            triple!(var!("x"), uri!("parent"), var!("y"))));
        rules
    }

    #[test]
    fn test_left_recursion_completes() {
        let s = session(
            ancestor_rules(),
            vec![
                triple!(uri!("a"), uri!("parent"), uri!("b")),
                triple!(uri!("b"), uri!("parent"), uri!("c")),
                triple!(uri!("c"), uri!("parent"), uri!("a")),
            ],
        );
        let mut tables = Tables::new();
        let goal = pattern!(uri!("a"), uri!("anc"), var!("y"));
        let found = drain(&s, &mut tables, &goal);
        assert_eq!(found.len(), 3);
        assert_eq!(
            tables.table_info(&goal),
            Some(TableInfo {
                results: 3,
                complete: true
            })
        );
    }

    #[test]
    fn test_variants_share_a_table() {
        let s = session(ancestor_rules(), vec![]);
        let mut tables = Tables::new();
        let a = tables
            .generator_for(&pattern!(var!("x"), uri!("anc"), var!("y")), &s)
            .unwrap();
        let b = tables
            .generator_for(&pattern!(var!("p"), uri!("anc"), Term::Any), &s)
            .unwrap();
        let c = tables
            .generator_for(&pattern!(var!("x"), uri!("anc"), var!("x")), &s)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tables.generator_count(), 2);
    }

    #[test]
    fn test_mutual_wait_is_a_deadlock() {
        let mut rules = RuleSet::new();
        rules.table(uri!("p"));
        rules.add_rule(rule!("swap", triple!(var!("x"), uri!("p"), var!("y")) =>
            triple!(var!("y"), uri!("p"), var!("x"))));
        let s = session(rules, vec![]);
        let mut tables = Tables::new();
        let goal = pattern!(uri!("a"), uri!("p"), var!("y"));
        assert!(drain(&s, &mut tables, &goal).is_empty());
        assert_eq!(
            tables.table_info(&goal),
            Some(TableInfo {
                results: 0,
                complete: true
            })
        );
    }

    #[test]
    fn test_consumer_bookkeeping() {
        let s = session(ancestor_rules(), vec![]);
        let mut tables = Tables::new();
        let top = tables.register_top();
        let g = tables
            .generator_for(&pattern!(var!("x"), uri!("anc"), var!("y")), &s)
            .unwrap();
        let c = tables.add_consumer(g, Context::Top(top));
        assert!(matches!(tables.next_result(c), NextResult::Pending));
        tables.notify_blocked(Context::Top(top), c);
        tables.notify_blocked(Context::Top(top), c);
        assert_eq!(tables.blocked_generators(top), vec![g]);
        assert!(!tables.consumer_ready(c));

        tables.close_top(&s, top);
        assert!(!tables.has_top(top));
        assert!(matches!(tables.next_result(c), NextResult::Exhausted));
    }
}
