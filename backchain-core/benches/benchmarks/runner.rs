use std::sync::Arc;

use backchain_core::{
    BuiltinRegistry, Engine, EngineConfig, MemoryGraph, Query, RuleSet, Triple, TriplePattern,
};

/// A chain `n0 -> n1 -> ... -> n{len}` of `parent` triples.
pub fn chain(len: usize) -> Vec<Triple> {
    (0..len)
        .map(|i| {
            backchain_core::triple!(
                backchain_core::uri!(format!("n{}", i).as_str()),
                backchain_core::uri!("parent"),
                backchain_core::uri!(format!("n{}", i + 1).as_str())
            )
        })
        .collect()
}

pub fn runner(rules: RuleSet, triples: Vec<Triple>, goal: TriplePattern) -> Runner {
    let graph = Arc::new(MemoryGraph::with_triples(triples).unwrap());
    let rules = rules.compile(&BuiltinRegistry::new()).unwrap();
    let engine = Engine::with_config(graph, rules, EngineConfig::default());
    Runner::new(engine, goal)
}

/// Used to run benchmarks by providing helper methods
pub struct Runner {
    engine: Engine,
    goal: TriplePattern,
    expected_results: Option<usize>,
}

impl Runner {
    pub fn new(engine: Engine, goal: TriplePattern) -> Self {
        Self {
            engine,
            goal,
            expected_results: None,
        }
    }

    pub fn expected_results(&mut self, count: usize) {
        self.expected_results = Some(count);
    }

    pub fn query(&self) -> Query {
        self.engine.find(&self.goal).unwrap()
    }

    /// Run the goal from empty tables.
    pub fn run(&mut self) {
        self.engine.reset().unwrap();
        let count = self.query().map(|r| r.unwrap()).count();
        if let Some(expected) = self.expected_results {
            assert_eq!(expected, count);
        }
    }
}

impl std::ops::Deref for Runner {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}
