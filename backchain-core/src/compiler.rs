//! Translate a rule into clause code.
//!
//! Rule variables are classified before any code is emitted:
//! - a *dummy* occurs once and needs no register,
//! - a *temporary* occurs only in the head and the first body entry and
//!   lives in a `T` register,
//! - anything else is *permanent* and lives in the environment frame.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::builtins::BuiltinRegistry;
use crate::code::*;
use crate::error::{CompileError, EngineResult};
use crate::rules::{ClauseEntry, Layout, Rule};
use crate::terms::{Functor, Symbol, Term, TriplePattern};

/// Where a variable occurs: entry 0 is the head, body entries start at 1.
/// `index` is the position in the flattened entry, which for triples equals
/// the argument register the term is passed in.
#[derive(Debug, Clone, Copy)]
struct Occurrence {
    entry: usize,
    index: usize,
}

struct CompileState<'a> {
    rule: &'a Rule,
    code: Vec<Instruction>,
    occurrences: HashMap<Symbol, Vec<Occurrence>>,
    permanent: Vec<Symbol>,
    temporary: Vec<Symbol>,
    seen: HashSet<Symbol>,
}

fn too_complex(rule: &Rule, msg: &str) -> CompileError {
    CompileError::TooComplex {
        rule: rule.to_string(),
        msg: msg.to_string(),
    }
}

/// Flattened terms of an entry: subject, predicate, object and then the
/// object's functor arguments, or the arguments of a builtin call.
fn entry_terms(entry: &ClauseEntry) -> Vec<&Term> {
    match entry {
        ClauseEntry::Triple(t) => triple_terms(t),
        ClauseEntry::Builtin(f) => f.args.iter().collect(),
    }
}

fn triple_terms(t: &TriplePattern) -> Vec<&Term> {
    let mut terms = vec![&t.subject, &t.predicate, &t.object];
    if let Term::Functor(f) = &t.object {
        terms.extend(f.args.iter());
    }
    terms
}

impl<'a> CompileState<'a> {
    fn new(rule: &'a Rule) -> EngineResult<Self> {
        let mut state = Self {
            rule,
            code: vec![],
            occurrences: HashMap::new(),
            permanent: vec![],
            temporary: vec![],
            seen: HashSet::new(),
        };
        state.classify_variables()?;
        Ok(state)
    }

    fn classify_variables(&mut self) -> EngineResult<()> {
        let rule = self.rule;
        let mut order = vec![];
        let entries = std::iter::once(triple_terms(&rule.head))
            .chain(rule.body.iter().map(entry_terms));
        for (entry, terms) in entries.enumerate() {
            for (index, term) in terms.into_iter().enumerate() {
                if let Term::Var(name) = term {
                    let occurrences = self.occurrences.entry(name.clone()).or_insert_with(|| {
                        order.push(name.clone());
                        vec![]
                    });
                    occurrences.push(Occurrence { entry, index });
                }
            }
        }

        for var in order {
            let occurrences = &self.occurrences[&var];
            if occurrences.len() <= 1 {
                continue;
            }
            let in_head = occurrences.iter().any(|o| o.entry == 0);
            let in_later_body = occurrences.iter().any(|o| o.entry > 1);
            if in_later_body || !in_head {
                self.permanent.push(var);
            } else {
                self.temporary.push(var);
            }
        }

        if self.permanent.len() > MAX_PERMANENT_VARS {
            return Err(too_complex(
                self.rule,
                &format!(
                    "rule clauses are limited to {} permanent variables",
                    MAX_PERMANENT_VARS
                ),
            )
            .into());
        }
        if self.temporary.len() > MAX_TEMPORARY_VARS {
            return Err(too_complex(
                self.rule,
                &format!(
                    "rule clauses are limited to {} temporary variables",
                    MAX_TEMPORARY_VARS
                ),
            )
            .into());
        }
        Ok(())
    }

    fn is_dummy(&self, var: &Symbol) -> bool {
        self.occurrences.get(var).map(|o| o.len() <= 1).unwrap_or(true)
    }

    fn permanent_index(&self, var: &Symbol) -> Option<usize> {
        self.permanent.iter().position(|v| v == var)
    }

    fn temporary_index(&self, var: &Symbol) -> Option<usize> {
        self.temporary.iter().position(|v| v == var)
    }

    /// A temporary used exactly twice at the same register needs no moves.
    fn in_place(&self, var: &Symbol, head_only_args: bool) -> bool {
        match self.occurrences.get(var).map(|o| o.as_slice()) {
            Some([first, second]) => {
                (!head_only_args || first.index <= 2) && first.index == second.index
            }
            _ => false,
        }
    }

    /// Argument register of a head variable, if it sits directly in the head.
    fn head_register(&self, var: &Symbol) -> Option<usize> {
        let head = &self.rule.head;
        [&head.subject, &head.predicate, &head.object]
            .iter()
            .position(|t| matches!(t, Term::Var(v) if v == var))
    }

    /// Leading `bound(?x)`/`unbound(?x)` checks on head arguments become
    /// register tests. Returns how many body entries were consumed.
    fn emit_binding_tests(&mut self) -> usize {
        let rule = self.rule;
        let mut consumed = 0;
        for entry in &rule.body {
            let test = match entry {
                ClauseEntry::Builtin(f) if f.args.len() == 1 => match (&f.args[0], f.name.name()) {
                    (Term::Var(v), "bound") => self
                        .head_register(v)
                        .map(|arg| Instruction::TestBound { arg }),
                    (Term::Var(v), "unbound") => self
                        .head_register(v)
                        .map(|arg| Instruction::TestUnbound { arg }),
                    _ => None,
                },
                _ => None,
            };
            match test {
                Some(instruction) => self.code.push(instruction),
                None => break,
            }
            consumed += 1;
        }
        consumed
    }

    fn emit_head(&mut self) -> EngineResult<()> {
        let rule = self.rule;
        let head = &rule.head;
        for term in [&head.subject, &head.predicate] {
            if matches!(term, Term::Functor(_)) {
                return Err(CompileError::BadHead {
                    rule: self.rule.to_string(),
                }
                .into());
            }
        }
        self.emit_head_get(&head.subject, 0)?;
        self.emit_head_get(&head.predicate, 1)?;
        self.emit_head_get(&head.object, 2)
    }

    fn emit_head_get(&mut self, term: &Term, arg: usize) -> EngineResult<()> {
        if arg >= MAX_ARGUMENT_VARS {
            return Err(too_complex(self.rule, "too many functor arguments").into());
        }
        match term {
            Term::Var(var) => {
                if self.is_dummy(var) {
                    return Ok(());
                }
                if let Some(temp) = self.temporary_index(var) {
                    if !self.in_place(var, true) {
                        self.code.push(if self.seen.insert(var.clone()) {
                            Instruction::GetTemp { temp, arg }
                        } else {
                            Instruction::UnifyTemp { temp, arg }
                        });
                    }
                } else if let Some(slot) = self.permanent_index(var) {
                    self.code.push(if self.seen.insert(var.clone()) {
                        Instruction::GetVariable { slot, arg }
                    } else {
                        Instruction::UnifyVariable { slot, arg }
                    });
                }
            }
            Term::Functor(f) => {
                if arg != 2 || f.args.iter().any(|a| matches!(a, Term::Functor(_))) {
                    return Err(too_complex(self.rule, "nested functors").into());
                }
                self.code.push(Instruction::GetFunctor { functor: f.clone() });
                for (i, a) in f.args.iter().enumerate() {
                    self.emit_head_get(a, FUNCTOR_ARG_BASE + i)?;
                }
            }
            Term::Node(_) => self.code.push(Instruction::GetConstant {
                arg,
                constant: term.clone(),
            }),
            Term::Any | Term::Ref(_) => {}
        }
        Ok(())
    }

    fn emit_body_triple(&mut self, goal: &TriplePattern, layout: &Layout) -> EngineResult<()> {
        if matches!(goal.subject, Term::Functor(_)) || matches!(goal.predicate, Term::Functor(_)) {
            return Err(too_complex(self.rule, "functor outside the object position").into());
        }
        self.emit_body_put(&goal.subject, 0, false)?;
        self.emit_body_put(&goal.predicate, 1, false)?;
        self.emit_body_put(&goal.object, 2, false)?;

        let predicate = &goal.predicate;
        let call = if !layout.has_code(predicate) {
            Instruction::CallTripleMatch
        } else if predicate.is_var() {
            Instruction::CallWildTabled
        } else if layout.is_tabled(predicate) {
            Instruction::CallTabled
        } else if self.permanent.is_empty() {
            Instruction::LastCallPredicate {
                predicate: predicate.clone(),
            }
        } else if layout.is_indexed(predicate) && goal.object.is_var() {
            Instruction::CallPredicateIndex {
                predicate: predicate.clone(),
            }
        } else {
            Instruction::CallPredicate {
                predicate: predicate.clone(),
            }
        };
        self.code.push(call);
        Ok(())
    }

    fn emit_body_put(&mut self, term: &Term, arg: usize, deref: bool) -> EngineResult<()> {
        if arg >= MAX_ARGUMENT_VARS {
            return Err(too_complex(
                self.rule,
                &format!(
                    "rule clauses are limited to {} argument variables",
                    MAX_ARGUMENT_VARS
                ),
            )
            .into());
        }
        match term {
            Term::Var(var) => {
                if self.is_dummy(var) {
                    self.code.push(Instruction::ClearArg { arg });
                } else if let Some(temp) = self.temporary_index(var) {
                    if !self.in_place(var, false) {
                        self.code.push(Instruction::PutTemp { temp, arg });
                    }
                } else if let Some(slot) = self.permanent_index(var) {
                    self.code.push(if self.seen.insert(var.clone()) {
                        Instruction::PutNewVariable { slot, arg }
                    } else if deref {
                        Instruction::PutDerefVariable { slot, arg }
                    } else {
                        Instruction::PutVariable { slot, arg }
                    });
                }
            }
            Term::Functor(f) => {
                if f.args.iter().any(|a| matches!(a, Term::Functor(_))) {
                    return Err(too_complex(self.rule, "nested functors").into());
                }
                for (i, a) in f.args.iter().enumerate() {
                    self.emit_body_put(a, FUNCTOR_ARG_BASE + i, deref)?;
                }
                self.code.push(Instruction::MakeFunctor { functor: f.clone() });
            }
            Term::Node(_) => self.code.push(Instruction::PutConstant {
                arg,
                constant: term.clone(),
            }),
            Term::Any | Term::Ref(_) => self.code.push(Instruction::ClearArg { arg }),
        }
        Ok(())
    }

    fn emit_body_builtin(
        &mut self,
        functor: &Functor,
        builtins: &BuiltinRegistry,
    ) -> EngineResult<()> {
        let name = functor.name.name();
        let builtin = builtins
            .get(name)
            .ok_or_else(|| CompileError::UnknownBuiltin {
                rule: self.rule.to_string(),
                name: name.to_string(),
            })?;
        if builtin.arity() != 0 && builtin.arity() != functor.arity() {
            return Err(CompileError::BuiltinArity {
                rule: self.rule.to_string(),
                name: name.to_string(),
                expected: builtin.arity(),
                found: functor.arity(),
            }
            .into());
        }
        for (i, a) in functor.args.iter().enumerate() {
            if matches!(a, Term::Functor(_)) {
                return Err(too_complex(self.rule, "functor argument to a builtin").into());
            }
            self.emit_body_put(a, i, true)?;
        }
        self.code.push(Instruction::CallBuiltin {
            builtin,
            arity: functor.arity(),
        });
        Ok(())
    }
}

/// Compile one rule against the predicates known to the rule store.
pub(crate) fn compile_clause(
    id: usize,
    rule: Arc<Rule>,
    layout: &Layout,
    builtins: &BuiltinRegistry,
) -> EngineResult<ClauseCode> {
    let mut state = CompileState::new(&rule)?;
    let skip = state.emit_binding_tests();
    state.emit_head()?;
    for entry in &rule.body[skip..] {
        match entry {
            ClauseEntry::Triple(goal) => state.emit_body_triple(goal, layout)?,
            ClauseEntry::Builtin(f) => state.emit_body_builtin(f, builtins)?,
        }
    }
    state.code.push(Instruction::Proceed);

    let permanent_vars = state.permanent.len();
    let code = state.code;
    Ok(ClauseCode {
        id,
        rule: Some(rule.clone()),
        code,
        permanent_vars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, ErrorKind};
    use crate::rules::RuleSet;
    use pretty_assertions::assert_eq;

    fn listing(rules: &RuleSet, name: &str) -> Vec<String> {
        let store = rules.compile(&BuiltinRegistry::new()).unwrap();
        let clause = (0..store.len())
            .filter_map(|i| store.clause(i))
            .find(|c| c.name() == name)
            .unwrap();
        clause.code.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_chain_rule() {
        // (?a p ?y) <- (?a q2 ?z), (?z q2 ?w).
        let mut rules = RuleSet::new();
        rules.add_rule(rule!("chain", triple!(var!("a"), uri!("p"), var!("y")) =>
            triple!(var!("a"), uri!("q2"), var!("z")),
            triple!(var!("z"), uri!("q2"), var!("w"))));
        assert_eq!(
            listing(&rules, "chain"),
            vec![
                "GET_CONSTANT A1, <p>",
                "PUT_CONSTANT A1, <q2>",
                "PUT_NEW_VARIABLE Y0, A2",
                "CALL_TRIPLE_MATCH",
                "PUT_VARIABLE Y0, A0",
                "PUT_CONSTANT A1, <q2>",
                "CLEAR_ARG A2",
                "CALL_TRIPLE_MATCH",
                "PROCEED",
            ]
        );
    }

    #[test]
    fn test_recursive_call_and_builtin() {
        // (?x p ?y) <- (?x p ?z), sum(?z, 2, ?y).
        let mut rules = RuleSet::new();
        rules.add_rule(rule!("sum", triple!(var!("x"), uri!("p"), var!("y")) =>
            triple!(var!("x"), uri!("p"), var!("z")),
            @sum(var!("z"), lit!(2), var!("y"))));
        assert_eq!(
            listing(&rules, "sum"),
            vec![
                "GET_CONSTANT A1, <p>",
                "GET_VARIABLE Y0, A2",
                "PUT_CONSTANT A1, <p>",
                "PUT_NEW_VARIABLE Y1, A2",
                "CALL_PREDICATE <p>",
                "PUT_DEREF_VARIABLE Y1, A0",
                "PUT_CONSTANT A1, 2",
                "PUT_DEREF_VARIABLE Y0, A2",
                "CALL_BUILTIN sum/3",
                "PROCEED",
            ]
        );
    }

    #[test]
    fn test_functors_and_binding_tests() {
        // (?x p foo(?y, ?z)) <- bound(?x), (?x q ?y), (?x q ?z).
        let mut rules = RuleSet::new();
        rules.table(uri!("q"));
        rules.add_rule(rule!("q", triple!(var!("a"), uri!("q"), var!("b")) =>
            triple!(var!("a"), uri!("r"), var!("b"))));
        rules.add_rule(rule!("foo", triple!(var!("x"), uri!("p"), functor!("foo", var!("y"), var!("z"))) =>
            @bound(var!("x")),
            triple!(var!("x"), uri!("q"), var!("y")),
            triple!(var!("x"), uri!("q"), var!("z"))));
        assert_eq!(
            listing(&rules, "foo"),
            vec![
                "TEST_BOUND A0",
                "GET_VARIABLE Y0, A0",
                "GET_CONSTANT A1, <p>",
                "GET_FUNCTOR foo/2",
                "GET_VARIABLE Y1, A3",
                "GET_VARIABLE Y2, A4",
                "PUT_VARIABLE Y0, A0",
                "PUT_CONSTANT A1, <q>",
                "PUT_VARIABLE Y1, A2",
                "CALL_TABLED",
                "PUT_VARIABLE Y0, A0",
                "PUT_CONSTANT A1, <q>",
                "PUT_VARIABLE Y2, A2",
                "CALL_TABLED",
                "PROCEED",
            ]
        );
    }

    #[test]
    fn test_indexed_call() {
        // (?x q ?y) <- (?x p ?y), (?x type thing).
        let mut rules = RuleSet::new();
        rules.index_predicate(uri!("p"));
        rules.add_rule(rule!("p_any", triple!(var!("s"), uri!("p"), var!("o")) =>
            triple!(var!("s"), uri!("link"), var!("o"))));
        rules.add_rule(rule!("q", triple!(var!("x"), uri!("q"), var!("y")) =>
            triple!(var!("x"), uri!("p"), var!("y")),
            triple!(var!("x"), uri!("type"), uri!("thing"))));
        rules.add_rule(rule!("r", triple!(var!("x"), uri!("r"), var!("y")) =>
            triple!(var!("x"), uri!("p"), uri!("o1")),
            triple!(var!("x"), uri!("type"), var!("y"))));

        let q = listing(&rules, "q");
        assert!(q.contains(&"CALL_PREDICATE_INDEX <p>".to_string()), "{:?}", q);
        // A constant object in the body gets the plain call.
        let r = listing(&rules, "r");
        assert!(r.contains(&"CALL_PREDICATE <p>".to_string()), "{:?}", r);
    }

    #[test]
    fn test_compile_errors() {
        let mut rules = RuleSet::new();
        rules.add_rule(rule!("bad", triple!(var!("x"), uri!("p"), var!("y")) =>
            @nope(var!("x"), var!("y"))));
        let err = rules.compile(&BuiltinRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError {
                kind: ErrorKind::Compile(CompileError::UnknownBuiltin { .. })
            }
        ));

        let mut rules = RuleSet::new();
        rules.add_rule(rule!("bad", triple!(var!("x"), uri!("p"), var!("y")) =>
            @sum(var!("x"), var!("y"))));
        let err = rules.compile(&BuiltinRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError {
                kind: ErrorKind::Compile(CompileError::BuiltinArity { expected: 3, found: 2, .. })
            }
        ));

        let mut rules = RuleSet::new();
        let body: Vec<ClauseEntry> = (0..16)
            .map(|i| {
                let v = format!("v{}", i);
                ClauseEntry::Triple(triple!(var!(&v), uri!("q"), var!(&v)))
            })
            .collect();
        let mut head_and_twice = body.clone();
        head_and_twice.extend(body);
        rules.add_rule(Rule::new("big", triple!(var!("x"), uri!("p"), var!("y")), head_and_twice));
        let err = rules.compile(&BuiltinRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError {
                kind: ErrorKind::Compile(CompileError::TooComplex { .. })
            }
        ));
    }
}
