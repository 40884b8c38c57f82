use std::collections::HashMap;
use std::sync::Arc;

use crate::bindings::BindingManager;
use crate::builtins::RuleContext;
use crate::code::*;
use crate::config::LogLevel;
use crate::engine::Session;
use crate::error::{invalid_state, malformed, EngineResult};
use crate::frames::*;
use crate::generator::{Context, NextResult, Tables};
use crate::terms::*;

/// What one call to `Interpreter::next` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Answer {
    /// No further answers until a suspended consumer is resumed.
    Fail,
    Triple(Triple),
}

/// Outcome of retrying a choice point.
enum Resume {
    Pop,
    Answer(Triple),
    Continue { env: EnvId, pc: usize },
}

/// Outcome of one instruction.
enum Step {
    Next,
    Fail,
    /// A choice point was pushed; continue from it.
    Call,
    Proceed,
}

/// Unify a goal's argument registers with a triple, all or nothing.
fn unify_triple(bindings: &mut BindingManager, goal: &[Term; 3], triple: &Triple) -> bool {
    let mark = bindings.mark();
    let ok = bindings.unify(&goal[0], &triple.subject)
        && bindings.unify(&goal[1], &triple.predicate)
        && bindings.unify(&goal[2], &triple.object);
    if !ok {
        bindings.unwind(mark);
    }
    ok
}

/// Executes compiled clauses for one goal.
///
/// The interpreter runs until it has an answer for its goal or until its
/// choice stack is empty. Consumers that have to wait for a generator are
/// taken off the choice stack and reported to the interpreter's context,
/// which may later hand them back through `restore`.
pub(crate) struct Interpreter {
    goal: TriplePattern,
    context: Context,
    bindings: BindingManager,
    stack: FrameStack,
    args: Vec<Term>,
    temps: Vec<Option<Term>>,
    root: EnvId,
}

impl Interpreter {
    /// Set up an interpreter for `goal`.
    ///
    /// Variables and wildcards in the goal become fresh variables. A top
    /// level interpreter reads a tabled goal through its generator; every
    /// other interpreter calls the goal's clauses and matches the store
    /// directly.
    pub(crate) fn new(
        goal: &TriplePattern,
        context: Context,
        top: bool,
        session: &Session,
        tables: &mut Tables,
    ) -> EngineResult<Self> {
        let mut bindings = BindingManager::new();
        let mut names: HashMap<Term, Term> = HashMap::new();
        let standard = goal.map_vars(|t| match t {
            Term::Any => bindings.new_var(),
            _ => names
                .entry(t.clone())
                .or_insert_with(|| bindings.new_var())
                .clone(),
        });

        let mut stack = FrameStack::new(session.config.stack_limit);
        let root = stack.push_env(ClauseCode::return_block(), None, 0, None)?;
        if let Some(env) = stack.env_mut(root) {
            env.pvars = standard.terms().iter().map(|t| Some((*t).clone())).collect();
        }
        let mut args = vec![Term::Any; MAX_ARGUMENT_VARS];
        args[0] = standard.subject.clone();
        args[1] = standard.predicate.clone();
        args[2] = standard.object.clone();

        let mut interpreter = Self {
            goal: goal.clone(),
            context,
            bindings,
            stack,
            args,
            temps: vec![None; MAX_TEMPORARY_VARS],
            root,
        };

        let clauses = session.rules.code_for(&standard);
        let tabled = top && !clauses.is_empty() && session.rules.is_tabled(&standard.predicate);
        if tabled {
            interpreter.setup_tabled_call(root, 0, session, tables)?;
        } else {
            if !clauses.is_empty() {
                interpreter.setup_clause_call(root, 0, clauses, goal.is_ground())?;
            }
            let iter = session.store.find(&standard.lookup_key())?;
            let kind = ChoiceKind::TopTripleMatch {
                goal: [standard.subject.clone(), standard.predicate.clone(), standard.object.clone()],
                pattern: standard,
                iter,
            };
            interpreter
                .stack
                .push_choice(kind, root, 0, &interpreter.bindings)?;
        }
        Ok(interpreter)
    }

    /// Find the next answer.
    pub(crate) fn next(&mut self, session: &Session, tables: &mut Tables) -> EngineResult<Answer> {
        let answer = self.run(session, tables)?;
        if let Answer::Triple(t) = &answer {
            session.logger.log(LogLevel::Debug, || format!("RETURN: {}", t));
        }
        Ok(answer)
    }

    /// Continue from a suspended consumer. Only valid once the choice stack
    /// has been exhausted.
    pub(crate) fn restore(
        &mut self,
        consumer: crate::generator::ConsumerId,
        session: &Session,
        tables: &mut Tables,
    ) -> EngineResult<()> {
        if !self.stack.is_empty() {
            return invalid_state("restoring a consumer into a running interpreter");
        }
        let id = match tables.resume_consumer(consumer) {
            Some(id) => id,
            None => return invalid_state(format!("unknown consumer {}", consumer)),
        };
        self.bindings.unwind(0);
        self.stack.discard_unpinned(&mut self.bindings);
        let preserved = match self.stack.frame(id).map(|f| &f.kind) {
            Some(ChoiceKind::Consumer { preserved, .. }) => preserved.clone(),
            _ => return invalid_state(format!("consumer {} has no choice point", consumer)),
        };
        if let Some(preserved) = preserved {
            self.bindings.restore(&preserved.trail);
            self.stack.restore_envs(&preserved.envs);
        }
        // Everything below the consumer was exhausted before it came back.
        if let Some(frame) = self.stack.frame_mut(id) {
            frame.link = None;
        }
        self.stack.top = Some(id);
        session
            .logger
            .log(LogLevel::Trace, || format!("RESTORE consumer {} of {}", consumer, self.goal));
        Ok(())
    }

    fn run(&mut self, session: &Session, tables: &mut Tables) -> EngineResult<Answer> {
        'main: while let Some(id) = self.stack.top {
            let (mut env, mut pc) = match self.resume(id, session, tables)? {
                Resume::Pop => {
                    self.stack.pop();
                    continue 'main;
                }
                Resume::Answer(triple) => return Ok(Answer::Triple(triple)),
                Resume::Continue { env, pc } => (env, pc),
            };

            let mut clause = self.clause_of(env)?;
            loop {
                let instruction = match clause.code.get(pc) {
                    Some(instruction) => instruction,
                    None => return malformed(clause.name(), "code ends without PROCEED"),
                };
                pc += 1;
                match self.execute(instruction, &clause, env, pc, session, tables)? {
                    Step::Next => {}
                    Step::Call => continue 'main,
                    Step::Fail => {
                        session
                            .logger
                            .log(LogLevel::Trace, || format!("FAIL {}", clause.name()));
                        continue 'main;
                    }
                    Step::Proceed => {
                        session
                            .logger
                            .log(LogLevel::Trace, || format!("EXIT {}", clause.name()));
                        let (link, cpc, choice) = match self.stack.env(env) {
                            Some(frame) => (frame.link, frame.cpc, frame.choice),
                            None => return invalid_state("environment frame vanished"),
                        };
                        if let Some(ChoiceKind::Clause { succeeded, .. }) =
                            choice.and_then(|c| self.stack.frame_mut(c)).map(|f| &mut f.kind)
                        {
                            *succeeded = true;
                        }
                        match link {
                            Some(link) => {
                                env = link;
                                pc = cpc;
                                clause = self.clause_of(env)?;
                            }
                            None => return Ok(Answer::Triple(self.solution())),
                        }
                    }
                }
            }
        }
        Ok(Answer::Fail)
    }

    fn clause_of(&self, env: EnvId) -> EngineResult<Arc<ClauseCode>> {
        match self.stack.env(env) {
            Some(frame) => Ok(frame.clause.clone()),
            None => invalid_state(format!("no environment frame {}", env)),
        }
    }

    /// The goal as bound by the current proof. Unbound positions become
    /// wildcards.
    fn solution(&self) -> Triple {
        let pvars = self.stack.env(self.root).map(|e| e.pvars.as_slice()).unwrap_or(&[]);
        let term = |i: usize| match pvars.get(i) {
            Some(Some(t)) => self.bindings.resolve(t),
            _ => Term::Any,
        };
        Triple::new(term(0), term(1), term(2))
    }

    fn arg_trace(&self) -> String {
        format!(
            "{} {} {}",
            self.bindings.deref(&self.args[0]),
            self.bindings.deref(&self.args[1]),
            self.bindings.deref(&self.args[2])
        )
    }

    /// Retry the choice point `id` after backtracking to it.
    fn resume(&mut self, id: FrameId, session: &Session, tables: &mut Tables) -> EngineResult<Resume> {
        self.stack.rewind_to(id, &mut self.bindings);
        let frame = match self.stack.frame_mut(id) {
            Some(frame) => frame,
            None => return invalid_state(format!("no choice point {}", id)),
        };
        let (env, continuation) = (frame.env, frame.continuation);
        let logger = &session.logger;

        match &mut frame.kind {
            ChoiceKind::Clause {
                clauses,
                next,
                args,
                singleton,
                succeeded,
            } => {
                if *next >= clauses.len() || (*singleton && *succeeded) {
                    logger.log(LogLevel::Trace, || "FAIL choices exhausted");
                    return Ok(Resume::Pop);
                }
                let clause = clauses[*next].clone();
                *next += 1;
                self.args.clone_from(args);

                let new_env = self
                    .stack
                    .push_env(clause.clone(), Some(env), continuation, Some(id))?;
                if session.config.profile {
                    tables.note_entry(clause.id);
                }
                logger.log(LogLevel::Trace, || {
                    format!("ENTER {} : {}", clause.name(), self.arg_trace())
                });
                Ok(Resume::Continue {
                    env: new_env,
                    pc: 0,
                })
            }
            ChoiceKind::TripleMatch { goal, iter } => {
                for triple in iter.by_ref() {
                    if unify_triple(&mut self.bindings, goal, &triple) {
                        logger.log(LogLevel::Trace, || format!("TRIPLE match {}", triple));
                        return Ok(Resume::Continue {
                            env,
                            pc: continuation,
                        });
                    }
                }
                logger.log(LogLevel::Trace, || {
                    format!("TRIPLE match ({} {} {}) -> FAIL", goal[0], goal[1], goal[2])
                });
                Ok(Resume::Pop)
            }
            ChoiceKind::TopTripleMatch {
                goal,
                pattern,
                iter,
            } => {
                for triple in iter.by_ref() {
                    let mark = self.bindings.mark();
                    let matched = unify_triple(&mut self.bindings, goal, &triple);
                    self.bindings.unwind(mark);
                    if matched {
                        logger.log(LogLevel::Trace, || format!("TRIPLE match {} ->", pattern));
                        return Ok(Resume::Answer(triple));
                    }
                }
                logger.log(LogLevel::Trace, || format!("TRIPLE match {} -> FAIL", pattern));
                Ok(Resume::Pop)
            }
            ChoiceKind::Consumer {
                consumer,
                goal,
                preserved,
            } => {
                let consumer = *consumer;
                let goal = goal.clone();
                let saved = preserved.as_ref().map(|p| p.envs.clone());
                if let Some(saved) = saved {
                    self.stack.restore_envs(&saved);
                }
                self.consume(id, consumer, &goal, env, continuation, session, tables)
            }
        }
    }

    /// Take the next usable result for a consumer choice point, or suspend it.
    #[allow(clippy::too_many_arguments)]
    fn consume(
        &mut self,
        id: FrameId,
        consumer: crate::generator::ConsumerId,
        goal: &[Term; 3],
        env: EnvId,
        continuation: usize,
        session: &Session,
        tables: &mut Tables,
    ) -> EngineResult<Resume> {
        loop {
            match tables.next_result(consumer) {
                NextResult::Result(triple) => {
                    if unify_triple(&mut self.bindings, goal, &triple) {
                        return Ok(Resume::Continue {
                            env,
                            pc: continuation,
                        });
                    }
                }
                NextResult::Exhausted => {
                    tables.remove_consumer(consumer);
                    session
                        .logger
                        .log(LogLevel::Trace, || format!("FAIL consumer {}", consumer));
                    return Ok(Resume::Pop);
                }
                NextResult::Pending => {
                    let preserved = Preserved {
                        trail: self.bindings.snapshot(),
                        envs: self.stack.env_chain(env),
                    };
                    if let Some(ChoiceKind::Consumer { preserved: slot, .. }) =
                        self.stack.frame_mut(id).map(|f| &mut f.kind)
                    {
                        *slot = Some(preserved);
                    }
                    tables.notify_blocked(self.context, consumer);
                    self.stack.pin(&self.bindings);
                    session.logger.log(LogLevel::Trace, || {
                        format!("SUSPEND consumer {} in {}", consumer, self.goal)
                    });
                    return Ok(Resume::Pop);
                }
            }
        }
    }

    fn setup_clause_call(
        &mut self,
        env: EnvId,
        pc: usize,
        clauses: ClauseList,
        singleton: bool,
    ) -> EngineResult<()> {
        let kind = ChoiceKind::Clause {
            clauses,
            next: 0,
            args: self.args.clone(),
            singleton,
            succeeded: false,
        };
        self.stack.push_choice(kind, env, pc, &self.bindings)?;
        Ok(())
    }

    fn setup_triple_match(&mut self, env: EnvId, pc: usize, session: &Session) -> EngineResult<()> {
        let goal = [self.args[0].clone(), self.args[1].clone(), self.args[2].clone()];
        let pattern = Triple::new(
            self.bindings.deep_deref(&goal[0]),
            self.bindings.deep_deref(&goal[1]),
            self.bindings.deep_deref(&goal[2]),
        );
        let iter = session.store.find(&pattern.lookup_key())?;
        self.stack
            .push_choice(ChoiceKind::TripleMatch { goal, iter }, env, pc, &self.bindings)?;
        Ok(())
    }

    fn setup_tabled_call(
        &mut self,
        env: EnvId,
        pc: usize,
        session: &Session,
        tables: &mut Tables,
    ) -> EngineResult<()> {
        let goal = [self.args[0].clone(), self.args[1].clone(), self.args[2].clone()];
        let pattern = Triple::new(
            self.bindings.deep_deref(&goal[0]),
            self.bindings.deep_deref(&goal[1]),
            self.bindings.deep_deref(&goal[2]),
        );
        let generator = tables.generator_for(&pattern, session)?;
        let consumer = tables.add_consumer(generator, self.context);
        let kind = ChoiceKind::Consumer {
            consumer,
            goal,
            preserved: None,
        };
        let id = self.stack.push_choice(kind, env, pc, &self.bindings)?;
        tables.set_consumer_frame(consumer, id);
        Ok(())
    }

    fn ground_call(&self) -> bool {
        self.args[..3]
            .iter()
            .all(|a| self.bindings.deep_deref(a).is_ground())
    }

    fn arg(&self, clause: &ClauseCode, i: usize) -> EngineResult<Term> {
        match self.args.get(i) {
            Some(term) => Ok(term.clone()),
            None => malformed(clause.name(), format!("no argument register A{}", i)),
        }
    }

    fn set_arg(&mut self, clause: &ClauseCode, i: usize, term: Term) -> EngineResult<()> {
        match self.args.get_mut(i) {
            Some(slot) => {
                *slot = term;
                Ok(())
            }
            None => malformed(clause.name(), format!("no argument register A{}", i)),
        }
    }

    fn temp(&self, clause: &ClauseCode, i: usize) -> EngineResult<Term> {
        match self.temps.get(i) {
            Some(Some(term)) => Ok(term.clone()),
            _ => malformed(clause.name(), format!("temporary register T{} not set", i)),
        }
    }

    fn set_temp(&mut self, clause: &ClauseCode, i: usize, term: Term) -> EngineResult<()> {
        match self.temps.get_mut(i) {
            Some(slot) => {
                *slot = Some(term);
                Ok(())
            }
            None => malformed(clause.name(), format!("no temporary register T{}", i)),
        }
    }

    fn pvar(&self, clause: &ClauseCode, env: EnvId, slot: usize) -> EngineResult<Term> {
        match self.stack.env(env).and_then(|e| e.pvars.get(slot)) {
            Some(Some(term)) => Ok(term.clone()),
            _ => malformed(clause.name(), format!("permanent variable Y{} not set", slot)),
        }
    }

    fn set_pvar(&mut self, clause: &ClauseCode, env: EnvId, slot: usize, term: Term) -> EngineResult<()> {
        match self.stack.env_mut(env).and_then(|e| e.pvars.get_mut(slot)) {
            Some(var) => {
                *var = Some(term);
                Ok(())
            }
            None => malformed(clause.name(), format!("no permanent variable Y{}", slot)),
        }
    }

    fn unify_step(&mut self, left: &Term, right: &Term) -> Step {
        if self.bindings.unify(left, right) {
            Step::Next
        } else {
            Step::Fail
        }
    }

    fn execute(
        &mut self,
        instruction: &Instruction,
        clause: &ClauseCode,
        env: EnvId,
        pc: usize,
        session: &Session,
        tables: &mut Tables,
    ) -> EngineResult<Step> {
        use Instruction::*;
        match instruction {
            TestBound { arg } => {
                if self.bindings.deref(&self.arg(clause, *arg)?).is_var() {
                    return Ok(Step::Fail);
                }
            }
            TestUnbound { arg } => {
                if !self.bindings.deref(&self.arg(clause, *arg)?).is_var() {
                    return Ok(Step::Fail);
                }
            }
            GetVariable { slot, arg } => {
                let value = self.arg(clause, *arg)?;
                self.set_pvar(clause, env, *slot, value)?;
            }
            GetTemp { temp, arg } => {
                let value = self.arg(clause, *arg)?;
                self.set_temp(clause, *temp, value)?;
            }
            GetConstant { arg, constant } => {
                let value = self.arg(clause, *arg)?;
                return Ok(self.unify_step(&value, constant));
            }
            GetFunctor { functor } => {
                match self.bindings.deref(&self.arg(clause, 2)?) {
                    Term::Functor(found) if found.same_shape(functor) => {
                        for (i, a) in found.args.into_iter().enumerate() {
                            self.set_arg(clause, FUNCTOR_ARG_BASE + i, a)?;
                        }
                    }
                    Term::Ref(var) => {
                        let args: Vec<Term> = functor
                            .args
                            .iter()
                            .map(|t| if t.is_var() { self.bindings.new_var() } else { t.clone() })
                            .collect();
                        for (i, a) in args.iter().enumerate() {
                            self.set_arg(clause, FUNCTOR_ARG_BASE + i, a.clone())?;
                        }
                        self.bindings.bind(
                            var,
                            Term::Functor(Functor {
                                name: functor.name.clone(),
                                args,
                            }),
                        );
                    }
                    Term::Any | Term::Var(_) => {
                        for i in 0..functor.arity() {
                            let fresh = self.bindings.new_var();
                            self.set_arg(clause, FUNCTOR_ARG_BASE + i, fresh)?;
                        }
                    }
                    _ => return Ok(Step::Fail),
                }
            }
            UnifyVariable { slot, arg } => {
                let (value, var) = (self.arg(clause, *arg)?, self.pvar(clause, env, *slot)?);
                return Ok(self.unify_step(&value, &var));
            }
            UnifyTemp { temp, arg } => {
                let (value, var) = (self.arg(clause, *arg)?, self.temp(clause, *temp)?);
                return Ok(self.unify_step(&value, &var));
            }
            PutNewVariable { slot, arg } => {
                let var = self.bindings.new_var();
                self.set_pvar(clause, env, *slot, var.clone())?;
                self.set_arg(clause, *arg, var)?;
            }
            PutVariable { slot, arg } => {
                let var = self.pvar(clause, env, *slot)?;
                self.set_arg(clause, *arg, var)?;
            }
            PutDerefVariable { slot, arg } => {
                let value = self.bindings.deref(&self.pvar(clause, env, *slot)?);
                self.set_arg(clause, *arg, value)?;
            }
            PutTemp { temp, arg } => {
                let value = self.temp(clause, *temp)?;
                self.set_arg(clause, *arg, value)?;
            }
            PutConstant { arg, constant } => self.set_arg(clause, *arg, constant.clone())?,
            ClearArg { arg } => {
                let var = self.bindings.new_var();
                self.set_arg(clause, *arg, var)?;
            }
            MakeFunctor { functor } => {
                let args = (0..functor.arity())
                    .map(|i| self.arg(clause, FUNCTOR_ARG_BASE + i))
                    .collect::<EngineResult<Vec<Term>>>()?;
                self.set_arg(
                    clause,
                    2,
                    Term::Functor(Functor {
                        name: functor.name.clone(),
                        args,
                    }),
                )?;
            }
            CallPredicate { predicate } | LastCallPredicate { predicate } => {
                let clauses = session.rules.clauses_for(predicate);
                if !clauses.is_empty() {
                    let ground = self.ground_call();
                    self.setup_clause_call(env, pc, clauses, ground)?;
                }
                self.setup_triple_match(env, pc, session)?;
                return Ok(Step::Call);
            }
            CallPredicateIndex { predicate } => {
                let object = self.bindings.deref(&self.args[2]);
                let clauses = if object.is_var() {
                    session.rules.clauses_for(predicate)
                } else {
                    let subject = self.bindings.deref(&self.args[0]);
                    session
                        .rules
                        .code_for(&Triple::new(subject, predicate.clone(), object))
                };
                if !clauses.is_empty() {
                    self.setup_clause_call(env, pc, clauses, false)?;
                }
                self.setup_triple_match(env, pc, session)?;
                return Ok(Step::Call);
            }
            CallTripleMatch => {
                self.setup_triple_match(env, pc, session)?;
                return Ok(Step::Call);
            }
            CallTabled => {
                self.setup_tabled_call(env, pc, session, tables)?;
                return Ok(Step::Call);
            }
            CallWildTabled => {
                let predicate = self.bindings.deref(&self.args[1]);
                if session.rules.is_tabled(&predicate) {
                    self.setup_tabled_call(env, pc, session, tables)?;
                } else {
                    let pattern = Triple::new(
                        self.bindings.deref(&self.args[0]),
                        predicate,
                        self.bindings.deref(&self.args[2]),
                    );
                    let clauses = session.rules.code_for(&pattern);
                    if !clauses.is_empty() {
                        self.setup_clause_call(env, pc, clauses, false)?;
                    }
                    self.setup_triple_match(env, pc, session)?;
                }
                return Ok(Step::Call);
            }
            Proceed => return Ok(Step::Proceed),
            CallBuiltin { builtin, arity } => {
                let args = match self.args.get(..*arity) {
                    Some(args) => args.to_vec(),
                    None => {
                        return malformed(
                            clause.name(),
                            format!("{} called with {} arguments", builtin.name(), arity),
                        )
                    }
                };
                let mut context =
                    RuleContext::new(&mut self.bindings, &*session.store, clause.rule.as_deref());
                if !builtin.body_call(&args, &mut context)? {
                    session.logger.log(LogLevel::Trace, || {
                        format!("FAIL {}, due to {}", clause.name(), builtin.name())
                    });
                    return Ok(Step::Fail);
                }
            }
        }
        Ok(Step::Next)
    }
}
