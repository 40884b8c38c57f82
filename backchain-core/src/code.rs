//! The instruction set executed by the interpreter.
//!
//! Each compiled clause is a flat instruction vector over three register
//! files: argument registers `A` (0..2 carry subject/predicate/object of a
//! call, 3.. carry functor arguments), temporary registers `T` and the
//! permanent variables `Y` of the clause's environment frame. Constants are
//! carried inline, so a continuation is just an instruction index.

use std::fmt;
use std::sync::Arc;

use crate::builtins::Builtin;
use crate::rules::Rule;
use crate::terms::{Functor, Term};

/// Permanent variables allowed in one clause.
pub const MAX_PERMANENT_VARS: usize = 15;
/// Argument registers, including functor argument slots.
pub const MAX_ARGUMENT_VARS: usize = 8;
/// Temporary registers allowed in one clause.
pub const MAX_TEMPORARY_VARS: usize = 8;
/// First argument register used for functor arguments.
pub const FUNCTOR_ARG_BASE: usize = 3;

#[derive(Clone, Debug)]
pub enum Instruction {
    /// Fail unless `A[arg]` is bound.
    TestBound { arg: usize },
    /// Fail unless `A[arg]` is unbound.
    TestUnbound { arg: usize },
    /// `Y[slot] = A[arg]`, first occurrence of a permanent variable.
    GetVariable { slot: usize, arg: usize },
    /// `T[temp] = A[arg]`, first occurrence of a temporary variable.
    GetTemp { temp: usize, arg: usize },
    /// Unify `A[arg]` with a constant.
    GetConstant { arg: usize, constant: Term },
    /// Match or build a functor of this shape in `A[2]`, exposing its
    /// arguments in `A[3..]`.
    GetFunctor { functor: Functor },
    /// Unify `A[arg]` with `Y[slot]`.
    UnifyVariable { slot: usize, arg: usize },
    /// Unify `A[arg]` with `T[temp]`.
    UnifyTemp { temp: usize, arg: usize },
    /// `A[arg] = Y[slot] = fresh variable`.
    PutNewVariable { slot: usize, arg: usize },
    PutVariable { slot: usize, arg: usize },
    /// `A[arg] = deref(Y[slot])`, used ahead of builtin calls.
    PutDerefVariable { slot: usize, arg: usize },
    PutTemp { temp: usize, arg: usize },
    PutConstant { arg: usize, constant: Term },
    /// `A[arg] = fresh variable`.
    ClearArg { arg: usize },
    /// `A[2] = name(A[3], .., A[3 + arity - 1])`.
    MakeFunctor { functor: Functor },
    /// Call the clauses of `predicate` plus a direct triple match.
    CallPredicate { predicate: Term },
    /// As `CallPredicate`, emitted when the caller has no permanent variables.
    LastCallPredicate { predicate: Term },
    /// As `CallPredicate`, narrowing the clauses on a bound object at run time.
    CallPredicateIndex { predicate: Term },
    /// Match the triple store only.
    CallTripleMatch,
    /// Consume the memoized results of the goal in `A[0..3]`.
    CallTabled,
    /// Variable predicate: decide between a tabled and a direct call once
    /// the predicate is known.
    CallWildTabled,
    /// Return to the caller's continuation.
    Proceed,
    CallBuiltin { builtin: Arc<dyn Builtin>, arity: usize },
}

/// The compiled code of one rule clause.
pub struct ClauseCode {
    /// Position in the rule store, used to key profiling counts.
    pub id: usize,
    /// None for the synthetic clause at the root of every interpreter.
    pub rule: Option<Arc<Rule>>,
    pub code: Vec<Instruction>,
    pub permanent_vars: usize,
}

pub type ClauseList = Arc<[Arc<ClauseCode>]>;

impl ClauseCode {
    /// The clause run by the root environment of an interpreter: its three
    /// permanent variables hold the goal and it returns immediately.
    pub fn return_block() -> Arc<ClauseCode> {
        Arc::new(ClauseCode {
            id: usize::MAX,
            rule: None,
            code: vec![Instruction::Proceed],
            permanent_vars: 3,
        })
    }

    pub fn name(&self) -> &str {
        self.rule.as_ref().map(|r| r.name.as_str()).unwrap_or("anon")
    }
}

impl fmt::Debug for ClauseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClauseCode")
            .field("id", &self.id)
            .field("rule", &self.name())
            .field("code", &self.code)
            .finish()
    }
}
