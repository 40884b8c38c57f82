//! Environment and choice-point frames.
//!
//! Both kinds of frame live in arenas owned by one interpreter and refer to
//! each other by index. The choice stack is the chain of `link`s starting at
//! `FrameStack::top`; environment frames form the AND-chain through their own
//! `link`s. Frames above the current top are garbage, except that a suspended
//! consumer keeps every frame that existed when it suspended (the `pinned`
//! marks), since its state can be restored later.

use std::sync::Arc;

use crate::bindings::{BindingManager, TrailMark, TrailSnapshot};
use crate::code::{ClauseCode, ClauseList};
use crate::error::{EngineResult, RuntimeError};
use crate::generator::ConsumerId;
use crate::store::TripleIter;
use crate::terms::{Term, TriplePattern};

pub type FrameId = usize;
pub type EnvId = usize;

/// Arena sizes at some point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marks {
    pub frames: usize,
    pub envs: usize,
    pub vars: usize,
}

impl Marks {
    fn max(self, other: Marks) -> Marks {
        Marks {
            frames: self.frames.max(other.frames),
            envs: self.envs.max(other.envs),
            vars: self.vars.max(other.vars),
        }
    }
}

/// One active clause invocation.
#[derive(Debug)]
pub struct EnvFrame {
    pub clause: Arc<ClauseCode>,
    /// Permanent variables; `None` until first assigned.
    pub pvars: Vec<Option<Term>>,
    /// The caller's environment.
    pub link: Option<EnvId>,
    /// Where to continue in the caller's code.
    pub cpc: usize,
    /// The clause choice point this invocation was started from.
    pub choice: Option<FrameId>,
}

/// Interpreter state saved by a consumer when it suspends.
#[derive(Debug, Clone, Default)]
pub struct Preserved {
    pub trail: TrailSnapshot,
    pub envs: Vec<(EnvId, Vec<Option<Term>>)>,
}

pub enum ChoiceKind {
    /// Alternative clauses for a predicate call.
    Clause {
        clauses: ClauseList,
        next: usize,
        /// Argument registers at the time of the call.
        args: Vec<Term>,
        /// The goal was ground, so one successful clause is enough.
        singleton: bool,
        succeeded: bool,
    },
    /// Direct match against the triple store inside a clause body.
    TripleMatch {
        goal: [Term; 3],
        iter: TripleIter,
    },
    /// Direct match for the interpreter's own goal; matches are answers.
    TopTripleMatch {
        goal: [Term; 3],
        pattern: TriplePattern,
        iter: TripleIter,
    },
    /// Reads the results of a generator.
    Consumer {
        consumer: ConsumerId,
        goal: [Term; 3],
        preserved: Option<Preserved>,
    },
}


pub struct ChoiceFrame {
    pub link: Option<FrameId>,
    /// Environment to continue in when this choice point succeeds.
    pub env: EnvId,
    pub continuation: usize,
    pub trail_mark: TrailMark,
    /// Arena sizes when the frame was pushed.
    pub marks: Marks,
    pub kind: ChoiceKind,
}

/// The arenas of one interpreter plus the top of its choice stack.
#[derive(Default)]
pub struct FrameStack {
    envs: Vec<EnvFrame>,
    frames: Vec<ChoiceFrame>,
    pub top: Option<FrameId>,
    pinned: Marks,
    limit: usize,
}

impl FrameStack {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn push_env(
        &mut self,
        clause: Arc<ClauseCode>,
        link: Option<EnvId>,
        cpc: usize,
        choice: Option<FrameId>,
    ) -> EngineResult<EnvId> {
        if self.envs.len() >= self.limit {
            return Err(self.overflow());
        }
        let pvars = vec![None; clause.permanent_vars];
        self.envs.push(EnvFrame {
            clause,
            pvars,
            link,
            cpc,
            choice,
        });
        Ok(self.envs.len() - 1)
    }

    /// Push a choice point on top of the current one.
    pub fn push_choice(
        &mut self,
        kind: ChoiceKind,
        env: EnvId,
        continuation: usize,
        bindings: &BindingManager,
    ) -> EngineResult<FrameId> {
        if self.frames.len() >= self.limit {
            return Err(self.overflow());
        }
        let marks = Marks {
            frames: self.frames.len(),
            envs: self.envs.len(),
            vars: bindings.var_count(),
        };
        self.frames.push(ChoiceFrame {
            link: self.top,
            env,
            continuation,
            trail_mark: bindings.mark(),
            marks,
            kind,
        });
        let id = self.frames.len() - 1;
        self.top = Some(id);
        Ok(id)
    }

    fn overflow(&self) -> crate::error::EngineError {
        RuntimeError::StackOverflow {
            msg: format!(
                "more than {} frames ({} choice points, {} environments)",
                self.limit,
                self.frames.len(),
                self.envs.len()
            ),
        }
        .into()
    }

    /// Drop the top choice point.
    pub fn pop(&mut self) {
        if let Some(top) = self.top {
            self.top = self.frames.get(top).and_then(|f| f.link);
        }
    }

    /// Prepare to retry `id`: undo its trail and discard everything created
    /// since it was pushed, except what a suspended consumer still needs.
    pub fn rewind_to(&mut self, id: FrameId, bindings: &mut BindingManager) {
        let (trail_mark, marks) = match self.frames.get(id) {
            Some(f) => (f.trail_mark, f.marks),
            None => return,
        };
        bindings.unwind(trail_mark);
        let keep = Marks {
            frames: id + 1,
            ..marks
        }
        .max(self.pinned);
        self.frames.truncate(keep.frames);
        self.envs.truncate(keep.envs);
        bindings.reclaim(keep.vars);
    }

    /// Keep everything that currently exists.
    pub fn pin(&mut self, bindings: &BindingManager) {
        self.pinned = Marks {
            frames: self.frames.len(),
            envs: self.envs.len(),
            vars: bindings.var_count(),
        };
    }

    /// Discard everything that is not pinned. Only valid when the choice
    /// stack is empty.
    pub fn discard_unpinned(&mut self, bindings: &mut BindingManager) {
        self.frames.truncate(self.pinned.frames);
        self.envs.truncate(self.pinned.envs);
        bindings.reclaim(self.pinned.vars);
    }

    pub fn frame(&self, id: FrameId) -> Option<&ChoiceFrame> {
        self.frames.get(id)
    }

    pub fn frame_mut(&mut self, id: FrameId) -> Option<&mut ChoiceFrame> {
        self.frames.get_mut(id)
    }

    pub fn env(&self, id: EnvId) -> Option<&EnvFrame> {
        self.envs.get(id)
    }

    pub fn env_mut(&mut self, id: EnvId) -> Option<&mut EnvFrame> {
        self.envs.get_mut(id)
    }

    /// Permanent variables of `env` and every environment it links to.
    pub fn env_chain(&self, env: EnvId) -> Vec<(EnvId, Vec<Option<Term>>)> {
        let mut chain = vec![];
        let mut current = Some(env);
        while let Some(id) = current {
            match self.envs.get(id) {
                Some(frame) => {
                    chain.push((id, frame.pvars.clone()));
                    current = frame.link;
                }
                None => break,
            }
        }
        chain
    }

    pub fn restore_envs(&mut self, saved: &[(EnvId, Vec<Option<Term>>)]) {
        for (id, pvars) in saved {
            if let Some(frame) = self.envs.get_mut(*id) {
                frame.pvars = pvars.clone();
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[cfg(test)]
    pub fn env_count(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause_kind() -> ChoiceKind {
        ChoiceKind::Clause {
            clauses: Arc::from(Vec::<Arc<ClauseCode>>::new()),
            next: 0,
            args: vec![],
            singleton: false,
            succeeded: false,
        }
    }

    #[test]
    fn test_rewind_discards_newer_frames() {
        let mut b = BindingManager::new();
        let mut stack = FrameStack::new(100);
        let root = stack.push_env(ClauseCode::return_block(), None, 0, None).unwrap();
        let x = b.new_var();
        let first = stack.push_choice(clause_kind(), root, 0, &b).unwrap();

        let y = b.new_var();
        assert!(b.unify(&x, &y));
        stack.push_env(ClauseCode::return_block(), Some(root), 0, Some(first)).unwrap();
        stack.push_choice(clause_kind(), root, 0, &b).unwrap();
        assert_eq!(stack.len(), 2);

        stack.pop();
        stack.rewind_to(first, &mut b);
        assert_eq!(stack.top, Some(first));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.env_count(), 1);
        assert_eq!(b.var_count(), 1);
        assert_eq!(b.deref(&x), x);
    }

    #[test]
    fn test_pinned_frames_survive() {
        let mut b = BindingManager::new();
        let mut stack = FrameStack::new(100);
        let root = stack.push_env(ClauseCode::return_block(), None, 0, None).unwrap();
        let first = stack.push_choice(clause_kind(), root, 0, &b).unwrap();
        let second = stack.push_choice(clause_kind(), root, 3, &b).unwrap();
        b.new_var();
        stack.pin(&b);

        stack.pop();
        stack.rewind_to(first, &mut b);
        assert_eq!(stack.len(), 2);
        assert_eq!(b.var_count(), 1);
        assert_eq!(stack.frame(second).map(|f| f.continuation), Some(3));

        stack.pop();
        assert!(stack.is_empty());
        stack.discard_unpinned(&mut b);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_stack_limit() {
        let b = BindingManager::new();
        let mut stack = FrameStack::new(2);
        let root = stack.push_env(ClauseCode::return_block(), None, 0, None).unwrap();
        stack.push_choice(clause_kind(), root, 0, &b).unwrap();
        stack.push_choice(clause_kind(), root, 0, &b).unwrap();
        let err = stack.push_choice(clause_kind(), root, 0, &b).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_env_chain() {
        let mut stack = FrameStack::new(10);
        let root = stack.push_env(ClauseCode::return_block(), None, 0, None).unwrap();
        let child = stack.push_env(ClauseCode::return_block(), Some(root), 0, None).unwrap();
        stack.env_mut(child).unwrap().pvars[0] = Some(uri!("a"));
        let saved = stack.env_chain(child);
        assert_eq!(saved.len(), 2);

        stack.env_mut(child).unwrap().pvars[0] = Some(uri!("b"));
        stack.restore_envs(&saved);
        assert_eq!(stack.env(child).unwrap().pvars[0], Some(uri!("a")));
    }
}
