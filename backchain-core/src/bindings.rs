/// Manage binding state in the interpreter.
///
/// Runtime variables live in a flat slot vector; every binding is recorded on
/// a trail so that backtracking can undo it.
use crate::terms::{Functor, Term, Var};

pub type TrailMark = usize;

/// A saved trail: each variable bound since the bottom of the trail and the
/// value it held.
pub type TrailSnapshot = Vec<(Var, Term)>;

/// The `BindingManager` owns the variables of one interpreter.
///
/// A variable is either unbound (`None`) or bound to a term, which may itself
/// be another variable. Dereferencing follows such alias chains to the first
/// non-variable term or to the last unbound variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingManager {
    slots: Vec<Option<Term>>,
    trail: Vec<Var>,
}

impl BindingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_var(&mut self) -> Term {
        let var = Var(self.slots.len() as u32);
        self.slots.push(None);
        Term::Ref(var)
    }

    pub fn var_count(&self) -> usize {
        self.slots.len()
    }

    pub fn value(&self, var: Var) -> Option<&Term> {
        self.slots.get(var.index()).and_then(|slot| slot.as_ref())
    }

    /// Bind an unbound variable, recording it on the trail.
    pub fn bind(&mut self, var: Var, value: Term) {
        if let Some(slot) = self.slots.get_mut(var.index()) {
            *slot = Some(value);
            self.trail.push(var);
        }
    }

    /// Follow variable bindings to a non-variable or an unbound variable.
    pub fn deref(&self, term: &Term) -> Term {
        let mut current = term;
        while let Term::Ref(var) = current {
            match self.value(*var) {
                Some(value) => current = value,
                None => break,
            }
        }
        current.clone()
    }

    /// Dereference through functor arguments as well.
    pub fn deep_deref(&self, term: &Term) -> Term {
        match self.deref(term) {
            Term::Functor(f) => Term::Functor(Functor {
                name: f.name,
                args: f.args.iter().map(|a| self.deep_deref(a)).collect(),
            }),
            t => t,
        }
    }

    /// Dereference for output: unbound variables become wildcards.
    pub fn resolve(&self, term: &Term) -> Term {
        match self.deref(term) {
            Term::Ref(_) | Term::Var(_) => Term::Any,
            Term::Functor(f) => Term::Functor(Functor {
                name: f.name,
                args: f.args.iter().map(|a| self.resolve(a)).collect(),
            }),
            t => t,
        }
    }

    pub fn is_bound(&self, term: &Term) -> bool {
        !self.deref(term).is_var()
    }

    /// Unify two terms.
    ///
    /// Either the unification succeeds and its bindings stay on the trail, or
    /// it fails and the trail is exactly as it was before the call.
    pub fn unify(&mut self, left: &Term, right: &Term) -> bool {
        let mark = self.mark();
        if self.unify_inner(left, right) {
            true
        } else {
            self.unwind(mark);
            false
        }
    }

    fn unify_inner(&mut self, left: &Term, right: &Term) -> bool {
        let left = self.deref(left);
        let right = self.deref(right);
        match (left, right) {
            (Term::Any, _) | (_, Term::Any) | (Term::Var(_), _) | (_, Term::Var(_)) => true,
            (Term::Ref(l), Term::Ref(r)) => {
                // Bind the younger variable to the older one.
                if l != r {
                    if l > r {
                        self.bind(l, Term::Ref(r));
                    } else {
                        self.bind(r, Term::Ref(l));
                    }
                }
                true
            }
            (Term::Ref(var), value) | (value, Term::Ref(var)) => {
                self.bind(var, value);
                true
            }
            (Term::Functor(l), Term::Functor(r)) => {
                l.same_shape(&r)
                    && l
                        .args
                        .iter()
                        .zip(r.args.iter())
                        .all(|(a, b)| self.unify_inner(a, b))
            }
            (l, r) => l == r,
        }
    }

    pub fn mark(&self) -> TrailMark {
        self.trail.len()
    }

    /// Undo every binding made since `mark`.
    pub fn unwind(&mut self, mark: TrailMark) {
        while self.trail.len() > mark {
            if let Some(var) = self.trail.pop() {
                if let Some(slot) = self.slots.get_mut(var.index()) {
                    *slot = None;
                }
            }
        }
    }

    /// Forget variables created after `count` variables existed.
    ///
    /// Only valid once the trail has been unwound past every binding that
    /// could mention them.
    pub fn reclaim(&mut self, count: usize) {
        if count < self.slots.len() {
            self.slots.truncate(count);
        }
    }

    pub fn snapshot(&self) -> TrailSnapshot {
        self.trail
            .iter()
            .filter_map(|var| self.value(*var).map(|value| (*var, value.clone())))
            .collect()
    }

    /// Replace the whole trail with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: &[(Var, Term)]) {
        self.unwind(0);
        for (var, value) in snapshot {
            self.bind(*var, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn var_of(term: &Term) -> Var {
        match term {
            Term::Ref(v) => *v,
            _ => panic!("not a variable: {:?}", term),
        }
    }

    #[test]
    fn test_bind_and_deref_chain() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        let y = b.new_var();
        let z = b.new_var();

        assert!(b.unify(&z, &y));
        assert!(b.unify(&y, &x));
        // Younger variables point at older ones.
        assert_eq!(b.value(var_of(&z)), Some(&y));
        assert_eq!(b.deref(&z), x);

        assert!(b.unify(&x, &uri!("a")));
        assert_eq!(b.deref(&z), uri!("a"));
        assert_eq!(b.resolve(&z), uri!("a"));
    }

    #[test]
    fn test_failed_unification_leaves_no_bindings() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        let y = b.new_var();
        let before = b.clone();

        let left = functor!("f", x.clone(), y.clone(), uri!("c"));
        let right = functor!("f", uri!("a"), uri!("b"), uri!("d"));
        assert!(!b.unify(&left, &right));
        assert_eq!(b, before);

        let right = functor!("f", uri!("a"), uri!("b"), uri!("c"));
        assert!(b.unify(&left, &right));
        assert_eq!(b.deref(&x), uri!("a"));
        assert_eq!(b.deref(&y), uri!("b"));
    }

    #[test]
    fn test_unwind_restores_exact_state() {
        let mut b = BindingManager::new();
        let vars: Vec<Term> = (0..6).map(|_| b.new_var()).collect();
        assert!(b.unify(&vars[0], &lit!(1)));
        assert!(b.unify(&vars[1], &vars[2]));

        let mark = b.mark();
        let at_mark = b.clone();

        assert!(b.unify(&vars[3], &vars[2]));
        assert!(b.unify(&vars[2], &lit!(2)));
        assert!(b.unify(&vars[4], &functor!("g", vars[5].clone())));
        assert!(b.unify(&vars[5], &uri!("x")));
        assert_eq!(b.deref(&vars[1]), lit!(2));

        b.unwind(mark);
        assert_eq!(b, at_mark);

        // Unwinding again is a no-op.
        b.unwind(mark);
        assert_eq!(b, at_mark);
    }

    #[test]
    fn test_wildcards_never_bind() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        assert!(b.unify(&x, &Term::Any));
        assert!(b.unify(&Term::Any, &uri!("a")));
        assert_eq!(b.mark(), 0);
        assert_eq!(b.resolve(&functor!("f", x)), functor!("f", Term::Any));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        let y = b.new_var();
        assert!(b.unify(&x, &uri!("a")));
        assert!(b.unify(&y, &x));
        let snapshot = b.snapshot();
        let saved = b.clone();

        b.unwind(0);
        assert!(b.unify(&y, &uri!("other")));
        b.restore(&snapshot);
        assert_eq!(b, saved);
        assert_eq!(b.deref(&y), uri!("a"));
    }

    #[test]
    fn test_reclaim() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        let count = b.var_count();
        let y = b.new_var();
        assert!(b.unify(&x, &y));
        b.unwind(0);
        b.reclaim(count);
        assert_eq!(b.var_count(), 1);
        assert_eq!(b.deref(&x), x);
    }

    const VARS: usize = 6;

    #[derive(Clone, Debug)]
    enum Op {
        Mark,
        Unwind,
        BindConstant(usize, i64),
        BindFunctor(usize, i64),
        Alias(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Mark),
            Just(Op::Unwind),
            (0..VARS, 0..3i64).prop_map(|(v, c)| Op::BindConstant(v, c)),
            (0..VARS, 0..3i64).prop_map(|(v, c)| Op::BindFunctor(v, c)),
            (0..VARS, 0..VARS).prop_map(|(a, b)| Op::Alias(a, b)),
        ]
    }

    proptest! {
        #[test]
        fn test_unwind_returns_to_every_mark(ops in prop::collection::vec(op(), 1..64)) {
            let mut b = BindingManager::new();
            let vars: Vec<Term> = (0..VARS).map(|_| b.new_var()).collect();
            let mut marks = vec![(b.mark(), b.clone())];
            for op in ops {
                match op {
                    Op::Mark => marks.push((b.mark(), b.clone())),
                    Op::Unwind => {
                        let (mark, state) = if marks.len() > 1 {
                            marks.pop().unwrap()
                        } else {
                            marks[0].clone()
                        };
                        b.unwind(mark);
                        prop_assert_eq!(&b, &state);
                    }
                    Op::BindConstant(v, c) => {
                        b.unify(&vars[v], &lit!(c));
                    }
                    Op::BindFunctor(v, c) => {
                        b.unify(&vars[v], &functor!("f", lit!(c)));
                    }
                    Op::Alias(x, y) => {
                        b.unify(&vars[x], &vars[y]);
                    }
                }
            }
            while let Some((mark, state)) = marks.pop() {
                b.unwind(mark);
                prop_assert_eq!(&b, &state);
            }
            prop_assert_eq!(b.mark(), 0);
        }

        #[test]
        fn test_restore_replays_snapshot(ops in prop::collection::vec(op(), 1..32)) {
            let mut b = BindingManager::new();
            let vars: Vec<Term> = (0..VARS).map(|_| b.new_var()).collect();
            for op in ops {
                match op {
                    Op::BindConstant(v, c) => {
                        b.unify(&vars[v], &lit!(c));
                    }
                    Op::BindFunctor(v, c) => {
                        b.unify(&vars[v], &functor!("f", lit!(c)));
                    }
                    Op::Alias(x, y) => {
                        b.unify(&vars[x], &vars[y]);
                    }
                    Op::Mark | Op::Unwind => {}
                }
            }
            let snapshot = b.snapshot();
            let saved = b.clone();
            b.unwind(0);
            prop_assert!(vars.iter().all(|v| !b.is_bound(v)));
            b.restore(&snapshot);
            prop_assert_eq!(&b, &saved);
        }
    }
}
