//! Builtin predicates callable from rule bodies.
//!
//! A builtin receives the argument registers of the call and a `RuleContext`.
//! Returning `Ok(false)` is ordinary goal failure; an `Err` is a fault that
//! aborts the query.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bindings::BindingManager;
use crate::error::{EngineResult, RuntimeError};
use crate::rules::Rule;
use crate::store::TripleStore;
use crate::terms::{Node, Term, Triple};

/// Access to the interpreter state from inside a builtin.
pub struct RuleContext<'a> {
    bindings: &'a mut BindingManager,
    store: &'a dyn TripleStore,
    rule: Option<&'a Rule>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        bindings: &'a mut BindingManager,
        store: &'a dyn TripleStore,
        rule: Option<&'a Rule>,
    ) -> Self {
        Self {
            bindings,
            store,
            rule,
        }
    }

    pub fn deref(&self, term: &Term) -> Term {
        self.bindings.deep_deref(term)
    }

    pub fn is_bound(&self, term: &Term) -> bool {
        self.bindings.is_bound(term)
    }

    /// Unify on the interpreter trail, so bindings are undone on backtracking.
    pub fn unify(&mut self, left: &Term, right: &Term) -> bool {
        self.bindings.unify(left, right)
    }

    pub fn store(&self) -> &dyn TripleStore {
        self.store
    }

    /// The rule whose body is running, if any.
    pub fn rule(&self) -> Option<&Rule> {
        self.rule
    }
}

pub trait Builtin: Send + Sync {
    fn name(&self) -> &str;

    /// Expected argument count, or 0 if any count is accepted.
    fn arity(&self) -> usize {
        0
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool>;
}

impl fmt::Debug for dyn Builtin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.name(), self.arity())
    }
}

#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    builtins: HashMap<String, Arc<dyn Builtin>>,
}

impl BuiltinRegistry {
    /// A registry with no builtins at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the standard builtins.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Equal));
        registry.register(Arc::new(NotEqual));
        registry.register(Arc::new(Bound));
        registry.register(Arc::new(Unbound));
        registry.register(Arc::new(Compare::LessThan));
        registry.register(Arc::new(Compare::GreaterThan));
        registry.register(Arc::new(Sum));
        registry.register(Arc::new(NoValue));
        registry
    }

    /// Register a builtin, replacing any existing one of the same name.
    pub fn register(&mut self, builtin: Arc<dyn Builtin>) {
        self.builtins.insert(builtin.name().to_string(), builtin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Builtin>> {
        self.builtins.get(name).cloned()
    }
}

impl fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.builtins.keys().collect();
        names.sort();
        f.debug_struct("BuiltinRegistry")
            .field("builtins", &names)
            .finish()
    }
}

fn integer(context: &RuleContext, term: &Term) -> Option<i64> {
    context.deref(term).as_node().and_then(Node::as_integer)
}

fn fault(builtin: &dyn Builtin, context: &RuleContext, msg: String) -> RuntimeError {
    let msg = match context.rule() {
        Some(rule) => format!("{} (in rule {})", msg, rule.name),
        None => msg,
    };
    RuntimeError::Builtin {
        name: builtin.name().to_string(),
        msg,
    }
}

/// `equal(?a, ?b)`: both bound and the same value.
struct Equal;

impl Builtin for Equal {
    fn name(&self) -> &str {
        "equal"
    }

    fn arity(&self) -> usize {
        2
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        let (a, b) = (context.deref(&args[0]), context.deref(&args[1]));
        Ok(a.is_ground() && a == b)
    }
}

/// `notEqual(?a, ?b)`: both bound and different values.
struct NotEqual;

impl Builtin for NotEqual {
    fn name(&self) -> &str {
        "notEqual"
    }

    fn arity(&self) -> usize {
        2
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        let (a, b) = (context.deref(&args[0]), context.deref(&args[1]));
        Ok(a.is_ground() && b.is_ground() && a != b)
    }
}

struct Bound;

impl Builtin for Bound {
    fn name(&self) -> &str {
        "bound"
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        Ok(args.iter().all(|a| context.is_bound(a)))
    }
}

struct Unbound;

impl Builtin for Unbound {
    fn name(&self) -> &str {
        "unbound"
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        Ok(args.iter().all(|a| !context.is_bound(a)))
    }
}

enum Compare {
    LessThan,
    GreaterThan,
}

impl Builtin for Compare {
    fn name(&self) -> &str {
        match self {
            Self::LessThan => "lessThan",
            Self::GreaterThan => "greaterThan",
        }
    }

    fn arity(&self) -> usize {
        2
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        match (integer(context, &args[0]), integer(context, &args[1])) {
            (Some(a), Some(b)) => Ok(match self {
                Self::LessThan => a < b,
                Self::GreaterThan => a > b,
            }),
            _ => Ok(false),
        }
    }
}

/// `sum(?a, ?b, ?c)`: binds or checks `?c` against `?a + ?b`.
struct Sum;

impl Builtin for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn arity(&self) -> usize {
        3
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        let (a, b) = match (integer(context, &args[0]), integer(context, &args[1])) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(false),
        };
        let total = a
            .checked_add(b)
            .ok_or_else(|| fault(self, context, format!("integer overflow adding {} and {}", a, b)))?;
        Ok(context.unify(&args[2], &lit!(total)))
    }
}

/// `noValue(?s, ?p)` or `noValue(?s, ?p, ?o)`: no stored triple matches.
struct NoValue;

impl Builtin for NoValue {
    fn name(&self) -> &str {
        "noValue"
    }

    fn body_call(&self, args: &[Term], context: &mut RuleContext<'_>) -> EngineResult<bool> {
        if args.len() != 2 && args.len() != 3 {
            let msg = format!("expected 2 or 3 arguments, got {}", args.len());
            return Err(fault(self, context, msg).into());
        }
        let object = args.get(2).map(|o| context.deref(o)).unwrap_or(Term::Any);
        let pattern = Triple::new(context.deref(&args[0]), context.deref(&args[1]), object);
        Ok(!context.store().contains(&pattern)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, ErrorKind};
    use crate::store::MemoryGraph;

    fn call(name: &str, args: &[Term], bindings: &mut BindingManager) -> EngineResult<bool> {
        let store = MemoryGraph::with_triples(vec![triple!(uri!("a"), uri!("p"), uri!("b"))])?;
        let registry = BuiltinRegistry::new();
        let builtin = registry.get(name).expect("builtin registered");
        let mut context = RuleContext::new(bindings, &store, None);
        builtin.body_call(args, &mut context)
    }

    #[test]
    fn test_comparisons() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        assert!(call("equal", &[uri!("a"), uri!("a")], &mut b).unwrap());
        assert!(!call("equal", &[x.clone(), x.clone()], &mut b).unwrap());
        assert!(call("notEqual", &[uri!("a"), uri!("b")], &mut b).unwrap());
        assert!(!call("notEqual", &[uri!("a"), x.clone()], &mut b).unwrap());
        assert!(call("lessThan", &[lit!(1), lit!(2)], &mut b).unwrap());
        assert!(!call("greaterThan", &[lit!(1), lit!(2)], &mut b).unwrap());
        assert!(!call("lessThan", &[lit!("1"), lit!(2)], &mut b).unwrap());
    }

    #[test]
    fn test_sum_binds_result() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        assert!(call("sum", &[lit!(2), lit!(3), x.clone()], &mut b).unwrap());
        assert_eq!(b.deref(&x), lit!(5));
        assert!(!call("sum", &[lit!(2), lit!(3), lit!(6)], &mut b).unwrap());

        let err = call("sum", &[lit!(i64::MAX), lit!(1), Term::Any], &mut b).unwrap_err();
        assert!(matches!(
            err,
            EngineError {
                kind: ErrorKind::Runtime(RuntimeError::Builtin { .. })
            }
        ));
    }

    #[test]
    fn test_bound_and_no_value() {
        let mut b = BindingManager::new();
        let x = b.new_var();
        assert!(call("unbound", &[x.clone()], &mut b).unwrap());
        assert!(!call("bound", &[x.clone(), uri!("a")], &mut b).unwrap());
        assert!(!call("noValue", &[uri!("a"), uri!("p")], &mut b).unwrap());
        assert!(call("noValue", &[uri!("a"), uri!("p"), uri!("c")], &mut b).unwrap());
        assert!(call("noValue", &[uri!("b"), x], &mut b).unwrap());
    }
}
