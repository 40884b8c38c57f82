use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::sync::Arc;

/// A named rule or query variable.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Handle to a runtime logic variable in a `BindingManager`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Var(pub u32);

impl Var {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Literal {
    String(Arc<str>),
    Integer(i64),
    Boolean(bool),
}

/// A ground RDF term.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Node {
    Uri(Arc<str>),
    Blank(Arc<str>),
    Literal(Literal),
}

impl Node {
    pub fn uri(s: &str) -> Self {
        Self::Uri(s.into())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Literal(Literal::Integer(i)) => Some(*i),
            _ => None,
        }
    }
}

/// A compound term: a name plus a fixed-arity argument list.
///
/// Functors may appear in the object position of triples and as builtin
/// calls in rule bodies.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Functor {
    pub name: Symbol,
    pub args: Vec<Term>,
}

impl Functor {
    pub fn new(name: &str, args: Vec<Term>) -> Self {
        Self {
            name: Symbol::new(name),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Same name and arity.
    pub fn same_shape(&self, other: &Functor) -> bool {
        self.name == other.name && self.args.len() == other.args.len()
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Node(Node),
    /// Named variable in a query or rule pattern.
    Var(Symbol),
    /// Runtime variable, only meaningful against the binding store that created it.
    Ref(Var),
    Functor(Functor),
    /// Wildcard. Matches anything without binding; stands for an unbound
    /// position in a derived triple.
    Any,
}

impl Term {
    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var(_) | Self::Ref(_) | Self::Any)
    }

    pub fn is_ground(&self) -> bool {
        match self {
            Self::Node(_) => true,
            Self::Functor(f) => f.args.iter().all(Term::is_ground),
            _ => false,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Rebuild the term, replacing every variable-like leaf through `f`.
    pub fn map_vars<F>(&self, f: &mut F) -> Term
    where
        F: FnMut(&Term) -> Term,
    {
        match self {
            Self::Node(_) => self.clone(),
            Self::Functor(func) => Self::Functor(Functor {
                name: func.name.clone(),
                args: func.args.iter().map(|a| a.map_vars(f)).collect(),
            }),
            _ => f(self),
        }
    }

    /// The shape used to query a triple store: anything that is not ground
    /// becomes a wildcard.
    pub fn lookup_key(&self) -> Term {
        if self.is_ground() {
            self.clone()
        } else {
            Self::Any
        }
    }

    /// Does a (ground) stored term satisfy this lookup pattern?
    pub fn admits(&self, value: &Term) -> bool {
        match self {
            Self::Node(_) => self == value,
            Self::Functor(f) => match value {
                Self::Functor(g) => {
                    f.same_shape(g) && f.args.iter().zip(&g.args).all(|(a, b)| a.admits(b))
                }
                _ => false,
            },
            _ => true,
        }
    }
}

impl From<Node> for Term {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Functor> for Term {
    fn from(f: Functor) -> Self {
        Self::Functor(f)
    }
}

/// A triple, or a triple pattern when any position is not ground.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

pub type TriplePattern = Triple;

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    pub fn terms(&self) -> [&Term; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    pub fn is_ground(&self) -> bool {
        self.terms().iter().all(|t| t.is_ground())
    }

    pub fn map_vars<F>(&self, mut f: F) -> Triple
    where
        F: FnMut(&Term) -> Term,
    {
        Triple {
            subject: self.subject.map_vars(&mut f),
            predicate: self.predicate.map_vars(&mut f),
            object: self.object.map_vars(&mut f),
        }
    }

    /// Canonical form shared by all alphabetic variants of this pattern.
    ///
    /// Variables are renamed `_0`, `_1`, ... in order of first occurrence and
    /// every wildcard gets a name of its own, so `(?a p ?b)` and `(?x p _)`
    /// share a key while `(?x p ?x)` does not.
    pub fn variant_key(&self) -> Triple {
        let mut names: HashMap<Term, Term> = HashMap::new();
        let mut next = 0;
        let fresh = |next: &mut usize| {
            let t = Term::Var(Symbol::new(&format!("_{}", next)));
            *next += 1;
            t
        };
        self.map_vars(|t| match t {
            Term::Any => fresh(&mut next),
            _ => {
                if let Some(name) = names.get(t) {
                    name.clone()
                } else {
                    let name = fresh(&mut next);
                    names.insert(t.clone(), name.clone());
                    name
                }
            }
        })
    }

    pub fn lookup_key(&self) -> Triple {
        Triple {
            subject: self.subject.lookup_key(),
            predicate: self.predicate.lookup_key(),
            object: self.object.lookup_key(),
        }
    }

    pub fn admits(&self, triple: &Triple) -> bool {
        self.subject.admits(&triple.subject)
            && self.predicate.admits(&triple.predicate)
            && self.object.admits(&triple.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_key() {
        let a = triple!(var!("a"), uri!("p"), var!("b"));
        let b = triple!(var!("x"), uri!("p"), Term::Any);
        let c = triple!(var!("x"), uri!("p"), var!("x"));
        assert_eq!(a.variant_key(), b.variant_key());
        assert_ne!(a.variant_key(), c.variant_key());
        assert_eq!(
            c.variant_key(),
            triple!(var!("_0"), uri!("p"), var!("_0"))
        );
    }

    #[test]
    fn test_variant_key_functor() {
        let a = triple!(var!("s"), uri!("p"), functor!("f", var!("s"), var!("t")));
        assert_eq!(
            a.variant_key(),
            triple!(var!("_0"), uri!("p"), functor!("f", var!("_0"), var!("_1")))
        );
    }

    #[test]
    fn test_groundness() {
        assert!(triple!(uri!("a"), uri!("p"), lit!(3)).is_ground());
        assert!(!triple!(uri!("a"), uri!("p"), functor!("f", var!("x"))).is_ground());
        assert!(triple!(uri!("a"), uri!("p"), functor!("f", uri!("b"))).is_ground());
        assert!(Term::Any.is_var());
    }

    #[test]
    fn test_lookup_admits() {
        let pattern = triple!(var!("s"), uri!("p"), functor!("f", var!("x"))).lookup_key();
        assert_eq!(pattern.object, Term::Any);
        assert!(pattern.admits(&triple!(uri!("a"), uri!("p"), lit!("x"))));
        assert!(!pattern.admits(&triple!(uri!("a"), uri!("q"), lit!("x"))));

        let ground = functor!("f", uri!("b"));
        assert!(ground.admits(&functor!("f", uri!("b"))));
        assert!(!ground.admits(&functor!("f", uri!("c"))));
    }
}
