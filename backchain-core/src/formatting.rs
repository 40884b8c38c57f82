//! # Formatting
//!
//! There are two forms of formatting in the engine:
//!
//! 1. Debug strings: verbose, derived from fmt::Debug
//! 2. Display strings: rule syntax for terms, triples and rules, and an
//!    assembler-like listing for compiled instructions
//!
//! Display output is what ends up in log messages and error text.

mod display {
    use std::fmt;

    use super::to_rule_syntax::ToRuleString;
    use crate::code::Instruction;
    use crate::config::LogLevel;
    use crate::rules::{ClauseEntry, Rule};
    use crate::terms::{Functor, Literal, Node, Symbol, Term, Triple};

    impl fmt::Display for Symbol {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.0)
        }
    }

    impl fmt::Display for Literal {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for Node {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for Term {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for Functor {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for Triple {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for ClauseEntry {
        fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for Rule {
        fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
            write!(fmt, "{}", self.to_rule_string())
        }
    }

    impl fmt::Display for LogLevel {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self {
                Self::Trace => write!(f, "trace"),
                Self::Debug => write!(f, "debug"),
                Self::Info => write!(f, "info"),
            }
        }
    }

    impl fmt::Display for Instruction {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            use Instruction::*;
            match self {
                TestBound { arg } => write!(f, "TEST_BOUND A{}", arg),
                TestUnbound { arg } => write!(f, "TEST_UNBOUND A{}", arg),
                GetVariable { slot, arg } => write!(f, "GET_VARIABLE Y{}, A{}", slot, arg),
                GetTemp { temp, arg } => write!(f, "GET_TEMP T{}, A{}", temp, arg),
                GetConstant { arg, constant } => write!(f, "GET_CONSTANT A{}, {}", arg, constant),
                GetFunctor { functor } => {
                    write!(f, "GET_FUNCTOR {}/{}", functor.name, functor.arity())
                }
                UnifyVariable { slot, arg } => write!(f, "UNIFY_VARIABLE Y{}, A{}", slot, arg),
                UnifyTemp { temp, arg } => write!(f, "UNIFY_TEMP T{}, A{}", temp, arg),
                PutNewVariable { slot, arg } => write!(f, "PUT_NEW_VARIABLE Y{}, A{}", slot, arg),
                PutVariable { slot, arg } => write!(f, "PUT_VARIABLE Y{}, A{}", slot, arg),
                PutDerefVariable { slot, arg } => {
                    write!(f, "PUT_DEREF_VARIABLE Y{}, A{}", slot, arg)
                }
                PutTemp { temp, arg } => write!(f, "PUT_TEMP T{}, A{}", temp, arg),
                PutConstant { arg, constant } => write!(f, "PUT_CONSTANT A{}, {}", arg, constant),
                ClearArg { arg } => write!(f, "CLEAR_ARG A{}", arg),
                MakeFunctor { functor } => {
                    write!(f, "MAKE_FUNCTOR {}/{}", functor.name, functor.arity())
                }
                CallPredicate { predicate } => write!(f, "CALL_PREDICATE {}", predicate),
                LastCallPredicate { predicate } => write!(f, "LAST_CALL_PREDICATE {}", predicate),
                CallPredicateIndex { predicate } => {
                    write!(f, "CALL_PREDICATE_INDEX {}", predicate)
                }
                CallTripleMatch => write!(f, "CALL_TRIPLE_MATCH"),
                CallTabled => write!(f, "CALL_TABLED"),
                CallWildTabled => write!(f, "CALL_WILD_TABLED"),
                Proceed => write!(f, "PROCEED"),
                CallBuiltin { builtin, arity } => {
                    write!(f, "CALL_BUILTIN {}/{}", builtin.name(), arity)
                }
            }
        }
    }
}

pub mod to_rule_syntax {
    use crate::rules::{ClauseEntry, Rule};
    use crate::terms::{Functor, Literal, Node, Term, Triple};

    /// Render values in the syntax rules are written in.
    pub trait ToRuleString {
        fn to_rule_string(&self) -> String;
    }

    impl ToRuleString for Literal {
        fn to_rule_string(&self) -> String {
            match self {
                Literal::String(s) => format!("{:?}", s.as_ref()),
                Literal::Integer(i) => i.to_string(),
                Literal::Boolean(b) => b.to_string(),
            }
        }
    }

    impl ToRuleString for Node {
        fn to_rule_string(&self) -> String {
            match self {
                Node::Uri(uri) => format!("<{}>", uri),
                Node::Blank(id) => format!("_:{}", id),
                Node::Literal(l) => l.to_rule_string(),
            }
        }
    }

    impl ToRuleString for Functor {
        fn to_rule_string(&self) -> String {
            format!(
                "{}({})",
                self.name.0,
                self.args
                    .iter()
                    .map(|a| a.to_rule_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            )
        }
    }

    impl ToRuleString for Term {
        fn to_rule_string(&self) -> String {
            match self {
                Term::Node(n) => n.to_rule_string(),
                Term::Var(name) => format!("?{}", name.0),
                Term::Ref(var) => format!("?_{}", var.0),
                Term::Functor(f) => f.to_rule_string(),
                Term::Any => "_".to_owned(),
            }
        }
    }

    impl ToRuleString for Triple {
        fn to_rule_string(&self) -> String {
            format!(
                "({} {} {})",
                self.subject.to_rule_string(),
                self.predicate.to_rule_string(),
                self.object.to_rule_string()
            )
        }
    }

    impl ToRuleString for ClauseEntry {
        fn to_rule_string(&self) -> String {
            match self {
                ClauseEntry::Triple(t) => t.to_rule_string(),
                ClauseEntry::Builtin(f) => f.to_rule_string(),
            }
        }
    }

    impl ToRuleString for Rule {
        fn to_rule_string(&self) -> String {
            if self.body.is_empty() {
                format!("[{}: {}]", self.name, self.head.to_rule_string())
            } else {
                format!(
                    "[{}: {} <- {}]",
                    self.name,
                    self.head.to_rule_string(),
                    self.body
                        .iter()
                        .map(|e| e.to_rule_string())
                        .collect::<Vec<String>>()
                        .join(" ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::rules::ClauseEntry;

    #[test]
    fn test_rule_display() {
        let rule = rule!("grand", triple!(var!("x"), uri!("grandparent"), var!("z")) =>
            triple!(var!("x"), uri!("parent"), var!("y")),
            triple!(var!("y"), uri!("parent"), var!("z")),
            @notEqual(var!("x"), var!("z")));
        assert_eq!(
            rule.to_string(),
            "[grand: (?x <grandparent> ?z) <- (?x <parent> ?y) (?y <parent> ?z) notEqual(?x, ?z)]"
        );
        let fact = rule!("fact", triple!(uri!("a"), uri!("p"), lit!("it's")));
        assert_eq!(fact.to_string(), "[fact: (<a> <p> \"it's\")]");
    }

    #[test]
    fn test_term_display() {
        assert_eq!(
            triple!(blank!("b0"), uri!("p"), functor!("f", lit!(3), crate::terms::Term::Any))
                .to_string(),
            "(_:b0 <p> f(3, _))"
        );
        let entry = ClauseEntry::Builtin(crate::terms::Functor::new("bound", vec![var!("x")]));
        assert_eq!(entry.to_string(), "bound(?x)");
        assert_eq!(lit!(true).to_string(), "true");
    }
}
