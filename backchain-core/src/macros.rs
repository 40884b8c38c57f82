/// Helper macros to build terms, triples and rules.
///
use std::sync::Arc;

use crate::terms::*;

#[macro_export]
macro_rules! uri {
    ($arg:expr) => {
        $crate::terms::Term::Node($crate::terms::Node::Uri(::std::sync::Arc::from($arg)))
    };
}

#[macro_export]
macro_rules! blank {
    ($arg:expr) => {
        $crate::terms::Term::Node($crate::terms::Node::Blank(::std::sync::Arc::from($arg)))
    };
}

#[macro_export]
macro_rules! lit {
    ($arg:expr) => {
        $crate::terms::Term::Node($crate::terms::Node::Literal(
            $crate::macros::TestHelper::<$crate::terms::Literal>::from($arg).0,
        ))
    };
}

#[macro_export]
macro_rules! var {
    ($arg:expr) => {
        $crate::terms::Term::Var($crate::terms::Symbol::new($arg))
    };
}

#[macro_export]
macro_rules! functor {
    ($name:expr $(, $args:expr)* $(,)?) => {
        $crate::terms::Term::Functor($crate::terms::Functor::new($name, vec![$($args),*]))
    };
}

#[macro_export]
macro_rules! triple {
    ($s:expr, $p:expr, $o:expr) => {
        $crate::terms::Triple::new($s, $p, $o)
    };
}

/// A triple pattern; variables may appear in any position.
#[macro_export]
macro_rules! pattern {
    ($s:expr, $p:expr, $o:expr) => {
        $crate::terms::TriplePattern::new($s, $p, $o)
    };
}

/// Build a `Rule` from a name, a head pattern and body entries.
///
/// Body entries are either triple patterns or builtin calls written as
/// `@name(args...)`.
#[macro_export]
macro_rules! rule {
    ($name:expr, $head:expr => $($body:tt)*) => {
        $crate::rules::Rule::new($name, $head, $crate::rule_body!($($body)*))
    };
    ($name:expr, $head:expr) => {
        $crate::rules::Rule::new($name, $head, vec![])
    };
}

#[macro_export]
macro_rules! rule_body {
    () => {
        Vec::<$crate::rules::ClauseEntry>::new()
    };
    (@ $name:ident ( $($args:expr),* $(,)? ) $(, $($rest:tt)*)?) => {{
        let mut body = vec![$crate::rules::ClauseEntry::Builtin(
            $crate::terms::Functor::new(stringify!($name), vec![$($args),*]),
        )];
        body.extend($crate::rule_body!($($($rest)*)?));
        body
    }};
    ($triple:expr $(, $($rest:tt)*)?) => {{
        let mut body = vec![$crate::rules::ClauseEntry::Triple($triple)];
        body.extend($crate::rule_body!($($($rest)*)?));
        body
    }};
}

/// Special struct which is way more eager at implementing `From`
/// for a bunch of things, so that in the macros we can use `TestHelper<Literal>::from`
/// and try and convert things as often as possible.
pub struct TestHelper<T>(pub T);

impl<T> From<T> for TestHelper<T> {
    fn from(other: T) -> Self {
        Self(other)
    }
}

impl From<i64> for TestHelper<Literal> {
    fn from(other: i64) -> Self {
        Self(Literal::Integer(other))
    }
}

impl From<i32> for TestHelper<Literal> {
    fn from(other: i32) -> Self {
        Self(Literal::Integer(other.into()))
    }
}

impl From<bool> for TestHelper<Literal> {
    fn from(other: bool) -> Self {
        Self(Literal::Boolean(other))
    }
}

impl From<&str> for TestHelper<Literal> {
    fn from(other: &str) -> Self {
        Self(Literal::String(Arc::from(other)))
    }
}

impl From<String> for TestHelper<Literal> {
    fn from(other: String) -> Self {
        Self(Literal::String(Arc::from(other)))
    }
}
