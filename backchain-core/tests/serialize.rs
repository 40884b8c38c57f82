#[cfg(test)]
mod tests {
    use backchain_core::{
        error::*, functor, lit, pattern, rule, triple, uri, var, EngineConfig, LogLevel, RuleSet,
        TableInfo, Term, Triple,
    };

    #[test]
    fn serialize_test() {
        assert_eq!(
            serde_json::to_string(&uri!("a")).unwrap(),
            r#"{"Node":{"Uri":"a"}}"#
        );
        assert_eq!(
            serde_json::to_string(&lit!(3)).unwrap(),
            r#"{"Node":{"Literal":{"Integer":3}}}"#
        );
        assert_eq!(serde_json::to_string(&Term::Any).unwrap(), r#""Any""#);
        assert_eq!(serde_json::to_string(&var!("x")).unwrap(), r#"{"Var":"x"}"#);

        let triple = triple!(uri!("s"), uri!("p"), functor!("f", lit!("o"), Term::Any));
        let json = serde_json::to_string(&triple).unwrap();
        assert_eq!(
            json,
            r#"{"subject":{"Node":{"Uri":"s"}},"predicate":{"Node":{"Uri":"p"}},"object":{"Functor":{"name":"f","args":[{"Node":{"Literal":{"String":"o"}}},"Any"]}}}"#
        );
        assert_eq!(serde_json::from_str::<Triple>(&json).unwrap(), triple);
    }

    #[test]
    fn serialize_rules() {
        let mut rules = RuleSet::new();
        rules.table(uri!("anc"));
        rules.add_rule(rule!("anc", triple!(var!("x"), uri!("anc"), var!("y")) =>
            pattern!(var!("x"), uri!("parent"), var!("y")),
            @notEqual(var!("x"), var!("y"))));
        let json = serde_json::to_string(&rules).unwrap();
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);
        eprintln!("{}", back.rules()[0]);
    }

    #[test]
    fn serialize_errors() {
        let err: EngineError = RuntimeError::IteratorClosed.into();
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"kind":{"Runtime":"IteratorClosed"},"formatted":"Iterator already closed"}"#
        );

        let err: EngineError = RuntimeError::ConcurrentModification {
            expected: 3,
            found: 4,
        }
        .into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json["formatted"],
            "Concurrent modification: triple store changed from version 3 to 4 during iteration"
        );
        assert_eq!(serde_json::from_value::<EngineError>(json).unwrap(), err);

        let err: EngineError = CompileError::UnknownBuiltin {
            rule: "r".to_owned(),
            name: "frob".to_owned(),
        }
        .into();
        eprintln!("{}", serde_json::to_string(&err).unwrap());
    }

    #[test]
    fn serialize_config() {
        let config = EngineConfig {
            log_level: Some(LogLevel::Debug),
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<EngineConfig>(&json).unwrap(), config);

        let info = TableInfo {
            results: 2,
            complete: true,
        };
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"results":2,"complete":true}"#
        );
    }
}
