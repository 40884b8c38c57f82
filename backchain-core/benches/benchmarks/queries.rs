use criterion::{criterion_group, BenchmarkId, Criterion};

use backchain_core::*;

use super::runner::{chain, runner};

fn ancestor(tabled: bool) -> RuleSet {
    let mut rules = RuleSet::new();
    if tabled {
        rules.table(uri!("anc"));
        rules.add_rule(rule!("anc_step", triple!(var!("x"), uri!("anc"), var!("y")) =>
            triple!(var!("x"), uri!("anc"), var!("z")),
            triple!(var!("z"), uri!("parent"), var!("y"))));
    } else {
        rules.add_rule(rule!("anc_step", triple!(var!("x"), uri!("anc"), var!("y")) =>
            triple!(var!("x"), uri!("parent"), var!("z")),
            triple!(var!("z"), uri!("anc"), var!("y"))));
    }
    rules.add_rule(rule!("anc_base", triple!(var!("x"), uri!("anc"), var!("y")) =>
        triple!(var!("x"), uri!("parent"), var!("y"))));
    rules
}

pub fn stored_triples(c: &mut Criterion) {
    c.bench_function("find_stored", |b| {
        b.iter_batched_ref(
            || {
                runner(
                    RuleSet::new(),
                    chain(100),
                    pattern!(var!("x"), uri!("parent"), var!("y")),
                )
            },
            |runner| runner.run(),
            criterion::BatchSize::SmallInput,
        )
    });
}

pub fn ancestor_chain(c: &mut Criterion) {
    let lengths = [5usize, 10, 20];

    let mut group = c.benchmark_group("ancestor");
    for len in lengths.iter() {
        for tabled in [true, false] {
            let name = if tabled { "tabled" } else { "untabled" };
            group.bench_with_input(BenchmarkId::new(name, len), len, |b, len| {
                b.iter_batched_ref(
                    || {
                        let mut runner = runner(
                            ancestor(tabled),
                            chain(*len),
                            pattern!(uri!("n0"), uri!("anc"), var!("y")),
                        );
                        runner.expected_results(*len);
                        runner
                    },
                    |runner| runner.run(),
                    criterion::BatchSize::SmallInput,
                )
            });
        }
    }
    group.finish();
}

pub fn memoized_reads(c: &mut Criterion) {
    c.bench_function("memoized_reads", |b| {
        let runner = runner(
            ancestor(true),
            chain(50),
            pattern!(var!("x"), uri!("anc"), var!("y")),
        );
        // Fill the table once; every iteration reads the completed table.
        assert_eq!(runner.query().count(), 50 * 51 / 2);
        b.iter(|| runner.query().count())
    });
}

criterion_group!(benches, stored_triples, ancestor_chain, memoized_reads);
