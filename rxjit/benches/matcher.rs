use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rxjit::{Engine, Matcher};

pub fn criterion_benchmark(c: &mut Criterion) {
    let pattern = "(a|b)*abb";
    let input = "ab".repeat(64) + "abb";

    c.bench_function("build_auto", |b| {
        b.iter(|| Matcher::builder(black_box(pattern)).build().unwrap())
    });

    let vm = Matcher::builder(pattern).engine(Engine::Vm).build().unwrap();
    c.bench_function("accept_vm", |b| {
        b.iter(|| vm.accept(black_box(input.as_bytes())).unwrap())
    });

    let dfa = Matcher::builder(pattern).engine(Engine::Dfa).build().unwrap();
    c.bench_function("accept_dfa", |b| {
        b.iter(|| dfa.accept(black_box(input.as_bytes())).unwrap())
    });

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        let jit = Matcher::builder(pattern).engine(Engine::Jit).build().unwrap();
        c.bench_function("accept_jit", |b| {
            b.iter(|| jit.accept(black_box(input.as_bytes())).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
