use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rustgrad::prelude::*;

fn tape_benchmark(c: &mut Criterion) {
    c.bench_function("record and sweep a product chain", |b| {
        b.iter(|| {
            reset_tape();
            set_trace_level(TraceLevel::Gradient);
            let x = Variable::new(1.0001);
            let mut acc = Variable::new(1.0);
            for _ in 0..10_000 {
                let step = &acc * &x;
                acc.assign(step);
            }
            accumulate().unwrap();
            black_box(x.adjoint());
        })
    });

    c.bench_function("gradient and hessian of a small objective", |b| {
        b.iter(|| {
            reset_tape();
            set_trace_level(TraceLevel::SecondOrderMixed);
            let x = Variable::new(0.8);
            let y = Variable::new(1.7);
            let mut z = Variable::new(0.0);
            z.assign(exp(&x * &y) + sin(&x) / &y);
            accumulate().unwrap();
            black_box(hessian_value(x.id(), y.id()));
        })
    });
}
criterion_group!(benches, tape_benchmark);
criterion_main!(benches);
