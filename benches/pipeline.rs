use criterion::{black_box, criterion_group, criterion_main, Criterion};

use flowtrace::{CodeSet, FileInput, GrammarRegistry, Language, Pipeline, TraceLimits};

const MAIN: &str = r#"from shapes import area

def total(sizes):
    acc = 0
    for s in sizes:
        acc = acc + area(s)
    return acc

sizes = [1, 2, 3, 4, 5, 6, 7, 8]
print(total(sizes))
"#;

const SHAPES: &str = r#"def area(side):
    return side * side
"#;

fn input() -> CodeSet {
    CodeSet::new(
        Language::Python,
        FileInput::new("main.py", MAIN),
        vec![FileInput::new("shapes.py", SHAPES)],
    )
}

fn bench_parse(c: &mut Criterion) {
    let registry = GrammarRegistry::new();
    c.bench_function("parse_python", |b| {
        b.iter(|| registry.parse(Language::Python, "main.py", black_box(MAIN)))
    });
}

fn bench_analyze(c: &mut Criterion) {
    let input = input();
    // a fresh pipeline per iteration keeps the analysis cache cold
    c.bench_function("analyze_cold", |b| {
        b.iter(|| Pipeline::default().analyze(black_box(&input)))
    });

    let pipeline = Pipeline::default();
    c.bench_function("analyze_cached", |b| b.iter(|| pipeline.analyze(black_box(&input))));
}

fn bench_trace(c: &mut Criterion) {
    let input = input();
    let pipeline = Pipeline::default();
    let unit = match pipeline.resolve(&input) {
        Ok(unit) => unit,
        Err(e) => panic!("benchmark input failed to resolve: {}", e),
    };
    let limits = TraceLimits::default();
    c.bench_function("trace_python", |b| {
        b.iter(|| flowtrace::trace(black_box(&unit), Language::Python, &limits))
    });
}

criterion_group!(benches, bench_parse, bench_analyze, bench_trace);
criterion_main!(benches);
