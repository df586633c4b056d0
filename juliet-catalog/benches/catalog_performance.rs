use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use juliet_catalog::{annotations, discover, CaseName};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn corpus_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../ci-corpus/testcases")
}

const NAMES: &[&str] = &[
    "CWE190_Integer_Overflow__int64_t_rand_preinc_44.c",
    "CWE190_Integer_Overflow__unsigned_int_max_preinc_54e.c",
    "CWE191_Integer_Underflow__char_rand_postdec_63b.c",
    "CWE427_Uncontrolled_Search_Path_Element__wchar_t_connect_socket_22a.c",
    "CWE459_Incomplete_Cleanup__char_18.c",
    "CWE190_Integer_Overflow__int_max_add_81_goodG2B.cpp",
];

fn benchmark_naming(c: &mut Criterion) {
    let mut group = c.benchmark_group("naming");
    for name in NAMES {
        group.bench_with_input(BenchmarkId::new("parse", name), name, |b, name| {
            b.iter(|| CaseName::parse(black_box(name)).map(|n| n.case_id()))
        });
    }
    group.finish();
}

fn benchmark_scanning(c: &mut Criterion) {
    let mut group = c.benchmark_group("scanning");
    let root = corpus_root();

    let sample = root.join("CWE459_Incomplete_Cleanup/CWE459_Incomplete_Cleanup__char_18.c");
    match fs::read_to_string(&sample) {
        Ok(source) => {
            group.bench_function("scan-point-flaw", |b| {
                b.iter(|| annotations::scan(black_box(&source)))
            });
        }
        Err(e) => eprintln!("Failed to read {}: {}", sample.display(), e),
    }

    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));
    group.bench_function("discover-ci-corpus", |b| {
        b.iter(|| discover(black_box(&root)).map(|corpus| corpus.cases.len()))
    });
    group.finish();
}

criterion_group!(benches, benchmark_naming, benchmark_scanning);
criterion_main!(benches);
