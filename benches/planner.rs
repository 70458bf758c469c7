use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use syncdir_lib::core::digest::Fingerprint;
use syncdir_lib::core::entry::{Entry, Mapping};
use syncdir_lib::core::planner;

const DIRS: usize = 50;

fn entry(rel: String, size: u64, secs: u64, is_dir: bool) -> Entry {
    Entry {
        absolute_path: PathBuf::from("/bench").join(&rel),
        relative_path: rel,
        size,
        modified_time: UNIX_EPOCH + Duration::from_secs(secs),
        is_dir,
        permission_mode: 0o644,
    }
}

/// Source and target trees where roughly a quarter of the files differ.
fn mappings(files_per_dir: usize) -> (Mapping, Mapping) {
    let mut source = Mapping::new();
    let mut target = Mapping::new();

    for d in 0..DIRS {
        let dir = format!("dir{d:03}");
        source.insert(dir.clone(), entry(dir.clone(), 0, 0, true));
        target.insert(dir.clone(), entry(dir.clone(), 0, 0, true));

        for f in 0..files_per_dir {
            let rel = format!("{dir}/file{f:04}.dat");
            source.insert(rel.clone(), entry(rel.clone(), 1024, 1_700_000_000, false));
            match f % 8 {
                0 => {}
                1 => {
                    target.insert(rel.clone(), entry(rel.clone(), 2048, 1_700_000_000, false));
                }
                2 => {
                    target.insert(rel.clone(), entry(rel.clone(), 1024, 1_600_000_000, false));
                }
                _ => {
                    target.insert(rel.clone(), entry(rel.clone(), 1024, 1_700_000_000, false));
                }
            }
        }
        let stale = format!("{dir}/stale.tmp");
        target.insert(stale.clone(), entry(stale, 10, 0, false));
    }

    (source, target)
}

fn constant_digest(_: &Path) -> io::Result<Fingerprint> {
    Ok(Fingerprint::of_bytes(b"same"))
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for files_per_dir in [20, 200] {
        let (source, target) = mappings(files_per_dir);
        group.bench_with_input(
            BenchmarkId::from_parameter(source.len()),
            &(source, target),
            |b, (source, target)| {
                b.iter(|| planner::plan(black_box(source), black_box(target), &constant_digest));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
