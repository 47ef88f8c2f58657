use std::io::Read;
use std::path::Path;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tieredio::{copy, read, Error, IoConfig, IoManager, OutKind, Source, StorageType};

const SIZES: [usize; 3] = [4 * 1024, 256 * 1024, 4 * 1024 * 1024];

fn write_input(dir: &Path, len: usize) -> std::path::PathBuf {
    let path = dir.join(format!("input-{len}"));
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

/// Everything tiered by size alone: no preallocation, spill at 64 KiB.
fn manager(base: &Path, storage: StorageType, mmap: bool) -> IoManager {
    let cfg = IoConfig::new(base, storage)
        .with_max_preallocate(0)
        .with_threshold(0)
        .with_spill_threshold(64 * 1024)
        .with_mmap(mmap);
    IoManager::new(cfg).unwrap()
}

fn bench_copy(c: &mut Criterion) {
    let inputs = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("copy");

    for len in SIZES {
        let path = write_input(inputs.path(), len);
        let source = Source::path(&path);
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("std", len), &path, |b, path| {
            b.iter(|| {
                let mut out = Vec::new();
                std::fs::File::open(path).unwrap().read_to_end(&mut out).unwrap();
                out
            })
        });

        for (name, storage, mmap) in [
            ("memory", StorageType::Memory, false),
            ("file", StorageType::File, false),
            ("file+mmap", StorageType::File, true),
        ] {
            let mgr = manager(base.path(), storage, mmap);
            group.bench_with_input(BenchmarkId::new(name, len), &source, |b, source| {
                b.iter(|| {
                    mgr.with_session(|ctx| {
                        let out = copy(ctx, source, OutKind::Bytes)?;
                        Ok::<_, Error>(out.as_bytes().map(|b| b.len()))
                    })
                    .unwrap()
                })
            });
            mgr.cleanup().unwrap();
        }
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let inputs = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let mgr = manager(base.path(), StorageType::Memory, false);
    let mut group = c.benchmark_group("read");

    for len in SIZES {
        let source = Source::path(write_input(inputs.path(), len));
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("stream", len), &source, |b, source| {
            b.iter(|| {
                mgr.with_session(|ctx| {
                    read(ctx, source, |r| {
                        std::io::copy(r, &mut std::io::sink()).map_err(Error::from_io_boxed)
                    })
                })
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(io, bench_copy, bench_read);
criterion_main!(io);
