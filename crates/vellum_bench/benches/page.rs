//! Page sealing and validation benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use vellum_bench::random_bytes;
use vellum_wal::page::{check_page, seal_page, PageCheck, PageCipher, RECORDS_OFFSET};
use vellum_wal::EncryptionConfig;

fn cipher() -> PageCipher {
    PageCipher::new(&EncryptionConfig::new([0x11; 16], [0x22; 16]))
}

/// A full page with sealed header, ready for validation.
fn sealed_page(size: usize, cipher: Option<&PageCipher>) -> Vec<u8> {
    let mut page = vec![0u8; size];
    page[RECORDS_OFFSET..].copy_from_slice(&random_bytes(size - RECORDS_OFFSET));
    seal_page(&mut page, size, 42, 1, 0, cipher);
    page
}

/// Benchmark sealing plaintext pages of common sizes.
fn bench_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_seal");

    for size in [512, 4096, 16_384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut page = vec![0u8; size];
            page[RECORDS_OFFSET..].copy_from_slice(&random_bytes(size - RECORDS_OFFSET));

            b.iter(|| {
                seal_page(black_box(&mut page), size, 42, 1, 0, None);
            });
        });
    }

    group.finish();
}

/// Benchmark sealing with AES-CTR encryption on top.
fn bench_seal_encrypted(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_seal_encrypted");
    let cipher = cipher();

    for size in [512, 4096, 16_384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut template = vec![0u8; size];
            template[RECORDS_OFFSET..].copy_from_slice(&random_bytes(size - RECORDS_OFFSET));

            b.iter_batched(
                || template.clone(),
                |mut page| {
                    seal_page(&mut page, size, 42, 1, 0, Some(&cipher));
                    black_box(page);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark validating plaintext pages.
fn bench_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_check");

    for size in [512, 4096, 16_384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut page = sealed_page(size, None);

            b.iter(|| {
                let check = check_page(black_box(&mut page), 1, 0, None).unwrap();
                black_box(matches!(check, PageCheck::Valid(_)));
            });
        });
    }

    group.finish();
}

/// Benchmark validating encrypted pages. Validation decrypts in
/// place, so each iteration gets a fresh copy.
fn bench_check_encrypted(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_check_encrypted");
    let cipher = cipher();

    for size in [512, 4096, 16_384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let sealed = sealed_page(size, Some(&cipher));

            b.iter_batched(
                || sealed.clone(),
                |mut page| {
                    let check = check_page(&mut page, 1, 0, Some(&cipher)).unwrap();
                    black_box(matches!(check, PageCheck::Valid(_)));
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_seal,
    bench_seal_encrypted,
    bench_check,
    bench_check_encrypted
);
criterion_main!(benches);
