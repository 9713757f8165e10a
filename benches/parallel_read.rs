use std::fmt::Write as _;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use csv_columnar::{RunConfig, read_bytes};

fn generate_orders(rows: usize, late_status_code: bool) -> Vec<u8> {
    let mut text = String::with_capacity(rows * 40);
    text.push_str("id,ordered_at,amount,status,code\n");
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let day = (i % 28) + 1;
        let amount = (i % 1000) as f64 * 1.25;
        let code = if late_status_code && i == rows - 10 {
            "X-1".to_string()
        } else {
            (i % 977).to_string()
        };
        let _ = writeln!(text, "{i},2024-01-{day:02},{amount},{status},{code}");
    }
    text.into_bytes()
}

fn bench_parallel_read(c: &mut Criterion) {
    let rows = 200_000;
    let steady = generate_orders(rows, false);
    let restart = generate_orders(rows, true);

    let mut group = c.benchmark_group("parallel_read");
    group.throughput(Throughput::Bytes(steady.len() as u64));

    for threads in [1, 4] {
        group.bench_function(format!("single_pass_{threads}t"), |b| {
            b.iter_batched(
                || RunConfig::default().with_threads(threads),
                |config| read_bytes(&steady, config).expect("read orders"),
                BatchSize::SmallInput,
            );
        });
    }

    group.bench_function("late_type_restart_4t", |b| {
        b.iter_batched(
            || RunConfig::default().with_threads(4),
            |config| read_bytes(&restart, config).expect("read orders"),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_parallel_read);
criterion_main!(benches);
