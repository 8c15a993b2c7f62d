//! Registry benchmarks using criterion for historical comparison.

use std::{hint::black_box, sync::Arc, thread};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rev_ecs::{EntityId, Registry, Signature};

#[derive(Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

impl Position {
    fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    fn step(&mut self, velocity: &Velocity) {
        self.x += velocity.x;
        self.y += velocity.y;
        self.z += velocity.z;
    }
}

fn populate(registry: &Registry, count: u64) -> Vec<EntityId> {
    (0..count)
        .map(|i| {
            let e = registry.create_entity();
            registry.insert(
                e,
                Position {
                    x: i as f32,
                    y: 0.0,
                    z: 0.0,
                },
            );
            if i % 2 == 0 {
                registry.insert(
                    e,
                    Velocity {
                        x: 1.0,
                        y: 0.0,
                        z: 0.0,
                    },
                );
            }
            e
        })
        .collect()
}

fn signature_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");

    for len in [8, 64, 256] {
        let full = !&Signature::new(len);
        let query = Signature::from_indices([0, len / 2, len - 1]);

        group.bench_with_input(BenchmarkId::new("has", len), &len, |b, _| {
            b.iter(|| black_box(full.has(black_box(&query))));
        });
    }

    group.finish();
}

fn component_access_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("component_access");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("select", count), &count, |b, &count| {
            let registry = Registry::new();
            let entities = populate(&registry, count);

            b.iter(|| {
                for &entity in &entities {
                    black_box(registry.select::<Position>(entity).map(|pos| pos.length_squared()));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("modify", count), &count, |b, &count| {
            let registry = Registry::new();
            let entities = populate(&registry, count);

            b.iter(|| {
                for &entity in &entities {
                    registry.modify::<Position, _>(entity, |pos| pos.x += 1.0);
                }
            });
        });
    }

    group.finish();
}

fn query_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        let registry = Registry::new();
        populate(&registry, count);

        group.bench_with_input(BenchmarkId::new("single", count), &count, |b, _| {
            b.iter(|| black_box(registry.query::<(Position,)>()));
        });

        group.bench_with_input(BenchmarkId::new("pair", count), &count, |b, _| {
            b.iter(|| black_box(registry.query::<(Position, Velocity)>()));
        });

        group.bench_with_input(BenchmarkId::new("integrate", count), &count, |b, _| {
            b.iter(|| {
                let view = registry.query::<(Position, Velocity)>();
                for &entity in view.entities() {
                    let Some(velocity) = view.select::<Velocity>(entity) else {
                        continue;
                    };
                    registry.modify::<Position, _>(entity, |pos| pos.step(&velocity));
                }
            });
        });
    }

    group.finish();
}

fn contention_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");

    for threads in [2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("modify_one_entity", threads),
            &threads,
            |b, &threads| {
                let registry = Arc::new(Registry::new());
                let e = registry.create_entity();
                registry.insert(
                    e,
                    Velocity {
                        x: 0.0,
                        y: 0.0,
                        z: 0.0,
                    },
                );

                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let registry = Arc::clone(&registry);
                            thread::spawn(move || {
                                for _ in 0..100 {
                                    registry.modify::<Velocity, _>(e, |v| v.y += 1.0);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    signature_benchmarks,
    component_access_benchmarks,
    query_benchmarks,
    contention_benchmarks,
);

criterion_main!(benches);
