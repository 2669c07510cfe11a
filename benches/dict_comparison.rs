use core::hash::BuildHasherDefault;
use core::hash::Hash;
use core::hint::black_box;

use criterion::AxisScale;
use criterion::BatchSize;
use criterion::Criterion;
use criterion::PlotConfiguration;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use group_dict::Dict;
use hashbrown::HashMap as HashbrownMap;
use rand::SeedableRng;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use siphasher::sip::SipHasher;

type Sip = BuildHasherDefault<SipHasher>;

trait BenchKey: Clone + Hash + Eq {
    fn new(key: u64) -> Self;
}

impl BenchKey for u64 {
    fn new(key: u64) -> Self {
        black_box(key)
    }
}

impl BenchKey for String {
    fn new(key: u64) -> Self {
        black_box(format!("key_{:016X}", key))
    }
}

const SIZES: &[usize] = &[
    (1 << 10),
    (1 << 12),
    (1 << 14),
    (1 << 16),
    (1 << 18),
];

fn random_keys<K: BenchKey>(count: usize) -> Vec<K> {
    let mut rng = OsRng;
    (0..count)
        .map(|_| K::new(rng.try_next_u64().unwrap()))
        .collect()
}

fn bench_insert_random<K: BenchKey, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("insert_random_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = random_keys::<K>(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("group_dict/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let mut dict: Dict<K, u64, Sip> = Dict::with_hasher(Sip::default());
                    for (i, key) in keys.into_iter().enumerate() {
                        black_box(dict.insert(key, i as u64));
                    }
                    black_box(dict)
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let mut map: HashbrownMap<K, u64, Sip> =
                        HashbrownMap::with_hasher(Sip::default());
                    for (i, key) in keys.into_iter().enumerate() {
                        black_box(map.insert(key, i as u64));
                    }
                    black_box(map)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_find_hit_miss<K: BenchKey, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("find_hit_miss_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        // The first half is inserted, the second half only looked up.
        let keys = random_keys::<K>(size * 2);
        let present = &keys[..size];

        let mut dict: Dict<K, u64, Sip> = Dict::with_hasher(Sip::default());
        let mut map: HashbrownMap<K, u64, Sip> = HashbrownMap::with_hasher(Sip::default());
        for (i, key) in present.iter().enumerate() {
            dict.insert(key.clone(), i as u64);
            map.insert(key.clone(), i as u64);
        }

        let mut lookups = keys.clone();
        lookups.shuffle(&mut SmallRng::from_os_rng());

        group.throughput(Throughput::Elements(lookups.len() as u64));
        group.bench_function(format!("group_dict/{size}"), |b| {
            b.iter(|| {
                let mut hits = 0usize;
                for key in &lookups {
                    if dict.get(key).is_some() {
                        hits += 1;
                    }
                }
                black_box(hits)
            })
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                let mut hits = 0usize;
                for key in &lookups {
                    if map.get(key).is_some() {
                        hits += 1;
                    }
                }
                black_box(hits)
            })
        });
    }

    group.finish();
}

fn bench_iteration<K: BenchKey, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("iteration_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = random_keys::<K>(size);
        let mut dict: Dict<K, u64, Sip> = Dict::with_hasher(Sip::default());
        let mut map: HashbrownMap<K, u64, Sip> = HashbrownMap::with_hasher(Sip::default());
        for (i, key) in keys.into_iter().enumerate() {
            dict.insert(key.clone(), i as u64);
            map.insert(key, i as u64);
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("group_dict/{size}"), |b| {
            b.iter(|| {
                let mut prev = None;
                let mut count = 0usize;
                while let Some((at, key)) = dict.next_key(prev) {
                    black_box(key);
                    prev = Some(at);
                    count += 1;
                }
                black_box(count)
            })
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                let mut count = 0usize;
                for key in map.keys() {
                    black_box(key);
                    count += 1;
                }
                black_box(count)
            })
        });
    }

    group.finish();
}

fn bench_clear_refill<K: BenchKey, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("clear_refill_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = random_keys::<K>(size);
        group.throughput(Throughput::Elements(size as u64));

        let mut dict: Dict<K, u64, Sip> = Dict::with_capacity_and_hasher(size * 2, Sip::default());
        group.bench_function(format!("group_dict/{size}"), |b| {
            b.iter(|| {
                dict.clear();
                for (i, key) in keys.iter().enumerate() {
                    dict.insert(key.clone(), i as u64);
                }
                black_box(dict.len())
            })
        });

        let mut map: HashbrownMap<K, u64, Sip> =
            HashbrownMap::with_capacity_and_hasher(size, Sip::default());
        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                map.clear();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(key.clone(), i as u64);
                }
                black_box(map.len())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_random::<u64, 4>,
    bench_insert_random::<String, 3>,
    bench_find_hit_miss::<u64, 4>,
    bench_find_hit_miss::<String, 3>,
    bench_iteration::<u64, 4>,
    bench_iteration::<String, 3>,
    bench_clear_refill::<u64, 4>,
    bench_clear_refill::<String, 3>,
);

criterion_main!(benches);
