//! Performance benchmarks for classgate-core.
//!
//! Run with: cargo bench -p classgate-core

use chrono::{Duration, Utc};
use classgate_core::config::parse_duration;
use classgate_core::{RefreshToken, Role, SessionStore, SledStore, User};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

/// Benchmark refresh token lookups, the hot path of every refresh.
fn bench_refresh_lookup(c: &mut Criterion) {
    let store = SledStore::temporary().unwrap();
    let user = User::new("bench", "digest", Role::Student, None);
    store.create_user(&user).unwrap();

    let expires = Utc::now() + Duration::hours(1);
    let tokens: Vec<String> = (0..1000).map(|i| format!("refresh-{i}")).collect();
    for token in &tokens {
        store
            .create_refresh_token(&RefreshToken::new(&user.id, token, expires))
            .unwrap();
    }

    c.bench_function("refresh_lookup", |b| {
        let mut i = 0;
        b.iter(|| {
            let token = &tokens[i % tokens.len()];
            i += 1;
            store.get_refresh_token(black_box(token)).unwrap()
        });
    });
}

/// Benchmark username lookups at different user counts.
fn bench_username_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("username_lookup");

    for count in [10, 1000].iter() {
        let store = SledStore::temporary().unwrap();
        for i in 0..*count {
            let user = User::new(format!("user{i}"), "digest", Role::Student, None);
            store.create_user(&user).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("users", count), count, |b, &n| {
            let target = format!("user{}", n / 2);
            b.iter(|| store.get_user_by_username(black_box(&target)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark revoking every session of a user.
fn bench_logout(c: &mut Criterion) {
    let mut group = c.benchmark_group("logout");

    for sessions in [1, 50].iter() {
        group.bench_with_input(BenchmarkId::new("sessions", sessions), sessions, |b, &n| {
            let store = SledStore::temporary().unwrap();
            let user = User::new("bench", "digest", Role::Teacher, None);
            store.create_user(&user).unwrap();
            let expires = Utc::now() + Duration::hours(1);

            b.iter(|| {
                for i in 0..n {
                    store
                        .create_refresh_token(&RefreshToken::new(&user.id, format!("t{i}"), expires))
                        .unwrap();
                }
                store.delete_refresh_tokens_for_user(black_box(&user.id)).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_parse_duration(c: &mut Criterion) {
    c.bench_function("parse_duration", |b| {
        b.iter(|| parse_duration(black_box("1h30m15s")).unwrap());
    });
}

criterion_group!(
    benches,
    bench_refresh_lookup,
    bench_username_lookup,
    bench_logout,
    bench_parse_duration,
);
criterion_main!(benches);
