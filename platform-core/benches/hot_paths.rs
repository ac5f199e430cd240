//! Micro-benchmarks for the two per-request hot paths: token validation
//! (constant-time compare) and rate-limit admission (token bucket refill).

use chrono::Duration;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use platform_core::rate_limit::{RateLimitPolicy, RateLimiter};
use platform_core::token::{TokenScope, TokenService};

fn bench_token_validate(c: &mut Criterion) {
    let svc = TokenService::new();
    let (token, _) = svc.mint("bench-runtime", TokenScope::Runtime, Duration::seconds(60)).unwrap();
    c.bench_function("token_validate_hit", |b| {
        b.iter(|| svc.validate(black_box(&token)))
    });
    c.bench_function("token_validate_miss", |b| {
        b.iter(|| svc.validate(black_box("not-a-real-token")))
    });
}

fn bench_rate_limit_allow(c: &mut Criterion) {
    let limiter = RateLimiter::new(std::time::Duration::from_secs(300));
    let policy = RateLimitPolicy {
        rate_per_second: 1_000_000.0,
        burst: 1_000_000.0,
    };
    c.bench_function("rate_limit_allow", |b| {
        b.iter(|| limiter.allow(black_box("bench-caller"), policy))
    });
}

criterion_group!(benches, bench_token_validate, bench_rate_limit_allow);
criterion_main!(benches);
