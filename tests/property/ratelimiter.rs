//! Sliding-window and concurrency-cap properties.

use std::time::{Duration, Instant};

use conductor_ratelimiter::{
    AdmissionLimiter, RateLimitRules, RateLimiterConfig, Tier,
};
use proptest::prelude::*;

fn limiter_with(rules: RateLimitRules) -> AdmissionLimiter {
    AdmissionLimiter::new(
        RateLimiterConfig::builder()
            .clear_endpoint_overrides()
            .tier_rules(Tier::Free, rules)
            .build(),
    )
}

proptest! {
    /// No 60-second window ever contains more admissions than the limit,
    /// no matter how requests are spaced.
    #[test]
    fn minute_window_never_exceeded(
        limit in 1u32..20,
        mut offsets_ms in prop::collection::vec(0u64..180_000, 1..200)
    ) {
        let limiter = limiter_with(RateLimitRules {
            per_minute: Some(limit),
            ..Default::default()
        });
        let base = Instant::now();
        offsets_ms.sort_unstable();

        let mut admitted: Vec<u64> = Vec::new();
        for offset in offsets_ms {
            let now = base + Duration::from_millis(offset);
            if limiter
                .admit_at("client", "/queue/enqueue", Tier::Free, now)
                .is_admitted()
            {
                admitted.push(offset);
            }
        }

        // Slide a minute-wide window over the admissions.
        let mut start = 0usize;
        for end in 0..admitted.len() {
            while admitted[end] - admitted[start] >= 60_000 {
                start += 1;
            }
            let in_window = end - start + 1;
            prop_assert!(
                in_window as u32 <= limit,
                "{in_window} admissions inside one minute with limit {limit}"
            );
        }
    }

    /// The concurrency counter never exceeds its cap under interleaved
    /// admissions and releases, and rejected requests consume nothing.
    #[test]
    fn concurrency_cap_never_exceeded(
        cap in 1u32..10,
        ops in prop::collection::vec(any::<bool>(), 1..150)
    ) {
        let limiter = limiter_with(RateLimitRules {
            concurrent: Some(cap),
            ..Default::default()
        });
        let now = Instant::now();

        let mut in_use = 0u32;
        for admit in ops {
            if admit {
                if limiter.admit_at("client", "/x", Tier::Free, now).is_admitted() {
                    in_use += 1;
                }
            } else if in_use > 0 {
                limiter.release("client");
                in_use -= 1;
            }
            prop_assert!(in_use <= cap);
            prop_assert_eq!(limiter.concurrent_count("client") as u32, in_use);
        }
    }

    /// Composition with an endpoint override never loosens a tier limit.
    #[test]
    fn composition_is_monotone(
        tier_limit in 1u32..1000,
        override_limit in 1u32..1000
    ) {
        let composed = RateLimitRules {
            per_minute: Some(tier_limit),
            ..Default::default()
        }
        .compose(RateLimitRules {
            per_minute: Some(override_limit),
            ..Default::default()
        });
        prop_assert_eq!(composed.per_minute, Some(tier_limit.min(override_limit)));
    }
}
