//! Property-based tests for the escalation pipeline and storage.
//!
//! Verifies invariants that must hold for any input order:
//! - cleanup is idempotent: one overlay removal and a free surface, however
//!   many times it is called and wherever the stage was
//! - the coordinator never runs two stages and the surface has one holder
//! - the news counter reports the limit exactly from the crossing call on
//! - an interval's next deadline is always within one period after `now`

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use scrollguard_core::escalation::{
    BlockStage, CountdownStage, FadeTransitionStage, WarningStage,
};
use scrollguard_core::storage::EscalationConfig;
use scrollguard_core::surface::SurfaceOwner;
use scrollguard_core::{
    BlockScope, EscalationCoordinator, Interval, KvTimeManager, MemoryKv, MemorySurface,
    SiteType, Stage, SurfaceLock, TimeManager,
};

// =============================================================================
// Helpers
// =============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn times(limit_ms: u64) -> Arc<KvTimeManager<MemoryKv>> {
    Arc::new(KvTimeManager::new(
        MemoryKv::new(),
        Duration::minutes(30),
        limit_ms,
    ))
}

#[derive(Debug, Clone, Copy)]
enum Which {
    Warning,
    Fade,
    Countdown,
    Block,
}

fn arb_stage() -> impl Strategy<Value = Which> {
    prop_oneof![
        Just(Which::Warning),
        Just(Which::Fade),
        Just(Which::Countdown),
        Just(Which::Block),
    ]
}

fn build(which: Which, surface: &Arc<MemorySurface>, lock: &SurfaceLock) -> Box<dyn Stage> {
    let config = EscalationConfig::default();
    match which {
        Which::Warning => Box::new(WarningStage::new(
            "x.com",
            &config,
            surface.clone(),
            lock.clone(),
        )),
        Which::Fade => Box::new(FadeTransitionStage::new(
            "x.com",
            &config,
            surface.clone(),
            lock.clone(),
        )),
        Which::Countdown => Box::new(CountdownStage::new(
            "x.com",
            &config,
            surface.clone(),
            lock.clone(),
        )),
        Which::Block => {
            let times = times(20 * 60 * 1000);
            Box::new(BlockStage::new(
                "x.com",
                BlockScope::host("x.com"),
                &config,
                surface.clone(),
                lock.clone(),
                times,
            ))
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Detect,
    Advance(i64),
    ShowBlock,
    Abort,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Detect),
        6 => (1i64..3_000).prop_map(Op::Advance),
        1 => Just(Op::ShowBlock),
        1 => Just(Op::Abort),
    ]
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn cleanup_is_idempotent(
        which in arb_stage(),
        advance_ms in 0i64..20_000,
        cleanups in 1usize..5,
    ) {
        let surface = Arc::new(MemorySurface::new(3));
        let lock = SurfaceLock::new();
        let mut stage = build(which, &surface, &lock);

        block_on(async {
            stage.start(t0()).await.unwrap();
            let end = t0() + Duration::milliseconds(advance_ms);
            while let Some(deadline) = stage.next_deadline() {
                if deadline > end {
                    break;
                }
                stage.tick(deadline).await.unwrap();
            }
        });

        for _ in 0..cleanups {
            stage.cleanup();
        }

        let snap = surface.snapshot();
        prop_assert_eq!(snap.removals, 1);
        prop_assert!(snap.mounted.is_empty());
        prop_assert!(!lock.is_owned());
        prop_assert!(!stage.is_active());
        prop_assert_eq!(stage.next_deadline(), None);
    }

    #[test]
    fn coordinator_never_runs_two_stages(ops in prop::collection::vec(arb_op(), 1..40)) {
        let surface = Arc::new(MemorySurface::new(4));
        let lock = SurfaceLock::new();
        let times = times(20 * 60 * 1000);
        let site = SiteType { is_blocked: true, is_news: false };
        let mut coordinator = EscalationCoordinator::new(
            "x.com",
            site,
            EscalationConfig::default(),
            surface.clone(),
            lock.clone(),
            times.clone(),
        );

        block_on(async {
            let mut now = t0();
            for op in ops {
                match op {
                    Op::Detect => {
                        coordinator.on_doomscroll_detected(now).await.unwrap();
                    }
                    Op::Advance(ms) => {
                        now += Duration::milliseconds(ms);
                        coordinator.tick(now).await.unwrap();
                    }
                    Op::ShowBlock => {
                        times.create_time_block("x.com", now).await.unwrap();
                        coordinator.show_block(BlockScope::host("x.com"), now).await.unwrap();
                    }
                    Op::Abort => coordinator.abort(now),
                }

                let mounted = surface.snapshot().mounted.len();
                prop_assert!(mounted <= 1, "{} overlays mounted", mounted);
                match coordinator.active_stage() {
                    Some(kind) => prop_assert_eq!(lock.owner(), Some(SurfaceOwner::Stage(kind))),
                    None => prop_assert_eq!(lock.owner(), None),
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn news_limit_reported_from_the_crossing_call(
        deltas in prop::collection::vec(0u64..300_000, 1..30),
        limit_min in 1u64..30,
    ) {
        let limit_ms = limit_min * 60_000;
        let times = times(limit_ms);

        let results = block_on(async {
            let mut results = Vec::new();
            for (i, delta) in deltas.iter().enumerate() {
                let now = t0() + Duration::seconds(i as i64);
                results.push(times.add_news_time(*delta, now).await.unwrap());
            }
            results
        });

        let mut total = 0u64;
        for (delta, reached) in deltas.iter().zip(results) {
            total += delta;
            prop_assert_eq!(reached, total >= limit_ms);
        }
    }

    #[test]
    fn interval_deadline_stays_within_one_period(
        period_ms in 1i64..5_000,
        steps in prop::collection::vec(-10_000i64..60_000, 1..50),
    ) {
        let mut interval = Interval::new(Duration::milliseconds(period_ms));
        let period = Duration::milliseconds(period_ms);
        let mut now = t0();
        interval.start(now);

        for step in steps {
            now += Duration::milliseconds(step);
            interval.poll(now);
            let next = interval.next_deadline().unwrap();
            prop_assert!(next > now);
            prop_assert!(next <= now + period);
        }
    }
}
