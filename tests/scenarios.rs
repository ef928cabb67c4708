//! End-to-end behaviour of the rebalancer with breakers and degrade control.

use std::sync::Arc;
use std::time::Duration;

use upstream_guard::config::DegradeOpts;
use upstream_guard::discovery::StaticDiscovery;
use upstream_guard::resilience::BreakerState;
use upstream_guard::{GuardError, ServiceState};

mod common;
use common::{addresses, harness, harness_with, nodes};

fn weight_of(h: &common::Harness, address: &str) -> u32 {
    h.rb.snapshot()
        .into_iter()
        .find(|n| n.address == address)
        .map(|n| n.cur_weight)
        .unwrap()
}

fn state(h: &common::Harness) -> ServiceState {
    h.registry.get("orders").unwrap().state()
}

#[tokio::test(start_paused = true)]
async fn test_breaker_lifecycle_drives_weight() {
    let h = harness();
    h.rb.reload(nodes(0..5, 100));
    let target = "10.0.0.1:9000";

    for _ in 0..50 {
        tokio::time::advance(Duration::from_millis(10)).await;
        h.rb.record_metrics(target, 503);
    }
    assert_eq!(h.rb.breaker_state(target), Some(BreakerState::Open));
    assert_eq!(weight_of(&h, target), 0);

    // Re-arm after the fallback duration.
    tokio::time::sleep(Duration::from_millis(10_001)).await;
    assert_eq!(weight_of(&h, target), 1);

    h.rb.record_metrics(target, 200);
    assert_eq!(h.rb.breaker_state(target), Some(BreakerState::HalfOpen));

    let mut last = weight_of(&h, target);
    for _ in 0..101 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.rb.record_metrics(target, 200);
        let w = weight_of(&h, target);
        assert!(w >= last, "ramp went down: {} -> {}", last, w);
        assert!(w <= 100);
        last = w;
    }
    assert_eq!(h.rb.breaker_state(target), Some(BreakerState::Closed));
    assert_eq!(weight_of(&h, target), 100);
}

#[tokio::test(start_paused = true)]
async fn test_open_node_leaves_rotation() {
    let h = harness();
    h.rb.reload(nodes(0..5, 1));
    let target = "10.0.0.1:9002";

    tokio::time::advance(Duration::from_millis(150)).await;
    h.rb.record_metrics(target, 500);
    assert_eq!(h.rb.breaker_state(target), Some(BreakerState::Open));

    for _ in 0..40 {
        assert_ne!(h.rb.next().unwrap(), target);
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_node_service_never_opens() {
    let h = harness();
    h.rb.reload(nodes(0..2, 10));

    for _ in 0..200 {
        tokio::time::advance(Duration::from_millis(50)).await;
        h.rb.record_metrics("10.0.0.1:9000", 500);
        h.rb.record_metrics("10.0.0.1:9001", 404);
    }
    assert_eq!(h.rb.breaker_state("10.0.0.1:9000"), Some(BreakerState::Closed));
    assert_eq!(h.rb.breaker_state("10.0.0.1:9001"), Some(BreakerState::Closed));
    assert_eq!(weight_of(&h, "10.0.0.1:9000"), 10);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_percent_limits_cascading_opens() {
    let h = harness();
    h.rb.reload(nodes(0..5, 1));

    tokio::time::advance(Duration::from_millis(150)).await;
    for addr in addresses(&nodes(0..5, 1)) {
        h.rb.record_metrics(&addr, 500);
    }
    // 4 of 5 closed is the floor at 80%, so only the first trip is accepted.
    let open = h
        .rb
        .snapshot()
        .into_iter()
        .filter(|n| n.breaker == Some("open"))
        .count();
    assert_eq!(open, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shrunken_push_enters_self_protection() {
    let h = harness();
    h.rb.reload(nodes(0..10, 1));
    assert_eq!(h.rb.len(), 10);

    // (2 + 1) / 10 = 0.3 < 0.8
    h.rb.reload(nodes(0..2, 1));
    assert_eq!(state(&h), ServiceState::SelfProtection);
    assert_eq!(h.rb.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_self_protection_exits_when_health_matches_discovery() {
    let h = harness();
    h.rb.reload(nodes(0..10, 1));
    h.prober.set_healthy(addresses(&nodes(0..2, 1)));
    h.rb.reload(nodes(0..2, 1));
    assert_eq!(state(&h), ServiceState::SelfProtection);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state(&h), ServiceState::Normal);
    assert_eq!(h.rb.len(), 2);
    // Union of the 2 new and 10 historical nodes was probed.
    assert_eq!(h.prober.calls(), 10);

    let status = h.registry.get("orders").unwrap().status();
    assert_eq!(status.recent_snapshots, 1);
    assert_eq!(status.recent_baseline, 2);
    assert!(!status.probing);
}

#[tokio::test(start_paused = true)]
async fn test_self_protection_serves_probed_healthy_set() {
    let h = harness();
    h.rb.reload(nodes(0..10, 1));
    h.prober.set_healthy(addresses(&nodes(0..6, 1)));
    h.rb.reload(nodes(0..2, 1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state(&h), ServiceState::SelfProtection);
    assert_eq!(h.rb.len(), 6);
    assert!(!h.rb.is_panic());
}

#[tokio::test(start_paused = true)]
async fn test_panic_falls_back_to_stable_snapshot_and_recovers() {
    let h = harness();
    h.rb.reload(nodes(0..10, 1));
    h.rb.reload(nodes(0..2, 1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state(&h), ServiceState::Panic);
    assert_eq!(h.rb.len(), 10);
    assert!(h.rb.is_panic());
    assert!(h.rb.snapshot().iter().all(|n| n.breaker.is_none()));

    // Panic holds even if discovery pushes again.
    h.rb.reload(nodes(0..2, 1));
    assert_eq!(state(&h), ServiceState::Panic);
    assert_eq!(h.rb.len(), 10);

    h.prober.set_healthy(addresses(&nodes(0..10, 1)));
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(state(&h), ServiceState::SelfProtection);
    assert!(!h.rb.is_panic());
    assert_eq!(h.rb.len(), 10);

    h.prober.set_healthy(addresses(&nodes(0..2, 1)));
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(state(&h), ServiceState::Normal);
    assert_eq!(h.rb.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_push_is_steady() {
    let h = harness();
    h.rb.reload(nodes(0..6, 1));

    for _ in 0..20 {
        tokio::time::advance(Duration::from_secs(61)).await;
        h.rb.reload(nodes(0..5, 1));
        assert_eq!(state(&h), ServiceState::Normal);
    }

    let status = h.registry.get("orders").unwrap().status();
    assert_eq!(status.recent_baseline, 5);
    assert_eq!(status.stable_baseline, 5);
    assert!(status.stable_snapshots <= 16);
    assert_eq!(h.rb.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_global_disable_forces_normal() {
    let h = harness();
    h.rb.reload(nodes(0..10, 1));
    h.rb.reload(nodes(0..2, 1));
    assert_eq!(state(&h), ServiceState::SelfProtection);

    let mut opts = DegradeOpts::default();
    opts.enabled = false;
    h.registry.update_opts(opts);

    assert_eq!(state(&h), ServiceState::Normal);
    assert!(!h.registry.get("orders").unwrap().status().probing);
    assert_eq!(h.rb.len(), 10);

    // Pushes are applied as-is while disabled.
    h.rb.reload(nodes(0..2, 1));
    assert_eq!(h.rb.len(), 2);
    assert_eq!(state(&h), ServiceState::Normal);
}

#[tokio::test(start_paused = true)]
async fn test_max_time_exit_uses_latest_list() {
    let mut opts = DegradeOpts::default();
    opts.self_protection_max_secs = 60;
    let h = harness_with(opts);
    h.rb.reload(nodes(0..10, 1));
    h.prober.set_healthy(addresses(&nodes(0..5, 1)));
    h.rb.reload(nodes(8..10, 1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state(&h), ServiceState::SelfProtection);
    assert_eq!(h.rb.len(), 5);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(state(&h), ServiceState::Normal);
    let mut served: Vec<String> = h.rb.snapshot().into_iter().map(|n| n.address).collect();
    served.sort();
    assert_eq!(served, addresses(&nodes(8..10, 1)));
}

#[tokio::test]
async fn test_lookup_failure_keeps_current_nodes() {
    let h = harness();
    h.rb.reload(nodes(0..3, 1));

    let empty = StaticDiscovery::default();
    let err = h.rb.refresh(&empty).unwrap_err();
    assert!(matches!(err, GuardError::Lookup { .. }));
    assert_eq!(h.rb.len(), 3);
    assert!(h.rb.next().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selection_during_reloads() {
    let h = Arc::new(harness());
    h.rb.reload(nodes(0..8, 5));

    let mut tasks = Vec::new();
    for t in 0..4 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..2_000 {
                let addr = h.rb.next().unwrap();
                let status = if (i + t) % 7 == 0 { 500 } else { 200 };
                h.rb.record_metrics(&addr, status);
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for round in 0..20u16 {
        // Alternate between 8 and 7 nodes; never shrinks enough to degrade.
        h.rb.reload(nodes(0..8 - (round % 2), 5));
        tokio::task::yield_now().await;
    }
    for task in tasks {
        task.await.unwrap();
    }

    for node in h.rb.snapshot() {
        assert!(node.cur_weight <= node.orig_weight);
    }
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_addresses_in_push_still_exit() {
    let h = harness();
    h.rb.reload(nodes(0..10, 1));
    h.prober.set_healthy(addresses(&nodes(0..2, 1)));

    let mut pushed = nodes(0..2, 1);
    pushed.extend(nodes(1..2, 1));
    h.rb.reload(pushed);
    assert_eq!(state(&h), ServiceState::SelfProtection);
    assert_eq!(h.registry.get("orders").unwrap().status().latest_nodes, 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state(&h), ServiceState::Normal);
    assert_eq!(h.rb.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_panic_ignores_self_protection_max_time() {
    let mut opts = DegradeOpts::default();
    opts.self_protection_max_secs = 60;
    let h = harness_with(opts);
    h.rb.reload(nodes(0..10, 1));
    h.rb.reload(nodes(0..2, 1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state(&h), ServiceState::Panic);

    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(state(&h), ServiceState::Panic);
    assert!(h.rb.is_panic());
    assert_eq!(h.rb.len(), 10);
    assert!(h.registry.get("orders").unwrap().status().probing);
}
