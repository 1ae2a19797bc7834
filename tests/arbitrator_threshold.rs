//! End-to-end worker-budget threshold learning, driven entirely through the
//! public arbitrator API (no internal test-module access).

use sim_core::arbitrator::{SystemKind, WorkerBudgetArbitrator};

#[test]
fn repeated_slow_observations_learn_a_threshold_within_ten_ticks_then_clear_on_drop() {
    let arb = WorkerBudgetArbitrator::new(8);
    assert!(!arb.should_use_threading(SystemKind::Collision, 5_000).should_thread);

    let mut ticks_to_learn = None;
    for tick in 1..=10 {
        arb.report_observation(SystemKind::Collision, 5_000, 1.5);
        if arb.is_active(SystemKind::Collision) {
            ticks_to_learn = Some(tick);
            break;
        }
    }
    assert!(ticks_to_learn.is_some(), "threshold should activate within 10 ticks");
    assert!(arb.should_use_threading(SystemKind::Collision, 5_000).should_thread);

    // 4_500 < 95% of 5_000 (4_750): drop clears the learned threshold.
    arb.report_observation(SystemKind::Collision, 4_500, 1.5);
    assert!(!arb.is_active(SystemKind::Collision));
    assert!(!arb.should_use_threading(SystemKind::Collision, 4_500).should_thread);
}
