use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use trackwise_resilience::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, StateChange};
use trackwise_resilience::clock::{Clock, ManualClock};
use trackwise_resilience::gateway::{
    CallError, CallGateway, GatewayError, Request, Response, TimeoutTransport,
};
use trackwise_resilience::retry::RetryPolicy;
use trackwise_resilience::rpc::{HandlerError, LocalTransport, Service};

use crate::support::init_tracing;

/// Intelligence-side state: a risk score table that can be switched off.
#[derive(Default)]
struct RiskScores {
    down: AtomicBool,
    served: AtomicUsize,
}

fn intelligence(scores: Arc<RiskScores>) -> Arc<Service<Arc<RiskScores>>> {
    Arc::new(Service::new(scores).command_guarded(
        "risk.score",
        |ctx| ctx.has_fields(&["account"]),
        |ctx| {
            let state = ctx.state();
            state.served.fetch_add(1, Ordering::SeqCst);
            if state.down.load(Ordering::SeqCst) {
                return Err(HandlerError::Unavailable("model reloading".into()));
            }
            match ctx.raw_input()["account"].as_str() {
                Some("acct-404") => Err(HandlerError::NotFound("acct-404".into())),
                Some(account) => Ok(json!({ "account": account, "score": 0.25 })),
                None => Err(HandlerError::Rejected("account must be a string".into())),
            }
        },
    ))
}

fn registry(clock: &ManualClock) -> Arc<CircuitBreakerRegistry> {
    Arc::new(CircuitBreakerRegistry::with_clock(
        CircuitBreakerConfig::default()
            .with_failure_threshold(3)
            .with_cooldown(Duration::from_secs(10)),
        Arc::new(clock.clone()),
    ))
}

fn score(account: &str) -> Request {
    Request::new("risk.score", json!({ "account": account }))
        .with_header("x-caller-service", "ledger-service")
}

#[test]
fn lookups_fail_fast_while_dependency_is_down_and_recover() {
    init_tracing();
    let clock = ManualClock::new();
    let scores = Arc::new(RiskScores::default());
    let registry = registry(&clock);

    let changes: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::default();
    let seen = Arc::clone(&changes);
    registry.add_listener(Arc::new(move |change: &StateChange| {
        seen.lock().unwrap().push((change.from, change.to));
    }));

    let gateway = CallGateway::new(Arc::clone(&registry))
        .with_dependency("intelligence", LocalTransport::new(intelligence(Arc::clone(&scores))))
        .with_retry_policy(
            "intelligence",
            RetryPolicy::new()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(50))
                .with_jitter(0.0),
        )
        .with_clock(Arc::new(clock.clone()));

    scores.down.store(true, Ordering::SeqCst);

    let err = gateway.call("intelligence", score("acct-1")).unwrap_err();
    assert!(matches!(err, GatewayError::RetriesExhausted { attempts: 2, .. }));

    // Third failure trips the breaker; the retry then sees it open.
    let err = gateway.call("intelligence", score("acct-1")).unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(scores.served.load(Ordering::SeqCst), 3);

    for _ in 0..5 {
        match gateway.call("intelligence", score("acct-1")) {
            Err(GatewayError::CircuitOpen(open)) => {
                assert_eq!(open.name, "intelligence");
                assert!(open.retry_after.is_some());
            }
            other => panic!("expected fail-fast, got {:?}", other),
        }
    }
    assert_eq!(scores.served.load(Ordering::SeqCst), 3);

    scores.down.store(false, Ordering::SeqCst);
    clock.advance(Duration::from_secs(10));

    let response = gateway.call("intelligence", score("acct-1")).unwrap();
    assert_eq!(response.body["score"], json!(0.25));
    assert_eq!(registry.get_or_create("intelligence").state(), CircuitState::Closed);
    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[test]
fn client_errors_neither_retry_nor_trip() {
    init_tracing();
    let clock = ManualClock::new();
    let scores = Arc::new(RiskScores::default());
    let registry = registry(&clock);
    let gateway = CallGateway::new(Arc::clone(&registry))
        .with_dependency("intelligence", LocalTransport::new(intelligence(Arc::clone(&scores))))
        .with_clock(Arc::new(clock.clone()));

    for _ in 0..5 {
        let err = gateway.call("intelligence", score("acct-404")).unwrap_err();
        assert!(matches!(err, GatewayError::Remote(ref e) if e.status == 404));
    }
    let err = gateway
        .call("intelligence", Request::new("risk.score", json!({ "acct": 1 })))
        .unwrap_err();
    assert!(matches!(err, GatewayError::Remote(ref e) if e.status == 400));

    assert_eq!(scores.served.load(Ordering::SeqCst), 5);
    assert_eq!(registry.get_or_create("intelligence").state(), CircuitState::Closed);
    assert!(clock.sleeps().is_empty());
}

#[test]
fn dependencies_have_independent_breakers() {
    init_tracing();
    let clock = ManualClock::new();
    let healthy = Arc::new(RiskScores::default());
    let failing = Arc::new(RiskScores::default());
    failing.down.store(true, Ordering::SeqCst);

    let registry = registry(&clock);
    let gateway = CallGateway::new(Arc::clone(&registry))
        .with_dependency("intelligence", LocalTransport::new(intelligence(healthy)))
        .with_dependency("fraud", LocalTransport::new(intelligence(failing)))
        .with_default_retry_policy(RetryPolicy::no_retry())
        .with_clock(Arc::new(clock.clone()));

    for _ in 0..3 {
        let _ = gateway.call("fraud", score("acct-1"));
    }
    assert!(gateway.call("fraud", score("acct-1")).unwrap_err().is_circuit_open());
    assert!(gateway.call("intelligence", score("acct-1")).is_ok());

    let snapshots = registry.snapshots();
    let states: Vec<_> = snapshots.iter().map(|s| (s.name.as_str(), s.state)).collect();
    assert_eq!(
        states,
        vec![("fraud", CircuitState::Open), ("intelligence", CircuitState::Closed)]
    );
}

#[test]
fn slow_dependency_is_abandoned_at_the_timeout() {
    init_tracing();
    let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let slow = |_: &Request, _: Duration| -> Result<Response, CallError> {
        thread::sleep(Duration::from_millis(500));
        Ok(Response::ok(json!({})))
    };
    let gateway = CallGateway::new(Arc::clone(&registry))
        .with_dependency("intelligence", TimeoutTransport::new(slow))
        .with_timeout("intelligence", Duration::from_millis(30))
        .with_default_retry_policy(RetryPolicy::new().with_max_attempts(1));

    let started = Instant::now();
    let err = gateway.call("intelligence", score("acct-1")).unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(400));
    match err {
        GatewayError::RetriesExhausted { last, attempts, .. } => {
            assert_eq!(attempts, 1);
            assert_eq!(last, CallError::Timeout(Duration::from_millis(30)));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(registry.get_or_create("intelligence").snapshot().failure_count, 1);
}

#[cfg(feature = "emitter")]
#[test]
fn state_changes_reach_emitter_subscribers() {
    use trackwise_resilience::breaker::EmitterListener;
    use trackwise_resilience::EventEmitter;

    init_tracing();
    let clock = ManualClock::new();
    let registry = registry(&clock);

    let received: Arc<Mutex<Vec<StateChange>>> = Arc::default();
    let sink = Arc::clone(&received);
    let mut emitter = EventEmitter::new();
    emitter.on(EmitterListener::EVENT, move |change: StateChange| {
        sink.lock().unwrap().push(change);
    });
    registry.add_listener(Arc::new(EmitterListener::new(emitter)));

    let breaker = registry.get_or_create("broker");
    for _ in 0..3 {
        let _ = breaker.call(|| Err::<(), _>("connection refused"));
    }

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].breaker, "broker");
    assert_eq!(received[0].to, CircuitState::Open);
    assert_eq!(received[0].open_until, Some(clock.now() + Duration::from_secs(10)));
}
