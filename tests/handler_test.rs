//! Integration tests for routing and the built-in handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use eventq::config::HandlerSpec;
use eventq::handler::{CommandHandler, DelayHandler, EventHandler, Router, handler_fn};
use eventq::model::{ClaimedEvent, EventId};

fn event(event_type: &str, payload: &str) -> ClaimedEvent {
    ClaimedEvent {
        id: EventId::from("evt-7"),
        idempotency_key: "order-7".to_string(),
        event_type: event_type.to_string(),
        payload: payload.to_string(),
    }
}

fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
    Arc::new(handler_fn(move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }))
}

#[tokio::test]
async fn handler_fn_sees_the_event() {
    let handler = handler_fn(|event| async move {
        anyhow::ensure!(event.payload == "{\"n\":1}", "unexpected payload");
        Ok(())
    });
    handler.handle(&event("any", "{\"n\":1}")).await.unwrap();
    assert!(handler.handle(&event("any", "other")).await.is_err());
}

#[tokio::test]
async fn router_dispatches_by_event_type() {
    let created = Arc::new(AtomicUsize::new(0));
    let deleted = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("created", counting(Arc::clone(&created)))
        .route("deleted", counting(Arc::clone(&deleted)));

    router.handle(&event("created", "")).await.unwrap();
    router.handle(&event("created", "")).await.unwrap();
    router.handle(&event("deleted", "")).await.unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn router_without_route_or_fallback_fails() {
    let router = Router::new().route("created", counting(Arc::new(AtomicUsize::new(0))));
    assert!(router.handles("created"));
    assert!(!router.handles("unknown"));

    let err = router.handle(&event("unknown", "")).await.unwrap_err();
    assert!(err.to_string().contains("unknown"));
}

#[tokio::test]
async fn router_uses_fallback_for_unrouted_types() {
    let routed = Arc::new(AtomicUsize::new(0));
    let fallback = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("created", counting(Arc::clone(&routed)))
        .fallback(counting(Arc::clone(&fallback)));

    assert!(router.handles("anything"));
    router.handle(&event("anything", "")).await.unwrap();
    router.handle(&event("created", "")).await.unwrap();

    assert_eq!(routed.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn router_without_any_configuration_acknowledges_events() {
    let router = Router::from_specs(&HashMap::new(), None);
    assert!(router.handles("anything"));

    let started = tokio::time::Instant::now();
    router.handle(&event("anything", "{}")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn configured_routes_leave_unknown_types_unhandled() {
    let specs = HashMap::from([(
        "ping".to_string(),
        HandlerSpec {
            command: "true".into(),
            args: Vec::new(),
        },
    )]);
    let router = Router::from_specs(&specs, None);
    assert!(router.handles("ping"));
    assert!(!router.handles("pong"));
    assert!(router.handle(&event("pong", "")).await.is_err());

    let fallback = Arc::new(AtomicUsize::new(0));
    let router = Router::from_specs(&specs, Some(counting(Arc::clone(&fallback))));
    router.handle(&event("pong", "")).await.unwrap();
    assert_eq!(fallback.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn delay_handler_sleeps_then_succeeds() {
    let handler = DelayHandler::new(Duration::from_secs(2));
    let started = tokio::time::Instant::now();
    handler.handle(&event("x", "p")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn command_handler_reports_missing_program() {
    let handler = CommandHandler::new("./definitely/not/here");
    assert!(handler.handle(&event("x", "p")).await.is_err());
}

#[cfg(unix)]
mod unix {
    use super::*;

    fn sh(script: &str) -> CommandHandler {
        CommandHandler::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        sh("exit 0").handle(&event("x", "p")).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let err = sh("exit 3").handle(&event("x", "p")).await.unwrap_err();
        assert!(err.to_string().contains('3'), "{err}");
    }

    #[tokio::test]
    async fn payload_arrives_on_stdin() {
        let handler = sh(r#"test "$(cat)" = '{"amount":10}'"#);
        handler.handle(&event("x", r#"{"amount":10}"#)).await.unwrap();
        assert!(handler.handle(&event("x", "{}")).await.is_err());
    }

    #[tokio::test]
    async fn identity_is_passed_in_the_environment() {
        let handler = sh(concat!(
            r#"test "$EVENTQ_EVENT_ID" = evt-7 && "#,
            r#"test "$EVENTQ_EVENT_TYPE" = paid && "#,
            r#"test "$EVENTQ_IDEMPOTENCY_KEY" = order-7"#,
        ));
        handler.handle(&event("paid", "")).await.unwrap();
        assert!(handler.handle(&event("refunded", "")).await.is_err());
    }

    #[tokio::test]
    async fn child_that_ignores_stdin_is_judged_by_status() {
        let payload = "x".repeat(1 << 20);
        sh("exit 0").handle(&event("x", &payload)).await.unwrap();
    }
}
