mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Fault, FaultyProvider, settings};
use stackgrid_autoscale::{EvaluationOutcome, ScalingController};
use stackgrid_core::StackConfig;
use stackgrid_orchestrator::{NotAttemptedReason, Orchestrator, PlanAction, Stack, UnitOutcome, compose};
use stackgrid_provider::{LocalProvider, Provider};
use tokio::sync::watch;

fn scaffold() -> Stack {
    compose(&StackConfig::scaffold("demo", "10.0.0.0/16".parse().unwrap())).unwrap()
}

fn layered() -> Stack {
    let config = StackConfig::from_toml_str(
        r#"
[stack]
name = "layered"

[[unit]]
name = "network"
kind = "network"
address_block = "10.0.0.0/16"

[[unit]]
name = "application"
kind = "application"
network = "network"

[[unit]]
name = "web"
kind = "web_server"
network = "network"
load_balanced = false

[[unit]]
name = "edge"
kind = "web_server"
network = "network"
depends_on = ["application"]
load_balanced = false
"#,
    )
    .unwrap();
    compose(&config).unwrap()
}

/// A shutdown channel whose sender is already gone; apply never cancels.
fn idle() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn reapply_changes_nothing() {
    let stack = scaffold();
    let orchestrator = Orchestrator::new(Arc::new(FaultyProvider::new()), settings());

    let first = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert!(first.is_success());
    assert!(first.units.iter().all(|r| r.outcome == UnitOutcome::Created));

    let plan = orchestrator.plan(&stack.graph).await.unwrap();
    assert!(!plan.has_changes());

    let second = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert!(second.units.iter().all(|r| r.outcome == UnitOutcome::Unchanged));
}

#[tokio::test]
async fn config_change_updates_only_affected_unit() {
    let provider = Arc::new(FaultyProvider::new());
    let orchestrator = Orchestrator::new(provider.clone(), settings());
    orchestrator.apply(&scaffold().graph, idle()).await.unwrap();

    let mut config = StackConfig::scaffold("demo", "10.0.0.0/16".parse().unwrap());
    config.units[1].max_capacity = Some(20);
    let stack = compose(&config).unwrap();

    let plan = orchestrator.plan(&stack.graph).await.unwrap();
    let app = plan.unit("application").unwrap();
    assert!(app.resources.iter().any(|r| r.name == "application/asg" && r.action == PlanAction::Update));
    assert_eq!(plan.unit("network").unwrap().changes(), 0);

    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert_eq!(report.outcome("network"), Some(&UnitOutcome::Unchanged));
    assert_eq!(report.outcome("application"), Some(&UnitOutcome::Updated));

    let asg = provider.inner.store().find_resource("application/asg").unwrap().unwrap();
    assert_eq!(asg.capacity, Some(2));
}

#[tokio::test]
async fn failure_stops_dependants_only() {
    let stack = layered();
    let provider = Arc::new(FaultyProvider::new().with_fault("application/alb", Fault::Reject));
    let orchestrator = Orchestrator::new(provider.clone(), settings());

    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();

    assert_eq!(report.outcome("network"), Some(&UnitOutcome::Created));
    assert_eq!(report.outcome("web"), Some(&UnitOutcome::Created));
    assert!(matches!(
        report.outcome("application"),
        Some(UnitOutcome::Failed(reason)) if reason.starts_with("application/alb")
    ));
    assert_eq!(
        report.outcome("edge"),
        Some(&UnitOutcome::NotAttempted(NotAttemptedReason::DependencyFailed(
            "application".to_string()
        )))
    );
    assert_eq!(report.failed().count(), 1);
    assert!(!report.is_success());

    // Resources created before the failure stay in place.
    let store = provider.inner.store();
    assert!(store.find_resource("application/alb-sg").unwrap().is_some());
    assert!(store.find_resource("edge/web-sg").unwrap().is_none());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let stack = scaffold();
    let provider = Arc::new(FaultyProvider::new().with_fault("network/vpc", Fault::FailTimes(2)));
    let orchestrator = Orchestrator::new(provider.clone(), settings());

    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcome("network"), Some(&UnitOutcome::Created));

    let resources = stack.resources().count();
    assert_eq!(provider.creates(), resources + 2);
}

#[tokio::test]
async fn retries_are_bounded() {
    let stack = scaffold();
    let provider = Arc::new(FaultyProvider::new().with_fault("network/vpc", Fault::FailTimes(3)));
    let orchestrator = Orchestrator::new(provider.clone(), settings());

    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert!(matches!(report.outcome("network"), Some(UnitOutcome::Failed(_))));
    assert_eq!(
        report.outcome("application"),
        Some(&UnitOutcome::NotAttempted(NotAttemptedReason::DependencyFailed(
            "network".to_string()
        )))
    );
    assert_eq!(provider.creates(), 3);
}

#[tokio::test]
async fn cancellation_marks_units_not_attempted() {
    let stack = scaffold();
    let provider = Arc::new(FaultyProvider::new().with_fault("application/alb", Fault::Hang));
    let orchestrator = Orchestrator::new(provider.clone(), settings());
    let (tx, rx) = watch::channel(false);

    let apply = tokio::spawn(async move { orchestrator.apply(&stack.graph, rx).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    tx.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), apply)
        .await
        .expect("apply should stop promptly")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome("network"), Some(&UnitOutcome::Created));
    assert_eq!(
        report.outcome("application"),
        Some(&UnitOutcome::NotAttempted(NotAttemptedReason::Cancelled))
    );
    assert_eq!(report.failed().count(), 0);
}

fn imported() -> Stack {
    let config = StackConfig::from_toml_str(
        r#"
[stack]
name = "imported"

[[unit]]
name = "network"
kind = "imported_network"
vpc_id = "vpc-0abc"
address_block = "10.1.0.0/20"

[[unit]]
name = "application"
network = "network"
"#,
    )
    .unwrap();
    compose(&config).unwrap()
}

#[tokio::test]
async fn missing_imported_network_fails() {
    let stack = imported();
    let provider = Arc::new(FaultyProvider::new());
    let orchestrator = Orchestrator::new(provider.clone(), settings());

    let plan = orchestrator.plan(&stack.graph).await.unwrap();
    assert_eq!(plan.unit("network").unwrap().resources[0].action, PlanAction::Missing);

    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert!(matches!(
        report.outcome("network"),
        Some(UnitOutcome::Failed(reason)) if reason.contains("not found")
    ));
    assert!(matches!(
        report.outcome("application"),
        Some(UnitOutcome::NotAttempted(NotAttemptedReason::DependencyFailed(_)))
    ));
    assert_eq!(provider.creates(), 0);
}

#[tokio::test]
async fn registered_imported_network_is_looked_up() {
    let stack = imported();
    let provider = Arc::new(FaultyProvider::new());
    let vpc = stack.graph.unit("network").unwrap().resources()[0].clone();
    provider.inner.register_existing("network", vpc).unwrap();
    let orchestrator = Orchestrator::new(provider.clone(), settings());

    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert_eq!(report.outcome("network"), Some(&UnitOutcome::Unchanged));
    assert_eq!(report.outcome("application"), Some(&UnitOutcome::Created));
}

#[tokio::test]
async fn prune_removes_undeclared_resources() {
    let provider = Arc::new(FaultyProvider::new());
    let orchestrator = Orchestrator::new(provider.clone(), settings());
    orchestrator.apply(&scaffold().graph, idle()).await.unwrap();

    let mut config = StackConfig::scaffold("demo", "10.0.0.0/16".parse().unwrap());
    config.units[1].scaling_steps = None;
    let stack = compose(&config).unwrap();

    let plan = orchestrator.plan(&stack.graph).await.unwrap();
    assert!(
        plan.unit("application")
            .unwrap()
            .resources
            .iter()
            .any(|r| r.name == "application/scaling-policy" && r.action == PlanAction::Prune)
    );

    // Without pruning the stale record survives.
    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert_eq!(report.outcome("application"), Some(&UnitOutcome::Unchanged));
    assert!(provider.find("application/scaling-policy").await.unwrap().is_some());

    let pruning = Orchestrator::new(provider.clone(), settings().with_prune(true));
    let report = pruning.apply(&stack.graph, idle()).await.unwrap();
    assert_eq!(report.outcome("application"), Some(&UnitOutcome::Updated));
    assert!(provider.find("application/scaling-policy").await.unwrap().is_none());
}

#[tokio::test]
async fn applied_stack_scales_on_metrics() {
    let stack = scaffold();
    let provider = Arc::new(LocalProvider::in_memory().unwrap());
    let orchestrator = Orchestrator::new(provider.clone(), settings());
    assert!(orchestrator.apply(&stack.graph, idle()).await.unwrap().is_success());

    let mut controller = ScalingController::new(provider.clone(), provider.clone(), Duration::from_secs(1));
    for target in &stack.scaling {
        controller.add_target(target.clone());
    }
    let target = &stack.scaling[0];
    provider.record_metric(&target.metric.stream_key(), 65.0).unwrap();

    let results = controller.evaluate_all().await;
    assert_eq!(results.len(), 1);
    let EvaluationOutcome::Scaled(decision) = &results[0].1 else {
        panic!("expected a scale-out, got {:?}", results[0].1);
    };
    assert_eq!(decision.current, 2);
    assert_eq!(decision.new_capacity, 5);

    let asg = provider.store().find_resource("application/asg").unwrap().unwrap();
    assert_eq!(asg.capacity, Some(5));

    // Re-applying the unchanged stack leaves the scaled capacity alone.
    let report = orchestrator.apply(&stack.graph, idle()).await.unwrap();
    assert!(report.units.iter().all(|r| r.outcome == UnitOutcome::Unchanged));
    let asg = provider.store().find_resource("application/asg").unwrap().unwrap();
    assert_eq!(asg.capacity, Some(5));
}

async fn timed_apply(concurrency: usize) -> Duration {
    let delay = Duration::from_millis(250);
    let provider = Arc::new(
        FaultyProvider::new()
            .with_fault("application/alb", Fault::Slow(delay))
            .with_fault("web/instance", Fault::Slow(delay)),
    );
    let mut settings = settings();
    settings.concurrency = concurrency;
    let orchestrator = Orchestrator::new(provider, settings);

    let started = Instant::now();
    let report = orchestrator.apply(&layered().graph, idle()).await.unwrap();
    let elapsed = started.elapsed();
    assert!(report.is_success(), "{report:?}");
    elapsed
}

#[tokio::test]
async fn independent_units_apply_in_parallel() {
    // application and web both depend only on network.
    let elapsed = timed_apply(2).await;
    assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
}

#[tokio::test]
async fn concurrency_limit_serializes_units() {
    let elapsed = timed_apply(1).await;
    assert!(elapsed >= Duration::from_millis(500), "took {elapsed:?}");
}
