use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stackgrid_autoscale::{EvaluationOutcome, ScalingController};
use stackgrid_core::{MetricQuery, StackConfig, Statistic};
use stackgrid_orchestrator::compose;
use tokio::sync::watch;
use tracing::info;

use super::open_provider;
use crate::StackArgs;

pub async fn scale(args: &StackArgs, once: bool) -> anyhow::Result<()> {
    let config = StackConfig::from_file(&args.config)?;
    let stack = compose(&config)?;
    let provider = Arc::new(open_provider(&args.data_dir)?);

    let mut controller = ScalingController::new(
        provider.clone(),
        provider,
        Duration::from_secs(config.scaling.call_timeout_secs),
    );
    for target in stack.scaling {
        controller.add_target(target);
    }
    if controller.is_empty() {
        println!("No scaling policies in {}", args.config.display());
        return Ok(());
    }

    if once {
        for (pool, outcome) in controller.evaluate_all().await {
            println!("{pool:<24} {}", describe(&outcome));
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let interval = Duration::from_secs(config.scaling.interval_secs.max(1));
    info!(pools = controller.len(), interval_secs = interval.as_secs(), "scaling controller running");
    controller.run(interval, shutdown_rx).await;
    info!("scaling controller stopped");
    Ok(())
}

fn describe(outcome: &EvaluationOutcome) -> String {
    match outcome {
        EvaluationOutcome::Scaled(d) => format!("scaled {} -> {} ({:+})", d.current, d.new_capacity, d.delta),
        EvaluationOutcome::Unchanged(d) => format!("unchanged at {}", d.current),
        EvaluationOutcome::Skipped => "skipped: evaluation in flight".to_string(),
        EvaluationOutcome::Failed(reason) => format!("failed: {reason}"),
    }
}

pub fn record_metric(
    data_dir: &Path,
    metric: &str,
    namespace: &str,
    dimensions: Vec<(String, String)>,
    value: f64,
) -> anyhow::Result<()> {
    if !value.is_finite() {
        anyhow::bail!("metric value must be finite, got {value}");
    }
    let query = MetricQuery {
        name: metric.to_string(),
        namespace: namespace.to_string(),
        statistic: Statistic::Average,
        dimensions: dimensions.into_iter().collect::<BTreeMap<_, _>>(),
        window_secs: 0,
    };
    let provider = open_provider(data_dir)?;
    let stream = query.stream_key();
    let sample = provider.record_metric(&stream, value)?;
    println!("✓ {stream} = {} at {}", sample.value, sample.timestamp);
    Ok(())
}

#[cfg(test)]
mod tests {
    use stackgrid_autoscale::ScaleDecision;

    use super::*;

    #[test]
    fn outcome_descriptions() {
        let decision = ScaleDecision {
            current: 2,
            nominal_delta: 3,
            delta: 3,
            new_capacity: 5,
        };
        assert_eq!(describe(&EvaluationOutcome::Scaled(decision)), "scaled 2 -> 5 (+3)");
        assert_eq!(
            describe(&EvaluationOutcome::Failed("timeout".into())),
            "failed: timeout"
        );
    }

    #[test]
    fn recorded_metric_lands_on_stream() {
        let dir = tempfile::tempdir().unwrap();
        record_metric(
            dir.path(),
            "CPUUtilization",
            "AWS/EC2",
            vec![("AutoScalingGroupName".into(), "application/asg".into())],
            42.0,
        )
        .unwrap();
        assert!(record_metric(dir.path(), "CPUUtilization", "AWS/EC2", Vec::new(), f64::NAN).is_err());

        let provider = open_provider(dir.path()).unwrap();
        let samples = provider
            .store()
            .list_metrics("AWS/EC2/CPUUtilization[AutoScalingGroupName=application/asg]", 0)
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 42.0);
    }

    #[tokio::test]
    async fn scale_once_after_apply() {
        let dir = tempfile::tempdir().unwrap();
        let args = StackArgs {
            config: dir.path().join("stack.toml"),
            data_dir: dir.path().join("state"),
        };
        crate::commands::stack::init(&args.config, "demo", "10.0.0.0/16".parse().unwrap()).unwrap();
        crate::commands::stack::apply(&args, false, crate::Format::Text).await.unwrap();

        record_metric(
            &args.data_dir,
            "CPUUtilization",
            "AWS/EC2",
            vec![("AutoScalingGroupName".into(), "application/asg".into())],
            65.0,
        )
        .unwrap();
        scale(&args, true).await.unwrap();

        let provider = open_provider(&args.data_dir).unwrap();
        let asg = provider.store().find_resource("application/asg").unwrap().unwrap();
        assert_eq!(asg.capacity, Some(5));
    }
}
