use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::{HttpExecutor, LoggingExecutor};
use crate::output::print_json;
use crate::transport::{HttpTransport, LoggingTransport};
use govern_core::collab::{ActionExecutor, NotificationTransport};
use govern_core::config::GovernConfig;
use govern_core::Governance;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONNECTOR_TIMEOUT_MS: u64 = 10_000;

pub fn run(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    let executor = build_executor(&gov.config)?;
    let transport = build_transport(&gov.config)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        if once {
            single_pass(&gov, executor, transport, json).await
        } else {
            run_until_interrupted(&gov, executor, transport).await
        }
    })
}

fn build_executor(config: &GovernConfig) -> anyhow::Result<Arc<dyn ActionExecutor>> {
    let timeout = Duration::from_millis(
        config
            .connector
            .timeout_ms
            .unwrap_or(DEFAULT_CONNECTOR_TIMEOUT_MS),
    );
    Ok(match &config.connector.base_url {
        Some(url) => {
            tracing::info!(url = %url, "using HTTP connector");
            Arc::new(HttpExecutor::new(url, timeout)?)
        }
        None => Arc::new(LoggingExecutor),
    })
}

fn build_transport(config: &GovernConfig) -> anyhow::Result<Arc<dyn NotificationTransport>> {
    Ok(match &config.notifications.webhook_url {
        Some(url) => Arc::new(HttpTransport::new(url, config.breaker.call_timeout())?),
        None => Arc::new(LoggingTransport),
    })
}

async fn single_pass(
    gov: &Governance,
    executor: Arc<dyn ActionExecutor>,
    transport: Arc<dyn NotificationTransport>,
    json: bool,
) -> anyhow::Result<()> {
    let recovered = gov
        .jobs
        .startup_recovery(Duration::from_secs(gov.config.jobs.stale_running_secs))?;
    let runs = gov.processor(executor).drain(usize::MAX).await?;
    let sla = gov.workqueue.run_sla_check()?;
    let delivery = gov.outbox.process_queue(transport.as_ref()).await?;

    if json {
        print_json(&serde_json::json!({
            "recovered": recovered,
            "jobs_run": runs.len(),
            "sla": sla,
            "delivery": delivery,
        }))?;
    } else {
        println!("recovered:  {recovered}");
        println!("jobs run:   {}", runs.len());
        for r in &runs {
            println!("  {} {} (attempt {})", r.job_id, r.status, r.attempts);
        }
        println!("sla:        {} expired, {} escalated", sla.expired, sla.escalated);
        println!(
            "outbox:     {} sent, {} retried, {} failed",
            delivery.sent, delivery.retried, delivery.failed
        );
    }
    Ok(())
}

async fn run_until_interrupted(
    gov: &Governance,
    executor: Arc<dyn ActionExecutor>,
    transport: Arc<dyn NotificationTransport>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let handles = gov.spawn_workers(executor, transport, shutdown.clone())?;
    tracing::info!("worker running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    for h in handles {
        if let Err(e) = h.await {
            tracing::error!(error = %e, "worker task panicked");
        }
    }
    Ok(())
}
