use relaybox::config::Config;
use relaybox::job::Normalizer;
use relaybox::observability::Metrics;
use relaybox::queue::AmqpGateway;
use relaybox::transfer::ProcessTransfer;
use relaybox::worker::{self, JobController, RequeuePolicy};
use relaybox::workspace::Workspace;
use std::sync::Arc;
use tracing::{error, info};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Connect, assert topology and consume until shutdown or cancellation
pub async fn run(config: Config) -> Result<(), AnyError> {
    let workspace = Workspace::new(&config.workspace.staging_dir);
    // A previous run may have died mid-download
    workspace.clear().await;

    let normalizer = Normalizer::new(&config.normalizer)?;
    let gateway = AmqpGateway::connect(&config.inbound, &config.outbound).await?;

    let mut source = match gateway.assert_topology().await {
        Ok(()) => match gateway.consume().await {
            Ok(source) => source,
            Err(e) => {
                gateway.close().await;
                return Err(e.into());
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to assert queue topology");
            gateway.close().await;
            return Err(e.into());
        }
    };

    let transfer = ProcessTransfer::new(
        config.tools.clone(),
        config.destination.clone(),
        workspace.clone(),
    );
    let metrics = Arc::new(Metrics::new());

    let controller = JobController::builder()
        .normalizer(normalizer)
        .transfer(Arc::new(transfer))
        .workspace(workspace)
        .publisher(Arc::new(gateway.publisher()))
        .policy(RequeuePolicy::from(config.retry))
        .ensure_destination(config.tools.ensure_destination)
        .metrics(metrics.clone())
        .build();

    let policy = controller.policy();
    info!(
        requeue_transfer_failures = policy.transfer_failures,
        requeue_parse_failures = policy.parse_failures,
        ensure_destination = config.tools.ensure_destination,
        "Worker configured"
    );

    let result = worker::run(&mut source, &controller, shutdown_signal()).await;
    drop(source);
    gateway.close().await;

    let summary = result?;
    info!(
        processed = summary.processed,
        stop = ?summary.stop,
        metrics = ?metrics.snapshot(),
        "Worker stopped"
    );

    Ok(())
}

/// Human-readable summary for `check-config`
pub fn describe(config: &Config) -> String {
    let timeout = config
        .tools
        .timeout
        .map(|t| t.to_string())
        .unwrap_or_else(|| "none".to_string());

    [
        format!("inbound queue:      {}", config.inbound.queue),
        format!(
            "outbound:           {} -> {} ({})",
            config.outbound.exchange, config.outbound.queue, config.outbound.routing_key
        ),
        format!("destination:        {}", config.destination.path_for("<show>")),
        format!("staging directory:  {}", config.workspace.staging_dir.display()),
        format!("fetch program:      {}", config.tools.fetch_program.display()),
        format!("publish program:    {}", config.tools.publish_program.display()),
        format!("ensure destination: {}", config.tools.ensure_destination),
        format!("transfer timeout:   {}", timeout),
        format!(
            "requeue:            transfer failures = {}, parse failures = {}",
            config.retry.requeue_transfer_failures, config.retry.requeue_parse_failures
        ),
    ]
    .join("\n")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
