use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use predict_app_operator::{
    controller::{self, Context, ReconcilerConfig},
    webhook::{self, WebhookState},
};

/// Reconciles PredictApp resources into a Deployment and a Service
#[derive(Parser, Debug)]
#[command(name = "predict-app-operator", version, about, long_about = None)]
struct Cli {
    /// Address the admission webhook listens on
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// PEM certificate for the webhook server
    #[arg(long, env = "WEBHOOK_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the webhook server
    #[arg(long, env = "WEBHOOK_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Run the controller only
    #[arg(long, env = "DISABLE_WEBHOOK")]
    disable_webhook: bool,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, env = "REQUEUE_SECS", default_value_t = 60)]
    requeue_secs: u64,

    /// Pause at the start of every reconcile, in milliseconds
    #[arg(long, env = "START_DELAY_MS", default_value_t = 100)]
    start_delay_ms: u64,

    /// DNS suffix used for in-cluster service endpoints
    #[arg(long, env = "CLUSTER_DOMAIN", default_value = "svc.cluster.local")]
    cluster_domain: String,
}

impl Cli {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            requeue_interval: Duration::from_secs(self.requeue_secs),
            start_delay: Duration::from_millis(self.start_delay_ms),
            cluster_domain: self.cluster_domain.clone(),
            ..Default::default()
        }
    }

    fn tls(&self) -> Option<(PathBuf, PathBuf)> {
        self.tls_cert.clone().zip(self.tls_key.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let client = Client::try_default().await?;
    let ctx = Context::new(client, cli.reconciler_config());

    if !cli.disable_webhook {
        let router = webhook::webhook_router(Arc::new(WebhookState::default()));
        let addr = cli.webhook_addr;
        let tls = cli.tls();
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(router, addr, tls).await {
                error!(error = %e, "admission webhook server error");
            }
        });
    }

    info!("starting predict-app-operator");
    controller::run(ctx).await?;
    Ok(())
}
