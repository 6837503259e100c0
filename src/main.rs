use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::admission::{AdmissionGate, SubmissionError, Submitter};
use tollgate::config::TollgateConfig;
use tollgate::ratelimit::RateLimiter;
use tollgate::TollgateError;

/// Drive concurrent callers through a shared rate-limited gate.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Permits per window
    #[arg(long)]
    capacity: Option<u64>,

    /// Window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Number of concurrent callers
    #[arg(long)]
    callers: Option<usize>,

    /// Submissions per caller
    #[arg(long)]
    requests: Option<usize>,

    /// Per-submission acquisition timeout in milliseconds (0 waits forever)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Signature attached to every submitted document
    #[arg(long, default_value = "demo-signature")]
    signature: String,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut TollgateConfig) {
        if let Some(capacity) = self.capacity {
            config.limiter.capacity = capacity;
        }
        if let Some(window_ms) = self.window_ms {
            config.limiter.window_ms = window_ms;
        }
        if let Some(callers) = self.callers {
            config.demo.callers = callers;
        }
        if let Some(requests) = self.requests {
            config.demo.requests_per_caller = requests;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.demo.acquire_timeout_ms = timeout_ms;
        }
        if self.json {
            config.logging.json = true;
        }
    }
}

/// A document in the shape the downstream registry accepts.
#[derive(Debug, Clone, Serialize)]
struct Document {
    doc_id: uuid::Uuid,
    doc_type: String,
    owner_inn: String,
    producer_inn: String,
    products: Vec<Product>,
}

#[derive(Debug, Clone, Serialize)]
struct Product {
    certificate_document: Option<String>,
    tnved_code: String,
    uit_code: String,
}

impl Document {
    fn sample(caller: usize, seq: usize) -> Self {
        let products = (0..2)
            .map(|n| Product {
                certificate_document: None,
                tnved_code: "6401100000".to_string(),
                uit_code: format!("{:04}-{:04}-{}", caller, seq, n),
            })
            .collect();

        Self {
            doc_id: uuid::Uuid::new_v4(),
            doc_type: "LP_INTRODUCE_GOODS".to_string(),
            owner_inn: "7700000000".to_string(),
            producer_inn: "7700000000".to_string(),
            products,
        }
    }

    /// Attach `signature` to every product.
    fn signed(mut self, signature: &str) -> Self {
        for product in &mut self.products {
            product.certificate_document = Some(signature.to_string());
        }
        self
    }
}

/// Stands in for the real transport: renders the document and logs it.
struct LogSubmitter;

#[async_trait]
impl Submitter for LogSubmitter {
    type Payload = Document;
    type Response = String;

    async fn submit(&self, document: Document) -> Result<String, SubmissionError> {
        let body = serde_json::to_string(&document)
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;
        info!(doc_id = %document.doc_id, body = %body, "Document submitted");
        Ok(body)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    init_tracing(config.logging.json);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        capacity = config.limiter.capacity,
        window_ms = config.limiter.window_ms,
        callers = config.demo.callers,
        requests_per_caller = config.demo.requests_per_caller,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::from_config(&config.limiter)?);
    let gate = Arc::new(AdmissionGate::new(Arc::clone(&limiter), LogSubmitter));
    let cancel = CancellationToken::new();
    let timeout = config.demo.acquire_timeout();
    let started = Instant::now();

    // Ctrl+C only cancels the token; callers finish what they already started
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        })
    };

    let callers: Vec<_> = (0..config.demo.callers)
        .map(|caller| {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            let requests = config.demo.requests_per_caller;
            let signature = cli.signature.clone();
            tokio::spawn(run_caller(gate, caller, requests, timeout, signature, cancel))
        })
        .collect();

    for (caller, outcome) in futures::future::join_all(callers).await.into_iter().enumerate() {
        if let Err(e) = outcome {
            warn!(caller = caller, error = %e, "Caller task failed");
        }
    }

    cancel.cancel();
    if let Err(e) = watcher.await {
        warn!(error = %e, "Signal watcher failed");
    }

    limiter.shutdown_and_wait().await;

    let stats = gate.stats();
    info!(
        admitted = stats.admitted,
        denied = stats.denied,
        failed = stats.failed,
        refills = limiter.refill_count(),
        elapsed = ?started.elapsed(),
        "Tollgate stopped"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

async fn run_caller(
    gate: Arc<AdmissionGate<LogSubmitter>>,
    caller: usize,
    requests: usize,
    timeout: Option<Duration>,
    signature: String,
    cancel: CancellationToken,
) {
    for seq in 0..requests {
        let document = Document::sample(caller, seq).signed(&signature);

        let result = match timeout {
            Some(timeout) => {
                gate.submit_within_until_cancelled(document, timeout, &cancel)
                    .await
            }
            None => gate.submit_until_cancelled(document, &cancel).await,
        };

        match result {
            Ok(_) => {}
            Err(TollgateError::Cancelled) => return,
            Err(e) => warn!(caller = caller, seq = seq, error = %e, "Submission not completed"),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling callers");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling callers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_document_carries_signature_on_every_product() {
        let document = Document::sample(3, 7).signed("sig-123");

        assert_eq!(document.products.len(), 2);
        for product in &document.products {
            assert_eq!(product.certificate_document.as_deref(), Some("sig-123"));
        }

        let body = serde_json::to_value(&document).unwrap();
        assert_eq!(body["products"][0]["certificate_document"], "sig-123");
        assert_eq!(body["products"][1]["uit_code"], "0003-0007-1");
    }

    #[tokio::test]
    async fn test_log_submitter_renders_document() {
        let document = Document::sample(0, 0).signed("sig");
        let doc_id = document.doc_id.to_string();

        let body = LogSubmitter.submit(document).await.unwrap();

        assert!(body.contains(&doc_id));
        assert!(body.contains("\"certificate_document\":\"sig\""));
    }
}
