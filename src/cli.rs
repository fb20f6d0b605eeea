//! CLI helper functions

use crate::{
    client::{Auth, AwsJsonClient},
    config::{OutputMode, RunParams, Settings, SourceKind},
    decode::{RawPassthrough, RecordDecoder},
    etl::{EndReason, ExtractionLoop, PageFetcher, RunSummary},
    source::{StreamFetcher, TableFetcher},
    storage::{NdjsonSink, OutputHandle, RawSink},
    transform::TransformRegistry,
};
use chrono::Utc;
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Build a backend client for `kind` from settings and environment
///
/// Expected environment variables:
/// - SDUMP_TABLE_ENDPOINT / SDUMP_STREAM_ENDPOINT: endpoint override (optional)
/// - AWS_REGION: region used to derive the public endpoint (optional)
/// - SDUMP_API_KEY: API key for a gateway (optional)
/// - SDUMP_USERNAME / SDUMP_PASSWORD: basic auth for a gateway (optional)
pub fn load_client(settings: &Settings, kind: SourceKind) -> Result<AwsJsonClient> {
    let url = settings.endpoint(kind)?;
    AwsJsonClient::try_new(url, Auth::from_env(), kind.protocol())
        .with_context(|| format!("Failed to create {} client", kind))
}

/// Open the output destination, standard output when no path is given
pub fn open_output(path: Option<&Path>) -> Result<OutputHandle> {
    match path {
        Some(path) => {
            log::info!("Writing records to {}", path.display().bright_black());
            OutputHandle::create(path)
        }
        None => Ok(OutputHandle::stdout()),
    }
}

/// Cancel `token` on SIGINT or SIGTERM
pub fn listen_for_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    log::error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => log::info!("Received SIGINT, stopping after the current page"),
            _ = terminate => log::info!("Received SIGTERM, stopping after the current page"),
        }
        token.cancel();
    });
}

/// Run one extraction to completion
///
/// Pipeline: Fetcher → RecordDecoder → NdjsonSink, or
/// Fetcher → RawPassthrough → RawSink in raw mode
pub async fn run_source(
    params: RunParams,
    settings: &Settings,
    registry: &TransformRegistry,
    output: OutputHandle,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let client = load_client(settings, params.kind)?;

    match params.kind {
        SourceKind::Table => {
            let fetcher = TableFetcher::new(client, params.source.clone());
            run_with(fetcher, params, settings, registry, output, cancel).await
        }
        SourceKind::Stream => {
            let fetcher =
                StreamFetcher::new(client, params.source.clone()).with_shard(params.shard.clone());
            run_with(fetcher, params, settings, registry, output, cancel).await
        }
    }
}

/// Run one extraction with an already built fetcher
pub async fn run_with<F: PageFetcher>(
    fetcher: F,
    params: RunParams,
    settings: &Settings,
    registry: &TransformRegistry,
    output: OutputHandle,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let options = params.loop_options(settings, Utc::now())?;

    match params.output_mode {
        OutputMode::Structured => {
            let transforms = registry.chain_for(&params.source, &params.transforms)?;
            let decoder = RecordDecoder::new(params.source.clone()).with_transforms(transforms);
            ExtractionLoop::new(fetcher, decoder, NdjsonSink::new(output), options)
                .with_cancellation(cancel)
                .run()
                .await
        }
        OutputMode::RawPassthrough => {
            ExtractionLoop::new(fetcher, RawPassthrough, RawSink::new(output), options)
                .with_cancellation(cancel)
                .run()
                .await
        }
    }
}

/// Run every source concurrently into one output
///
/// All parameters are validated before any network call. A failing run
/// does not stop the others; the first failure is returned once every
/// run has finished.
pub async fn dump_sources(
    runs: Vec<RunParams>,
    settings: Settings,
    output: OutputHandle,
    cancel: CancellationToken,
) -> Result<Vec<RunSummary>> {
    for params in &runs {
        params.validate()?;
    }
    let registry = Arc::new(settings.registry()?);
    let settings = Arc::new(settings);

    let mut tasks = JoinSet::new();
    for params in runs {
        let settings = settings.clone();
        let registry = registry.clone();
        let output = output.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { run_source(params, &settings, &registry, output, cancel).await });
    }

    let mut summaries = Vec::new();
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined
            .wrap_err("Extraction task panicked")
            .and_then(|result| result)
        {
            Ok(summary) => {
                log_summary(&summary);
                summaries.push(summary);
            }
            Err(e) => {
                log::error!("{:?}", e);
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(summaries),
    }
}

fn log_summary(summary: &RunSummary) {
    let marker = match summary.end {
        EndReason::Cancelled => "⚠",
        _ => "✓",
    };
    log::info!(
        "{} Dumped {} record(s) from {} in {} fetch(es): {}",
        marker,
        summary.emitted,
        summary.label.cyan(),
        summary.fetches,
        summary.end
    );
    if summary.throttled > 0 {
        log::info!("  Throttled {} time(s)", summary.throttled);
    }
    if summary.decode_errors > 0 {
        log::warn!("  Skipped {} undecodable record(s)", summary.decode_errors);
    }
    log::debug!("  Last position: {}", summary.cursor);
}
