//! `periodize worker`: run generation workers until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use periodize_core::renderer::{AnthropicRenderer, Renderer};
use periodize_core::storage::{FileStore, LocalFileStore};
use periodize_core::worker::{PoolConfig, Worker, run_worker_pool};
use periodize_db::models::Discipline;

use crate::config::PeriodizeConfig;

/// Parse `--discipline` values; no values means every discipline.
pub fn parse_disciplines(raw: &[String]) -> Result<Vec<Discipline>> {
    if raw.is_empty() {
        return Ok(Discipline::ALL.to_vec());
    }
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        let d: Discipline = value
            .parse()
            .with_context(|| format!("invalid --discipline value {value:?}"))?;
        if !out.contains(&d) {
            out.push(d);
        }
    }
    Ok(out)
}

pub async fn run_workers(
    pool: &PgPool,
    config: &PeriodizeConfig,
    disciplines: &[String],
    concurrency: Option<usize>,
) -> Result<()> {
    let disciplines = parse_disciplines(disciplines)?;
    if config.renderer.api_key.is_empty() {
        tracing::warn!(
            "no renderer API key configured; every generation will fail until {} is set",
            crate::config::ENV_RENDERER_API_KEY
        );
    }

    let renderer: Arc<dyn Renderer> = Arc::new(AnthropicRenderer::new(config.renderer.clone()));
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(config.storage_root.clone()));

    let workers: Vec<Arc<Worker>> = disciplines
        .iter()
        .map(|&d| {
            Arc::new(
                Worker::new(pool.clone(), d, Arc::clone(&renderer), Arc::clone(&store))
                    .with_timeout(config.generation_timeout),
            )
        })
        .collect();

    let pool_config = PoolConfig {
        concurrency: concurrency.unwrap_or(config.pool.concurrency),
        ..config.pool.clone()
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl+C received, finishing in-flight generations"),
            Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
        }
        signal_token.cancel();
    });

    println!(
        "Running workers for {} (concurrency {}), documents under {}",
        disciplines
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        pool_config.concurrency,
        config.storage_root.display(),
    );

    run_worker_pool(pool, workers, &pool_config, cancel).await?;

    println!("Workers stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_means_all() {
        assert_eq!(parse_disciplines(&[]).unwrap(), Discipline::ALL.to_vec());
    }

    #[test]
    fn selection_is_case_insensitive_and_deduplicated() {
        let raw = vec!["Running".to_string(), "running".to_string(), "CYCLING".to_string()];
        assert_eq!(
            parse_disciplines(&raw).unwrap(),
            vec![Discipline::Running, Discipline::Cycling]
        );
    }

    #[test]
    fn unknown_discipline_is_rejected() {
        let err = parse_disciplines(&["swimming".to_string()]).unwrap_err();
        assert!(format!("{err:#}").contains("swimming"));
    }
}
