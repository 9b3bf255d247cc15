use crate::config::Config;
use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use lumen_core::pager::{clamp_limit, MAX_EXPORT_LIMIT};
use lumen_core::reconcile::jobs_newest_first;
use lumen_core::{
    CursorMode, Direction, ExportFormat, HistoryFilters, HistoryTable, Job, KeyedCollection, PageCursor,
    RetentionOverrides, RetentionStatus, Subscription,
};
use lumen_sync::{
    filtered_events, ApiClient, EventChannel, JobBoard, JobBoardConfig, RetentionMonitor,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub fn client_for(config: &Config) -> ApiClient {
    ApiClient::new(config.api_url.clone(), config.token.clone())
}

pub fn format_ts(ts: Option<f64>) -> String {
    ts.and_then(|ts| Utc.timestamp_millis_opt((ts * 1000.0) as i64).single())
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Accepts float epoch seconds or an RFC 3339 timestamp.
pub fn parse_timestamp(input: &str) -> Result<f64, String> {
    let trimmed = input.trim();
    if let Ok(secs) = trimmed.parse::<f64>() {
        return Ok(secs);
    }
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .map(|at| at.timestamp_millis() as f64 / 1000.0)
        .map_err(|err| format!("invalid timestamp '{trimmed}': {err}"))
}

pub async fn watch(config: &Config, types: Vec<String>, kinds: Vec<String>) -> Result<()> {
    if !config.stream_enabled {
        bail!("push stream is disabled (LUMEN_STREAM_ENABLED=0 or --no-stream); nothing to watch");
    }
    let channel = EventChannel::open(config.channel_config(), client_for(config).stream_source());
    let mut events = filtered_events(&channel, Subscription::types(types).with_kinds(kinds));
    let mut status_rx = channel.watch_status();
    let mut last_label = "";

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                if status.label() != last_label {
                    last_label = status.label();
                    match status.notice() {
                        Some(notice) => eprintln!("stream: {last_label} ({notice}, errors: {})", status.error_count),
                        None => eprintln!("stream: {last_label} (errors: {})", status.error_count),
                    }
                }
            }
        }
    }

    channel.shutdown();
    Ok(())
}

fn print_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) {
    println!("{:<24} {:<10} {:<12} {:>6}  created", "id", "status", "kind", "pct");
    for job in jobs {
        let progress = job
            .progress
            .map(|p| format!("{:.0}%", p * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<10} {:<12} {:>6}  {}",
            job.id,
            job.status,
            job.kind.as_deref().unwrap_or("-"),
            progress,
            format_ts(job.created_at)
        );
        if let Some(error) = job.error.as_deref() {
            println!("{:<24} error: {error}", "");
        }
    }
}

pub async fn jobs(config: &Config, once: bool) -> Result<()> {
    let client = client_for(config);
    if once {
        let jobs = client.list_jobs().await.context("failed to list jobs")?;
        let collection = KeyedCollection::from_items(jobs);
        print_jobs(jobs_newest_first(&collection));
        return Ok(());
    }

    let channel = EventChannel::open(config.channel_config(), client.stream_source());
    let board = JobBoard::mount(client, &channel, JobBoardConfig::default());
    let mut changes = board.changes();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = channel.status();
                println!(
                    "-- {} jobs, stream {}, refreshes {}",
                    board.len(),
                    status.label(),
                    board.refresh_runs()
                );
                if let Some(error) = board.error() {
                    println!("!! {error}");
                }
                print_jobs(&board.snapshot());
            }
        }
    }

    drop(board);
    channel.shutdown();
    Ok(())
}

pub struct HistoryRequest {
    pub table: HistoryTable,
    pub limit: i64,
    pub offset: Option<u64>,
    pub after_id: Option<i64>,
    pub filters: HistoryFilters,
    pub pages: u32,
}

pub fn initial_cursor(limit: i64, offset: Option<u64>, after_id: Option<i64>) -> PageCursor {
    match after_id {
        Some(id) => {
            let mut cursor = PageCursor::after_id(limit);
            cursor.set_after_id(id);
            cursor
        }
        None => PageCursor::new(limit).with_offset(offset.unwrap_or(0)),
    }
}

pub async fn history(config: &Config, request: HistoryRequest) -> Result<()> {
    let client = client_for(config);
    let mut cursor = initial_cursor(request.limit, request.offset, request.after_id);

    for page_number in 1..=request.pages.max(1) {
        let page = client
            .history_page(request.table, &cursor, &request.filters)
            .await
            .with_context(|| format!("failed to load {} page {page_number}", request.table))?;
        for item in &page.items {
            println!("{}", serde_json::to_string(item)?);
        }
        info!(
            event = "history_page",
            table = request.table.as_str(),
            page = page_number,
            count = page.items.len()
        );
        if !cursor.can_advance(&page.meta, Direction::Next) {
            eprintln!("end of {} ({} rows on last page)", request.table, page.items.len());
            return Ok(());
        }
        cursor = cursor.advance(&page.meta, Direction::Next);
    }
    eprintln!("more rows available; continue with {}", describe_cursor(&cursor));
    Ok(())
}

fn describe_cursor(cursor: &PageCursor) -> String {
    match cursor.mode() {
        CursorMode::AfterId { after_id: Some(id) } => format!("--after-id {id}"),
        CursorMode::AfterId { after_id: None } => "--after-id <first>".to_string(),
        CursorMode::Offset { offset } => format!("--offset {offset}"),
    }
}

pub async fn export(
    config: &Config,
    table: HistoryTable,
    format: ExportFormat,
    limit: i64,
    filters: HistoryFilters,
    out: Option<PathBuf>,
) -> Result<()> {
    let cursor = PageCursor::default();
    let body = client_for(config)
        .export(table, &cursor, &filters, format, limit)
        .await
        .with_context(|| format!("failed to export {table}"))?;
    match out {
        Some(path) => {
            tokio::fs::write(&path, body.as_bytes())
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "wrote {} bytes of {} ({} rows max) to {}",
                body.len(),
                format.as_str(),
                clamp_limit(limit, MAX_EXPORT_LIMIT),
                path.display()
            );
        }
        None => print!("{body}"),
    }
    Ok(())
}

fn print_retention(table: HistoryTable, status: &RetentionStatus) {
    println!(
        "{table}: {} rows, oldest {}, newest {}",
        status.count,
        format_ts(status.oldest),
        format_ts(status.newest)
    );
    println!(
        "limits: max_rows {} max_days {}; last cleanup {}",
        status.max_rows,
        status.max_days,
        format_ts(status.last_cleanup_at)
    );
    match status.warning() {
        Some(warning) => println!("drift: {warning}"),
        None => println!("drift: none"),
    }
}

pub async fn retention_status(
    config: &Config,
    table: HistoryTable,
    follow: Option<Duration>,
) -> Result<()> {
    let monitor = RetentionMonitor::new(client_for(config), table, config.role);
    let Some(interval) = follow else {
        let status = monitor
            .fetch_status()
            .await
            .with_context(|| format!("failed to load retention status for {table}"))?;
        print_retention(table, &status);
        return Ok(());
    };

    let mut updates = monitor.subscribe();
    let _poller = monitor.poll(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if let Some(status) = view.status.as_ref() {
                    print_retention(table, status);
                }
                if let Some(error) = view.error.as_deref() {
                    println!("!! {error}");
                }
            }
        }
    }
    Ok(())
}

pub async fn retention_run(
    config: &Config,
    table: HistoryTable,
    max_rows: Option<u64>,
    max_days: Option<u64>,
) -> Result<()> {
    let monitor = RetentionMonitor::new(client_for(config), table, config.role);
    if !monitor.cleanup_permitted() {
        bail!(
            "retention cleanup needs the admin role (current role: {}); set LUMEN_ROLE or --role",
            config.role
        );
    }
    let overrides = if max_rows.is_none() && max_days.is_none() {
        None
    } else {
        Some(RetentionOverrides { max_rows, max_days })
    };
    let outcome = monitor
        .run_cleanup(overrides)
        .await
        .with_context(|| format!("retention cleanup failed for {table}"))?;
    println!(
        "deleted {} rows from {table} ({} over row limit, {} over age limit)",
        outcome.total(),
        outcome.deleted_by_rows,
        outcome.deleted_by_days
    );
    match monitor.view().status {
        Some(status) => print_retention(table, &status),
        None => println!("status unavailable after cleanup; re-run `lumen retention {table} status`"),
    }
    Ok(())
}
