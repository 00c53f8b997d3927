//! Command handlers for the Forge CLI

use anyhow::{Context, Result};
use console::style;
use forge_client::{ApiClient, ApiRequest, Error};
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Commands;

pub async fn run(client: &ApiClient, command: Commands, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Get { path, query } => {
            let request = ApiRequest::get(path).query_pairs(query);
            send(client, request, cancel).await
        }
        Commands::Post { path, data } => send(client, ApiRequest::post(path).body(parse_body(&data)?), cancel).await,
        Commands::Put { path, data } => send(client, ApiRequest::put(path).body(parse_body(&data)?), cancel).await,
        Commands::Patch { path, data } => send(client, ApiRequest::patch(path).body(parse_body(&data)?), cancel).await,
        Commands::Delete { path } => send(client, ApiRequest::delete(path), cancel).await,
        Commands::Probe { path, count } => probe(client, &path, count, cancel).await,
    }
}

/// Executes one call and prints the JSON response.
async fn send(client: &ApiClient, request: ApiRequest, cancel: CancellationToken) -> Result<()> {
    let label = format!("{} {}", request.method, request.path);
    let value = client
        .execute_cancellable(request, cancel)
        .await
        .with_context(|| format!("{} failed", label))?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Repeats a read, one line per call.
async fn probe(client: &ApiClient, path: &str, count: u32, cancel: CancellationToken) -> Result<()> {
    for call in 1..=count {
        let cached_before = client.metrics().await.cached_responses;
        let started = Instant::now();
        let result = client
            .execute_cancellable(ApiRequest::get(path), cancel.clone())
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(_) => {
                let served_by = if client.metrics().await.cached_responses > cached_before {
                    "cache"
                } else {
                    "network"
                };
                println!(
                    "{} #{} {} in {:?}",
                    style("ok").green(),
                    call,
                    served_by,
                    elapsed
                );
            }
            Err(Error::Cancelled) => {
                println!("{} #{}", style("cancelled").yellow(), call);
                break;
            }
            Err(err) => {
                let hint = err
                    .retry_after()
                    .map(|wait| format!(" (retry in {}s)", wait.as_secs()))
                    .unwrap_or_default();
                println!("{} #{} {}{}", style("failed").red(), call, err, hint);
            }
        }
    }

    let metrics = client.metrics().await;
    println!(
        "{} {} calls, {} from cache, {} sent this hour, {} left, circuit {}",
        style("summary").bold(),
        metrics.total_requests,
        metrics.cached_responses,
        metrics.requests_last_hour,
        metrics.remaining_quota,
        metrics.circuit_state
    );
    Ok(())
}

pub async fn print_metrics(client: &ApiClient) -> Result<()> {
    let metrics = client.metrics().await;
    eprintln!("{}", style("metrics").bold());
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

fn parse_body(data: &str) -> Result<Value> {
    serde_json::from_str(data).context("--data is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(r#"{"name":"bug"}"#).unwrap()["name"], "bug");
        assert!(parse_body("name=bug").is_err());
    }
}
