//! Event streaming command

use crate::client::KeelClient;
use crate::error::{CliError, CliResult};
use crate::output::print_info;
use colored::*;
use futures_util::StreamExt;
use keel_types::{EventSeverity, EventSource, KeelEventEnvelope};

/// Stream live control-plane events, optionally filtered by source.
pub async fn execute(source: Option<&str>, client: &KeelClient) -> CliResult<()> {
    let source = source.map(parse_source).transpose()?;

    print_info("Streaming events... (Ctrl+C to stop)");
    println!();

    let stream = client.stream_events().await?;
    futures_util::pin_mut!(stream);

    while let Some(result) = stream.next().await {
        match result {
            Ok(envelope) => {
                if let Some(filter) = source {
                    if envelope.source != filter {
                        continue;
                    }
                }
                print_event(&envelope);
            }
            Err(e) => {
                eprintln!("{} Stream error: {}", "✗".red(), e);
            }
        }
    }

    Ok(())
}

fn parse_source(raw: &str) -> CliResult<EventSource> {
    match raw.to_ascii_lowercase().as_str() {
        "store" => Ok(EventSource::Store),
        "reconciler" => Ok(EventSource::Reconciler),
        "registry" => Ok(EventSource::Registry),
        "ingress" => Ok(EventSource::Ingress),
        "api" => Ok(EventSource::Api),
        _ => Err(CliError::InvalidInput(format!(
            "unknown event source: {} (expected store, reconciler, registry, ingress, or api)",
            raw
        ))),
    }
}

fn print_event(envelope: &KeelEventEnvelope) {
    let severity = match envelope.severity {
        EventSeverity::Debug => "DEBUG".dimmed(),
        EventSeverity::Info => "INFO".blue(),
        EventSeverity::Warning => "WARN".yellow(),
        EventSeverity::Error => "ERROR".red(),
        EventSeverity::Critical => "CRIT".red().bold(),
    };

    let time = envelope.timestamp.format("%H:%M:%S");

    println!(
        "{} {} [{:?}] {:?}",
        time.to_string().dimmed(),
        severity,
        envelope.source,
        envelope.event
    );
}
