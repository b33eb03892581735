//! Ingress route resolution command

use crate::client::KeelClient;
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

/// Ask the daemon which service and endpoint a (host, path) pair routes to.
pub async fn execute(
    host: &str,
    path: &str,
    client: &KeelClient,
    format: OutputFormat,
) -> CliResult<()> {
    let resolved = client.resolve_route(host, path).await?;

    match format {
        OutputFormat::Table => {
            println!("Service:  {}", resolved.decision.service);
            println!(
                "Rule:     {} {}",
                resolved.decision.host, resolved.decision.path_prefix
            );
            println!("Endpoint: {}", resolved.endpoint);
        }
        _ => output::print_single(&resolved, format),
    }

    Ok(())
}
