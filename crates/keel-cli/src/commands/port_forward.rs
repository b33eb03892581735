//! Local port forwarding to service endpoints

use crate::client::KeelClient;
use crate::error::{CliError, CliResult};
use crate::output::{print_info, print_success, print_warning};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};

/// Forward a local TCP port to the Ready endpoints of a service.
///
/// Endpoints are re-resolved through the daemon for every accepted
/// connection, so instance restarts and scale changes are picked up without
/// restarting the forward. Connections are spread round-robin.
pub async fn execute(service: &str, local_port: u16, client: &KeelClient) -> CliResult<()> {
    // Resolve once up front so an unknown service fails before we bind.
    let snapshot = client.service_endpoints(service).await?;
    if snapshot.endpoints.is_empty() {
        return Err(CliError::InvalidInput(format!(
            "service {} has no ready endpoints",
            service
        )));
    }

    let listener = TcpListener::bind(("127.0.0.1", local_port)).await?;
    let local = listener.local_addr()?;
    print_success(&format!("Forwarding {} to service {}", local, service));
    print_info("Press Ctrl+C to stop");

    let counter = AtomicUsize::new(0);
    loop {
        let (inbound, _) = listener.accept().await?;

        let endpoints = match client.service_endpoints(service).await {
            Ok(snapshot) if !snapshot.endpoints.is_empty() => snapshot.endpoints,
            Ok(_) => {
                print_warning(&format!(
                    "service {} has no ready endpoints; dropping connection",
                    service
                ));
                continue;
            }
            Err(e) => {
                print_warning(&format!("endpoint lookup failed: {}; dropping connection", e));
                continue;
            }
        };

        let index = counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        let target = endpoints[index].to_string();
        tokio::spawn(forward(inbound, target));
    }
}

async fn forward(mut inbound: TcpStream, target: String) {
    match TcpStream::connect(&target).await {
        Ok(mut outbound) => {
            if let Err(e) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                print_warning(&format!("forward to {} ended: {}", target, e));
            }
        }
        Err(e) => {
            print_warning(&format!("connect to {} failed: {}", target, e));
        }
    }
}
