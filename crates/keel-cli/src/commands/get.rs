//! Resource and state inspection command

use crate::client::KeelClient;
use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use keel_types::{Instance, Resource, ResourceKind, WorkloadState};
use serde::Serialize;
use tabled::Tabled;

/// Table row for resource listings
#[derive(Debug, Serialize, Tabled)]
struct ResourceRow {
    kind: String,
    name: String,
    generation: u64,
    age: String,
}

impl From<Resource> for ResourceRow {
    fn from(resource: Resource) -> Self {
        Self {
            kind: resource.key.kind.to_string(),
            name: resource.key.name,
            generation: resource.generation,
            age: humanize_age(resource.created_at),
        }
    }
}

/// Table row for workload reconciliation state
#[derive(Debug, Serialize, Tabled)]
struct WorkloadRow {
    name: String,
    phase: String,
    ready: String,
    generation: u64,
    attempts: u32,
    updated: String,
    message: String,
}

impl From<WorkloadState> for WorkloadRow {
    fn from(state: WorkloadState) -> Self {
        Self {
            name: state.workload,
            phase: state.phase.to_string(),
            ready: format!("{}/{}", state.ready_replicas, state.desired_replicas),
            generation: state.observed_generation,
            attempts: state.start_attempts,
            updated: humanize_age(state.updated_at),
            message: state.message.unwrap_or_default(),
        }
    }
}

/// Table row for instance listings
#[derive(Debug, Serialize, Tabled)]
struct InstanceRow {
    id: String,
    workload: String,
    endpoint: String,
    health: String,
    generation: u64,
    age: String,
}

impl From<Instance> for InstanceRow {
    fn from(instance: Instance) -> Self {
        let endpoint = instance.endpoint().to_string();
        Self {
            id: truncate_id(&instance.id.to_string()),
            workload: instance.workload,
            endpoint,
            health: format!("{:?}", instance.health),
            generation: instance.workload_generation,
            age: humanize_age(instance.started_at),
        }
    }
}

/// Table row for service endpoint listings
#[derive(Debug, Serialize, Tabled)]
struct EndpointRow {
    address: String,
    port: u16,
}

/// Execute a get command. `kind` accepts the operator spellings
/// (`workloads`, `secrets`, ...) plus the pseudo-kinds `instances` and
/// `endpoints` that read the registry instead of the store.
pub async fn execute(
    kind: &str,
    name: Option<&str>,
    workload: Option<&str>,
    client: &KeelClient,
    format: OutputFormat,
) -> CliResult<()> {
    match kind.to_ascii_lowercase().as_str() {
        "workload" | "workloads" => match name {
            Some(name) => {
                let state = client.get_workload(name).await?;
                output::print_single(&state, format);
            }
            None => {
                let states = client.list_workloads().await?;
                print_listing(states, WorkloadRow::from, format);
            }
        },

        "instance" | "instances" => {
            if name.is_some() {
                return Err(CliError::InvalidInput(
                    "instances are listed, not fetched by name; filter with --workload".to_string(),
                ));
            }
            let instances = client.list_instances(workload).await?;
            print_listing(instances, InstanceRow::from, format);
        }

        "endpoint" | "endpoints" => {
            let service = name.ok_or_else(|| {
                CliError::InvalidInput(
                    "endpoints needs a service name: keel get endpoints <service>".to_string(),
                )
            })?;
            let snapshot = client.service_endpoints(service).await?;
            match format {
                OutputFormat::Table => {
                    println!("Service: {} (version {})", snapshot.service, snapshot.version);
                    let rows: Vec<EndpointRow> = snapshot
                        .endpoints
                        .into_iter()
                        .map(|e| EndpointRow {
                            address: e.address,
                            port: e.port,
                        })
                        .collect();
                    output::print_output(rows, format);
                }
                _ => output::print_single(&snapshot, format),
            }
        }

        other => {
            let kind: ResourceKind = other.parse().map_err(
                |e: keel_types::resource::UnknownKind| CliError::InvalidInput(e.to_string()),
            )?;
            match name {
                Some(name) => {
                    let resource = client.get_resource(kind, name).await?;
                    output::print_single(&resource, format);
                }
                None => {
                    let resources = client.list_resources(kind).await?;
                    print_listing(resources, ResourceRow::from, format);
                }
            }
        }
    }

    Ok(())
}

/// Tables get row projections; json/yaml get the full objects.
fn print_listing<T, R>(items: Vec<T>, to_row: impl Fn(T) -> R, format: OutputFormat)
where
    T: Serialize,
    R: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            output::print_output(items.into_iter().map(to_row).collect(), format)
        }
        _ => output::print_single(&items, format),
    }
}

fn truncate_id(id: &str) -> String {
    let id = id.strip_prefix("inst:").unwrap_or(id);
    if id.len() > 8 {
        id[..8].to_string()
    } else {
        id.to_string()
    }
}

fn humanize_age(since: chrono::DateTime<chrono::Utc>) -> String {
    let duration = chrono::Utc::now() - since;
    if duration.num_days() > 0 {
        format!("{}d", duration.num_days())
    } else if duration.num_hours() > 0 {
        format!("{}h", duration.num_hours())
    } else if duration.num_minutes() > 0 {
        format!("{}m", duration.num_minutes())
    } else {
        format!("{}s", duration.num_seconds().max(0))
    }
}
