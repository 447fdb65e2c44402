//! Resolves one domain/entity pair through the full tenancy stack and prints
//! the outcome as JSON.
//!
//! ```bash
//! tenantry-probe --tenants tenants.json --domain shop-a.example.com --entity Customer
//! tenantry-probe --tenants tenants.json --domain shop-a.example.com --entity Customer \
//!     --create '{"name": "Ada"}'
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tenantry_core::Document;
use tenantry_server::telemetry::{init_tracing, LogFormat};
use tenantry_server::traits::Connector;
use tenantry_server::{MemoryTenantStore, TenancyConfig, TenancyError, TenantResolver};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Driver {
    Memory,
    #[cfg(feature = "postgres")]
    Postgres,
}

#[derive(Parser, Debug)]
#[command(name = "tenantry-probe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON array of tenant records
    #[arg(long, env = "TENANTRY_TENANTS")]
    tenants: PathBuf,

    /// Request domain to resolve
    #[arg(long)]
    domain: String,

    /// Entity name (case-insensitive)
    #[arg(long)]
    entity: String,

    /// Database driver used for tenant connections
    #[arg(long, value_enum, default_value = "memory", env = "TENANTRY_DRIVER")]
    driver: Driver,

    /// Document to create through the resolved model
    #[arg(long)]
    create: Option<String>,

    #[arg(long, default_value_t = 10_000, env = "TENANTRY_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: u64,

    #[arg(long, default_value_t = 30_000, env = "TENANTRY_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: u64,

    /// Reject subscriptions past their expiry
    #[arg(long, env = "TENANTRY_ENFORCE_EXPIRY")]
    enforce_expiry: bool,

    /// Log output format (text or json)
    #[arg(long, default_value = "text", env = "TENANTRY_LOG_FORMAT")]
    log_format: LogFormat,
}

fn connector(driver: Driver) -> Arc<dyn Connector> {
    match driver {
        Driver::Memory => Arc::new(tenantry_server::drivers::MemoryConnector::new()),
        #[cfg(feature = "postgres")]
        Driver::Postgres => Arc::new(tenantry_server::drivers::PgConnector::default()),
    }
}

async fn probe(cli: &Cli) -> anyhow::Result<Result<Value, TenancyError>> {
    let store = MemoryTenantStore::load_json(&cli.tenants)?;
    let config = TenancyConfig {
        connect_timeout_ms: cli.connect_timeout_ms,
        request_timeout_ms: cli.request_timeout_ms,
        enforce_subscription_expiry: cli.enforce_expiry,
        ..TenancyConfig::default()
    };
    let resolver = TenantResolver::builder(Arc::new(store), connector(cli.driver))
        .config(config)
        .build();

    let create = cli
        .create
        .as_deref()
        .map(serde_json::from_str::<Document>)
        .transpose()
        .context("parsing --create document")?;

    let outcome = async {
        let resolved = resolver
            .get_tenant_model(&cli.domain, &cli.entity)
            .await?;
        let mut report = json!({
            "ok": true,
            "tenant": resolved.tenant,
            "connection_id": resolved.connection.id().0,
            "entity": resolved.model.entity().as_str(),
            "collection": resolved.model.collection(),
        });
        if let Some(doc) = create {
            report["created"] = Value::Object(resolved.model.create(doc).await?);
        }
        Ok::<_, TenancyError>(report)
    }
    .await;

    resolver.shutdown().await?;
    Ok(outcome)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let (report, code) = match probe(&cli).await {
        Ok(Ok(report)) => (report, ExitCode::SUCCESS),
        Ok(Err(err)) => (
            json!({
                "ok": false,
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                    "retryable": err.is_retryable(),
                },
            }),
            ExitCode::FAILURE,
        ),
        Err(err) => (
            json!({ "ok": false, "error": { "kind": "Probe", "message": format!("{err:#}") } }),
            ExitCode::from(2),
        ),
    };

    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("failed to render report: {err}"),
    }
    code
}
