//! promgate — inspect and dry-run metrics adapter rules.
//!
//! # Usage
//!
//! ```text
//! promgate validate --config adapter.yaml
//! promgate discover --config adapter.yaml --series fixture.json
//! promgate query --config adapter.yaml --series fixture.json \
//!     --resource pods --namespace prod --name web-1 --metric http_requests_per_second
//! promgate defaults --rate-interval 5m
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "promgate",
    about = "promgate — serve Prometheus series as Kubernetes metrics",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rules file and summarize it
    Validate {
        /// Rules file (.yaml, .yml, .toml or .json)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run one relist against fixture data and list the exposed metrics
    Discover {
        #[arg(short, long)]
        config: PathBuf,
        /// Backend fixture (JSON): series per discovery query, results per query
        #[arg(short, long)]
        series: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Render and run the query a value request would send
    Query {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        series: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Kind::Custom)]
        kind: Kind,
        /// Resource of the described objects, e.g. `pods` or `deployments.apps`
        #[arg(short, long, default_value = "pods")]
        resource: String,
        #[arg(short, long)]
        namespace: Option<String>,
        /// Object name; repeat for several, omit for all
        #[arg(long = "name")]
        names: Vec<String>,
        #[arg(short, long)]
        metric: String,
        /// Per-request deadline
        #[arg(long, default_value = "30s")]
        timeout: humantime::Duration,
    },
    /// Print the built-in default rules as YAML
    Defaults {
        /// Window of the generated rate() queries
        #[arg(long, default_value = "5m")]
        rate_interval: humantime::Duration,
        /// Prefix of the namespace/pod labels on application series
        #[arg(long, default_value = "")]
        label_prefix: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Custom,
    External,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("warn,promgate=info"))?,
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => commands::validate::validate(&config),
        Commands::Discover {
            config,
            series,
            format,
        } => commands::discover::discover(&config, &series, format).await,
        Commands::Query {
            config,
            series,
            kind,
            resource,
            namespace,
            names,
            metric,
            timeout,
        } => {
            let request = commands::query::QueryRequest {
                kind,
                resource: resource.parse()?,
                namespace,
                names,
                metric,
                timeout: timeout.into(),
            };
            commands::query::query(&config, &series, &request).await
        }
        Commands::Defaults {
            rate_interval,
            label_prefix,
        } => commands::validate::defaults(rate_interval.into(), &label_prefix),
    }
}
