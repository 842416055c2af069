//! tagstream command-line client.
//!
//! Runs one tag service request against the configured backend and prints
//! the result as text or JSON.
//!
//! # Configuration
//!
//! Configuration is layered, in order of precedence:
//!
//! 1. Command-line arguments (highest precedence)
//! 2. Environment variables (prefixed with `TAGSTREAM_`, also read from `.env`)
//! 3. User-specified configuration file (via `--config`)
//! 4. System-wide configuration (`/etc/tagstream/config.toml`)
//! 5. Default configuration (embedded in binary)
//!
//! # Examples
//!
//! ```bash
//! # Backend version and uptime
//! tagstream status
//!
//! # Value of two tags at a point in time
//! tagstream tag TI-101,TI-102 --date "2024-01-01 06:00:00"
//!
//! # Hourly averages over a day, as JSON
//! tagstream --format json tag TI-101 --from "2024-01-01 00:00:00" --to "2024-01-02 00:00:00" --count 24 --group avg
//!
//! # Run a stored template against another backend
//! tagstream --backend plant templ exec daily_report db=archive day=2024-01-01
//! ```

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tagstream::TagService;
use tagstream_core::config::{CliArgs, Settings};
use tagstream_core::dates::{format_canonical, round_and_format};
use tagstream_core::store::TagSamples;
use tagstream_core::{BackendStatus, TabularOutput, Tags};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagstream")]
#[command(about = "Tag time-series reads, aggregation and query templates over SQL historians")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Backend version and uptime
    Status,
    /// Tag values at a date, or over a range
    Tag {
        /// Comma-separated tag names
        tags: String,
        /// Point in time
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<String>,
        /// Range start
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Range end
        #[arg(long, requires = "from")]
        to: Option<String>,
        /// Number of samples or sub-windows
        #[arg(long)]
        count: Option<String>,
        /// Group function: avg, sum, min, max, dif, count, avgm
        #[arg(long)]
        group: Option<String>,
    },
    /// Tag names matching a search mask (`*` and `?` wildcards)
    List {
        #[arg(default_value = "")]
        like: String,
    },
    /// Dates where a tag switched to zero
    Down {
        tag: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Dates where a tag switched from zero
    Up {
        tag: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Stored query templates
    Templ {
        #[command(subcommand)]
        command: TemplCommand,
    },
}

#[derive(Subcommand)]
enum TemplCommand {
    List {
        #[arg(default_value = "")]
        pattern: String,
    },
    Get {
        name: String,
    },
    Add {
        name: String,
        body: String,
    },
    Set {
        name: String,
        body: String,
    },
    Del {
        name: String,
    },
    /// Run a template, filling `{key}` placeholders from KEY=VALUE pairs
    Exec {
        name: String,
        #[arg(value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    Ok((key.to_string(), value.to_string()))
}

/// Result of one command.
enum Output {
    Status(BackendStatus),
    Tags(Tags),
    Samples(TagSamples),
    Table(TabularOutput),
    Dates(Vec<NaiveDateTime>),
    Templates(BTreeMap<String, String>),
    Body(String),
    Done,
}

fn json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

impl Output {
    fn render(&self, format: Format, precision: u32) -> Result<String, serde_json::Error> {
        if let Format::Json = format {
            return match self {
                Output::Status(status) => json(status),
                Output::Tags(tags) => json(tags),
                Output::Samples(samples) => json(samples),
                Output::Table(table) => json(table),
                Output::Dates(dates) => json(&dates.iter().map(|d| format_canonical(*d)).collect::<Vec<_>>()),
                Output::Templates(templates) => json(templates),
                Output::Body(body) => json(body),
                Output::Done => json(&"ok"),
            };
        }

        let value = |v: Option<f32>| match v {
            Some(v) => round_and_format(v, precision),
            None => "-1".to_string(),
        };
        let lines: Vec<String> = match self {
            Output::Status(status) => vec![format!("{}\t{}", status.version, status.uptime)],
            Output::Tags(tags) => tags
                .iter()
                .map(|t| format!("{}\t{}\t{}", t.name, format_canonical(t.date), value(t.value)))
                .collect(),
            Output::Samples(samples) => samples
                .iter()
                .flat_map(|(name, points)| {
                    points
                        .iter()
                        .map(move |(date, v)| format!("{}\t{}\t{}", name, format_canonical(*date), value(*v)))
                })
                .collect(),
            Output::Table(table) => std::iter::once(table.headers.join("\t"))
                .chain(table.rows.iter().map(|row| row.join("\t")))
                .collect(),
            Output::Dates(dates) => dates.iter().map(|d| format_canonical(*d)).collect(),
            Output::Templates(templates) => templates
                .iter()
                .map(|(name, body)| format!("{}\t{}", name, body))
                .collect(),
            Output::Body(body) => vec![body.clone()],
            Output::Done => vec!["ok".to_string()],
        };
        Ok(lines.join("\n"))
    }
}

async fn run(service: &TagService, command: Command) -> tagstream_core::Result<Output> {
    let output = match command {
        Command::Status => Output::Status(service.status().await?),
        Command::Tag {
            tags,
            date,
            from,
            to,
            count,
            group,
        } => match (date, from, to) {
            (Some(date), _, _) => Output::Tags(service.tag_date(&tags, &date, None).await?),
            (None, Some(from), Some(to)) => match (count, group) {
                (Some(count), Some(group)) => Output::Tags(
                    service
                        .tag_count_group(&tags, &from, &to, &count, &group, None)
                        .await?,
                ),
                (Some(count), None) => {
                    Output::Samples(service.tag_count(&tags, &from, &to, &count, None).await?)
                }
                (None, Some(group)) => Output::Tags(
                    service
                        .tag_from_to_group(&tags, &from, &to, &group, None)
                        .await?,
                ),
                (None, None) => Output::Tags(service.tag_from_to(&tags, &from, &to, None).await?),
            },
            _ => return Err(tagstream_core::StoreError::InvalidDate),
        },
        Command::List { like } => Output::Table(service.tag_list(&like).await?),
        Command::Down { tag, from, to } => Output::Dates(service.down_dates(&tag, &from, &to).await?),
        Command::Up { tag, from, to } => Output::Dates(service.up_dates(&tag, &from, &to).await?),
        Command::Templ { command } => match command {
            TemplCommand::List { pattern } => Output::Templates(service.template_list(&pattern).await?),
            TemplCommand::Get { name } => Output::Body(service.template_get(&name).await?),
            TemplCommand::Add { name, body } => {
                service.template_add(&name, &body).await?;
                Output::Done
            }
            TemplCommand::Set { name, body } => {
                service.template_set(&name, &body).await?;
                Output::Done
            }
            TemplCommand::Del { name } => {
                service.template_delete(&name).await?;
                Output::Done
            }
            TemplCommand::Exec { name, params } => {
                let params: HashMap<String, String> = params.into_iter().collect();
                Output::Table(service.template_exec(&name, &params).await?)
            }
        },
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load settings from config files, environment and CLI args
    let settings = Settings::new(&cli.args)?;
    let precision = settings.round;

    let service = match TagService::new(settings).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start tag service: {}", e);
            return Err(e.into());
        }
    };

    let result = run(&service, cli.command).await;
    service.shutdown().await;

    println!("{}", result?.render(cli.format, precision)?);
    Ok(())
}
