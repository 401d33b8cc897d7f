use bytes::Bytes;
use clap::{Arg, ArgMatches, Command};
use rari_wire::config::WireConfig;
use rari_wire::error::RscError;
use rari_wire::rsc::rendering::render_eager;
use rari_wire::rsc::streaming::{DecodeOptions, decode};
use rari_wire::rsc::wire_format::row::{RowPayload, parse_rows};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn file_arg() -> Arg {
    Arg::new("file")
        .value_name("FILE")
        .help("Wire payload file ('-' reads stdin)")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let matches = Command::new("rari-wire")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and render RSC wire payloads")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("inspect").about("Print one summary line per row").arg(file_arg()))
        .subcommand(
            Command::new("render").about("Decode a payload and print its HTML").arg(file_arg()),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Reduce log output")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    init_logging(&matches)?;

    if dotenvy::dotenv().is_ok() {
        debug!("Loaded .env file");
    }

    let config = WireConfig::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    match matches.subcommand() {
        Some(("inspect", sub_matches)) => inspect(&read_payload(sub_matches).await?)?,
        Some(("render", sub_matches)) => render(read_payload(sub_matches).await?, config).await?,
        _ => return Err("Unknown subcommand".into()),
    }

    Ok(())
}

fn init_logging(matches: &ArgMatches) -> Result<(), RscError> {
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("rari_wire={default_level}")))
        .map_err(|e| RscError::configuration(format!("Failed to create log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(verbose)
                .with_line_number(verbose)
                .compact(),
        )
        .init();

    Ok(())
}

async fn read_payload(matches: &ArgMatches) -> Result<String, RscError> {
    let path = matches
        .get_one::<PathBuf>("file")
        .ok_or_else(|| RscError::configuration("File argument is required".to_string()))?;

    if path.as_os_str() == "-" {
        let mut payload = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut payload).await?;
        return Ok(payload);
    }

    Ok(tokio::fs::read_to_string(path).await?)
}

fn inspect(payload: &str) -> Result<(), RscError> {
    let rows = parse_rows(payload)?;
    let mut out = std::io::stdout().lock();

    for row in &rows {
        match &row.payload {
            RowPayload::Model(value) => {
                let text = value.to_string();
                let kind = match value {
                    serde_json::Value::Array(items) => {
                        items.first().and_then(|v| v.as_str()).unwrap_or("list").to_string()
                    }
                    serde_json::Value::String(_) => "text".to_string(),
                    serde_json::Value::Null => "empty".to_string(),
                    _ => "value".to_string(),
                };
                writeln!(out, "{:>4}  model  {:<14} {} bytes", row.id, kind, text.len())?;
            }
            RowPayload::Error(error) => {
                let digest = error.digest.as_deref().unwrap_or("-");
                writeln!(out, "{:>4}  error  digest={} {}", row.id, digest, error.message)?;
            }
        }
    }

    writeln!(out, "{} rows", rows.len())?;
    Ok(())
}

async fn render(payload: String, config: WireConfig) -> Result<(), RscError> {
    let source = futures::stream::iter(vec![Ok::<_, RscError>(Bytes::from(payload))]);
    let decoded = decode(source, DecodeOptions { loader: None, config }).await?;

    let html = render_eager(&decoded.value).await;
    let completion = decoded.completion.clone().await;
    debug!("Decode finished: {:?}", decoded.stats());

    let html = html?;
    writeln!(std::io::stdout().lock(), "{html}")?;

    completion.map_err(|e| {
        warn!("Payload rendered but decoding failed: {}", e);
        e
    })
}
