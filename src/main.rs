//! Binary entrypoint for the meshdot CLI.
//!
//! Commands:
//! - `ingest [--file <path>] [--format hex|events]` - feed frames or
//!   normalized events into the aggregation engine
//! - `decode --hex <frame>` - decode one MeshCore frame and print it
//! - `init` - create a starter `config.toml`
//! - `status` - print store statistics (devices, categories, MeshCore dots)
//!
//! See the library crate docs for module-level details: `meshdot::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use meshdot::config::Config;
use meshdot::engine::{
    AggregationEngine, DeviceUpdate, MergeOutcome, MeshcoreUpdate, MessageRecord,
};
use meshdot::logutil::hex_snippet;
use meshdot::meshcore::{decode_advert, decode_frame, PayloadType};
use meshdot::metrics;
use meshdot::storage::DotStore;

#[derive(Parser)]
#[command(name = "meshdot")]
#[command(about = "Telemetry aggregation for Meshtastic and MeshCore mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest frames or normalized events into the aggregation engine
    Ingest {
        /// Input file; reads stdin when omitted
        #[arg(short, long)]
        file: Option<String>,

        /// Input format: "hex" (one MeshCore frame per line) or "events"
        /// (one normalized JSON device update per line)
        #[arg(long, default_value = "hex")]
        format: String,

        /// Gateway identity attributed to ingested MeshCore frames
        #[arg(long)]
        gateway: Option<String>,
    },
    /// Decode one MeshCore frame given as hex and print the result
    Decode {
        /// Frame bytes as a hex string
        #[arg(long)]
        hex: String,
    },
    /// Initialize a new configuration file
    Init,
    /// Show store statistics
    Status,
}

/// Normalized ingestion event, one JSON object per line.
#[derive(Debug, Deserialize)]
struct IngestEvent {
    device_id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(flatten)]
    update: DeviceUpdate,
    /// Optional application payload appended to the category message log.
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new meshdot configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Decode { hex } => {
            let bytes = parse_hex(&hex)?;
            match decode_frame(&bytes) {
                Ok(frame) => {
                    let mut output = serde_json::json!({
                        "version": frame.version,
                        "route_type": frame.route_type.to_string(),
                        "payload_type": frame.payload_type.to_string(),
                        "transport": frame.transport.map(|t| hex_snippet(&t, 4)),
                        "path": hex_snippet(&frame.path, frame.path.len()),
                        "payload_len": frame.payload.len(),
                    });
                    if frame.payload_type == PayloadType::Advert {
                        match decode_advert(&frame.payload) {
                            Ok(advert) => {
                                output["advert"] = serde_json::json!({
                                    "public_key": advert.public_key_hex(),
                                    "timestamp": advert.timestamp,
                                    "device_type": advert.device_type.to_string(),
                                    "latitude": advert.latitude,
                                    "longitude": advert.longitude,
                                    "feature1": advert.feature1,
                                    "feature2": advert.feature2,
                                    "name": advert.name,
                                    "truncated": advert.truncated,
                                });
                            }
                            Err(err) => {
                                output["advert_error"] = serde_json::json!(err.to_string());
                            }
                        }
                    }
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                Err(err) => {
                    println!("decode failed: {}", err);
                    std::process::exit(1);
                }
            }
        }
        Commands::Ingest {
            file,
            format,
            gateway,
        } => {
            let config = pre_config.unwrap_or_default();
            info!("Starting meshdot v{}", env!("CARGO_PKG_VERSION"));
            let store =
                DotStore::open_with_timeout(&config.storage.data_dir, config.batch_timeout())?;
            let engine = AggregationEngine::new(store.clone(), config.engine_options());

            let reader: Box<dyn AsyncRead + Unpin + Send> = match &file {
                Some(path) => Box::new(tokio::fs::File::open(path).await?),
                None => Box::new(tokio::io::stdin()),
            };
            let mut lines = BufReader::new(reader).lines();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown requested; stopping ingestion");
                        break;
                    }
                    line = lines.next_line() => {
                        match line? {
                            Some(line) => {
                                let line = line.trim();
                                if line.is_empty() {
                                    continue;
                                }
                                match format.as_str() {
                                    "hex" => ingest_hex_frame(&engine, line, gateway.as_deref()).await,
                                    "events" => ingest_event(&engine, line).await,
                                    other => return Err(anyhow!("unknown ingest format '{}'", other)),
                                }
                            }
                            None => break,
                        }
                    }
                }
            }

            let snap = metrics::snapshot();
            info!(
                "Ingestion finished: {} frames decoded, {} failed, {} merges written, {} debounced",
                snap.frames_decoded, snap.frames_failed, snap.merges_written, snap.merges_debounced
            );
            store.flush()?;
        }
        Commands::Status => {
            let config = pre_config.unwrap_or(Config::load(&cli.config).await?);
            let store =
                DotStore::open_with_timeout(&config.storage.data_dir, config.batch_timeout())?;
            let engine = AggregationEngine::new(store, config.engine_options());

            let dots = engine.get_all_aggregated_state().await;
            let meshcore = engine.get_meshcore_dots().await;
            let categories = engine.category_statistics().await;
            let output = serde_json::json!({
                "devices": dots.len(),
                "meshcore_devices": meshcore.len(),
                "categories": categories,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Decode one hex MeshCore frame and merge ADVERT payloads into the engine.
async fn ingest_hex_frame(engine: &AggregationEngine, line: &str, gateway: Option<&str>) {
    let bytes = match parse_hex(line) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!("skipping malformed hex line: {}", err);
            metrics::inc_frames_failed();
            return;
        }
    };
    let frame = match decode_frame(&bytes) {
        Ok(frame) => {
            metrics::inc_frames_decoded();
            frame
        }
        Err(err) => {
            // Routine on a lossy radio link; log at debug with a bounded preview.
            debug!("frame decode failed ({}): {}", err, hex_snippet(&bytes, 16));
            metrics::inc_frames_failed();
            return;
        }
    };
    if frame.payload_type != PayloadType::Advert {
        return;
    }
    match decode_advert(&frame.payload) {
        Ok(advert) => {
            metrics::inc_adverts_decoded();
            if advert.truncated {
                metrics::inc_adverts_partial();
            }
            let mut update = MeshcoreUpdate::from_advert(&advert);
            update.gateway_origin = gateway.map(str::to_string);
            let outcome = engine
                .merge_meshcore_update(&advert.public_key_hex(), update)
                .await;
            debug!(
                "advert {} ({}): {:?}",
                advert.public_key_hex(),
                advert.device_type,
                outcome
            );
        }
        Err(err) => {
            debug!("advert decode failed: {}", err);
            metrics::inc_frames_failed();
        }
    }
}

/// Merge one normalized JSON event and optionally append its payload to the
/// category message log.
async fn ingest_event(engine: &AggregationEngine, line: &str) {
    let event: IngestEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(err) => {
            warn!("skipping malformed event line: {}", err);
            return;
        }
    };
    let gateway_id = event.update.gateway_id.clone();
    let from_id = event
        .update
        .origin_id
        .clone()
        .unwrap_or_else(|| event.device_id.clone());
    let outcome = engine
        .merge_device_update(&event.device_id, event.update, event.category.as_deref())
        .await;
    if outcome == MergeOutcome::Skipped {
        debug!("event for {} skipped", event.device_id);
    }
    if let (Some(category), Some(payload)) = (event.category.as_deref(), event.payload) {
        let record = MessageRecord {
            time: chrono::Utc::now().timestamp_millis(),
            gateway_id: gateway_id.unwrap_or_default(),
            from_id,
            payload,
        };
        engine.append_message(category, &event.device_id, record).await;
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(anyhow!("odd-length hex string"));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| anyhow!("invalid hex at offset {}", i))
        })
        .collect()
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level.as_str())
            .unwrap_or("info")
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(&file) {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::parse_hex;

    #[test]
    fn parse_hex_handles_spacing() {
        assert_eq!(
            parse_hex("02 00 03 01020304 61").unwrap(),
            vec![0x02, 0x00, 0x03, 0x01, 0x02, 0x03, 0x04, 0x61]
        );
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
