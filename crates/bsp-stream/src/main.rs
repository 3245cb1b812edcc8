//! bsp-stream - real-time biosignal filtering from the command line
//!
//! Reads framed two-channel ADC data from a file, stdin, or the built-in
//! simulator, filters every channel and prints one JSON line per filtered chunk.
//! With `--ws-port` the same chunks are also served to WebSocket clients.

use anyhow::{Context, Result};
use bsp_core::AdcScale;
use bsp_processing::SensorType;
use bsp_simulation::{start_frame_stream, SimulatorConfig, StreamCommand, StreamConfig};
use bsp_stream::{
    start_pipeline, ChunkServer, FrameReader, PipelineCommand, PipelineConfig, RecordedSample,
};
use clap::{ArgGroup, Parser};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Command line arguments for bsp-stream
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "simulate"])))]
struct Args {
    /// Pipeline configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Framed input file, or `-` for stdin
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Filter simulated data for this many seconds
    #[arg(long, value_name = "SECONDS")]
    simulate: Option<f64>,

    /// Sensor preset: emg, eeg or eog
    #[arg(long)]
    sensor: Option<SensorType>,

    /// Sampling rate in Hz
    #[arg(long)]
    fs: Option<f64>,

    /// Mains notch frequency in Hz
    #[arg(long, conflicts_with = "no_notch")]
    notch: Option<f64>,

    /// Disable the mains notch
    #[arg(long)]
    no_notch: bool,

    /// Filtered samples per output line
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Convert counts to centred millivolts before filtering
    #[arg(long)]
    centered: bool,

    /// Seed for the simulator
    #[arg(long)]
    seed: Option<u64>,

    /// Write every raw and filtered sample to this CSV file
    #[arg(long, value_name = "CSV")]
    record: Option<PathBuf>,

    /// Serve filtered chunks over WebSocket (default port 8765)
    #[arg(long, value_name = "PORT", num_args = 0..=1, default_missing_value = "8765")]
    ws_port: Option<u16>,
}

type ByteSource = Box<dyn AsyncRead + Unpin + Send>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = pipeline_config(&args)?;
    info!(filter = %config.filter.describe(), "configuration loaded");

    let (source, label) = open_source(&args, &config).await?;

    let ws_port = config.ws_port;
    let (events_tx, events_rx) = mpsc::channel(1024);
    let handle = start_pipeline(config, events_rx).context("failed to start filter pipeline")?;

    let server = match ws_port {
        Some(port) => {
            let server = ChunkServer::bind(("0.0.0.0", port), handle.chunks.resubscribe())
                .await
                .with_context(|| format!("failed to listen on port {}", port))?;
            Some(tokio::spawn(server.run()))
        }
        None => None,
    };

    if args.record.is_some() {
        handle.commands.send(PipelineCommand::StartRecording).await?;
        // Commands run in order; once the snapshot answers, recording is on
        let (reply, ready) = oneshot::channel();
        handle.commands.send(PipelineCommand::Snapshot(reply)).await?;
        ready.await.context("pipeline ended before recording started")?;
    }

    let printer = tokio::spawn(print_chunks(handle.chunks));

    // Held until recording is collected so the pipeline outlives the reader
    let keepalive = events_tx.clone();
    let mut reader = tokio::spawn(FrameReader::new(source, label).run(events_tx));

    tokio::select! {
        result = &mut reader => {
            match result.context("reader task panicked")? {
                Ok(stats) => info!(
                    bytes = stats.bytes_read,
                    frames = stats.frames_decoded,
                    discarded = stats.bytes_discarded,
                    "input finished"
                ),
                Err(e) => error!(error = %e, "input failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            reader.abort();
        }
    }

    if let Some(path) = &args.record {
        let (reply, rows) = oneshot::channel();
        handle.commands.send(PipelineCommand::StopRecording(reply)).await?;
        let rows = rows.await.context("pipeline ended before returning the recording")?;
        write_recording(path, &rows)?;
        info!(rows = rows.len(), path = %path.display(), "recording written");
    }

    drop(keepalive);
    handle.commands.send(PipelineCommand::Shutdown).await.ok();
    let stats = handle.task.await.context("pipeline task panicked")??;
    printer.await.context("output task panicked")?;
    if let Some(server) = server {
        server.await.context("websocket task panicked")??;
    }

    info!(
        samples = stats.sample_count,
        chunks = stats.chunks_sent,
        dropped = stats.frames_dropped,
        "done"
    );
    for (ch, summary) in stats.channels.iter().enumerate() {
        debug!(channel = ch, min = summary.min, max = summary.max, mean = summary.mean, "channel summary");
    }
    Ok(())
}

/// Load the configuration file, if any, and apply command line overrides
fn pipeline_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(sensor) = args.sensor {
        config.filter.sensor = sensor;
        config.source_label = sensor.label().to_string();
    }
    if let Some(fs) = args.fs {
        config.filter.sampling_rate = fs;
    }
    if let Some(frequency) = args.notch {
        config.filter = config.filter.with_notch(Some(frequency));
    }
    if args.no_notch {
        config.filter = config.filter.with_notch(None);
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if args.centered {
        config.adc_scale = AdcScale::Centered14Bit;
    }
    if args.ws_port.is_some() {
        config.ws_port = args.ws_port;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn open_source(args: &Args, config: &PipelineConfig) -> Result<(ByteSource, String)> {
    if let Some(seconds) = args.simulate {
        return simulated_source(seconds, config.sampling_rate(), args.seed);
    }

    match args.input.as_deref() {
        Some(path) if path == Path::new("-") => Ok((Box::new(tokio::io::stdin()), "stdin".to_string())),
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok((Box::new(file), path.display().to_string()))
        }
        None => anyhow::bail!("no input source given"),
    }
}

/// Paced simulator bytes delivered through an in-memory pipe
fn simulated_source(seconds: f64, sampling_rate: f64, seed: Option<u64>) -> Result<(ByteSource, String)> {
    anyhow::ensure!(seconds.is_finite() && seconds > 0.0, "simulation length must be positive");

    let config = StreamConfig {
        simulator: SimulatorConfig {
            sampling_rate,
            seed,
            ..Default::default()
        },
        frame_limit: Some((seconds * sampling_rate).round() as u64),
        ..Default::default()
    };
    let (mut batches, control, task) = start_frame_stream(config).context("failed to start simulator")?;
    let (reader, mut writer) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        if control.send(StreamCommand::Start).await.is_err() {
            warn!("simulator ended before it started");
            return;
        }
        loop {
            match batches.recv().await {
                Ok(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        debug!("simulated input closed by reader");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "simulated input fell behind, batches lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        drop(control);
        match task.await {
            Ok(Ok(stats)) => debug!(frames = stats.frames_generated, "simulator finished"),
            Ok(Err(e)) => warn!(error = %e, "simulator failed"),
            Err(e) => warn!(error = %e, "simulator task panicked"),
        }
    });

    Ok((Box::new(reader), "simulator".to_string()))
}

/// Print one JSON line per chunk until the pipeline closes
async fn print_chunks(mut chunks: broadcast::Receiver<bsp_stream::FilteredChunk>) {
    let stdout = std::io::stdout();
    loop {
        match chunks.recv().await {
            Ok(chunk) => {
                let line = match serde_json::to_string(&chunk) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "cannot encode chunk");
                        continue;
                    }
                };
                if writeln!(stdout.lock(), "{}", line).is_err() {
                    debug!("stdout closed");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "output fell behind, chunks lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Write recorded rows as CSV: time, sequence, then raw and filtered per channel
fn write_recording(path: &Path, rows: &[RecordedSample]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let channels = rows.first().map_or(0, |row| row.raw.len());
    let mut header = String::from("time_s,sequence");
    for ch in 0..channels {
        header.push_str(&format!(",ch{ch}_raw,ch{ch}_filtered"));
    }
    writeln!(out, "{}", header)?;

    for row in rows {
        write!(out, "{:.6},{}", row.time_s, row.sequence)?;
        for (raw, filtered) in row.raw.iter().zip(&row.filtered) {
            write!(out, ",{},{}", raw, filtered)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
