use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use ladybug_stream_rs::imaging::{ExportConfig, TiffCompression};
use ladybug_stream_rs::logger::{self, info, warn};
use ladybug_stream_rs::pipeline::{CopyConfig, FrameExportPipeline, StreamCopyPipeline};
use ladybug_stream_rs::stream::{GpsFileType, ReaderConfig, StreamReader, WriterConfig};

#[derive(Parser)]
#[command(name = "ladybug-stream", version, about = "Inspect and process Ladybug stream files")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header, segment list and frame count of a stream
    Info { stream: PathBuf },
    /// Copy a frame range into a new stream
    Copy {
        source: PathBuf,
        destination: PathBuf,
        #[arg(long, default_value_t = 0)]
        from: u32,
        #[arg(long)]
        to: Option<u32>,
        /// Replacement camera configuration file
        #[arg(long)]
        config_file: Option<PathBuf>,
        /// Store each frame's adjustment in the new stream
        #[arg(long)]
        carry_adjustments: bool,
        /// Write through the background worker
        #[arg(long)]
        asynchronous: bool,
        /// Segment size cap in MiB
        #[arg(long)]
        max_segment_mb: Option<u64>,
    },
    /// Export the GPS track of a stream
    Gps {
        stream: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = GpsFormat::Kml)]
        format: GpsFormat,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 600)]
        height: u32,
    },
    /// Write the embedded camera configuration to a file
    Config { stream: PathBuf, output: PathBuf },
    /// Export frames as one TIFF per sensor
    Extract {
        stream: PathBuf,
        out_dir: PathBuf,
        #[arg(long, default_value_t = 0)]
        from: u32,
        #[arg(long)]
        to: Option<u32>,
        #[arg(long)]
        debayer: bool,
        #[arg(long, value_enum, default_value_t = Compression::None)]
        compression: Compression,
        /// Sensors to export (repeatable); all when omitted
        #[arg(long = "sensor")]
        sensors: Vec<usize>,
    },
    /// Compare header counts with a record walk of every segment
    RepairCheck { stream: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum GpsFormat {
    Text,
    Html,
    Kml,
}

impl From<GpsFormat> for GpsFileType {
    fn from(format: GpsFormat) -> Self {
        match format {
            GpsFormat::Text => GpsFileType::Text,
            GpsFormat::Html => GpsFileType::Html,
            GpsFormat::Kml => GpsFileType::Kml,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Compression {
    None,
    Lzw,
    Deflate,
}

impl From<Compression> for TiffCompression {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::None => TiffCompression::None,
            Compression::Lzw => TiffCompression::Lzw,
            Compression::Deflate => TiffCompression::DeflateBalanced,
        }
    }
}

fn open(stream: &PathBuf, recover: bool) -> Result<StreamReader> {
    let config = ReaderConfig::builder().recover_truncated(recover).build();
    StreamReader::open(stream, config).with_context(|| format!("opening {}", stream.display()))
}

fn print_info(stream: &PathBuf) -> Result<()> {
    let mut reader = open(stream, false)?;
    let header = reader.header().clone();
    println!("First segment:   {}", reader.first_file_name().display());
    println!("Format version:  {}", header.version);
    println!("Data format:     {}", header.data_format);
    println!("Resolution:      {}", header.resolution);
    println!("Bayer pattern:   {:?}", header.stippled_format);
    println!("Frame rate:      {:.2}", header.effective_frame_rate());
    println!("Serials:         {} / {}", header.serial_base, header.serial_head);
    println!("Sector padding:  {}", header.padding_size);
    println!("Config blob:     {} bytes", header.configuration_data_size);
    println!("Frames:          {}", reader.frame_count());
    for (path, segment) in reader.segment_paths().iter().zip(reader.segment_headers()) {
        println!(
            "  {}: {} frames, index stride {} ({} entries)",
            path.display(),
            segment.number_of_images,
            segment.index.stride(),
            segment.index.len()
        );
    }
    let summary = reader.gps_summary()?;
    println!("GPS fixes:       {}", summary.len());
    reader.close()?;
    Ok(())
}

fn repair_check(stream: &PathBuf) -> Result<()> {
    let declared = match open(stream, false) {
        Ok(reader) => Some(reader.frame_count()),
        Err(e) => {
            warn!("Header check failed: {}", e);
            None
        }
    };
    let recovered = open(stream, true)?.frame_count();
    match declared {
        Some(count) if count == recovered => println!("OK: {count} frames"),
        Some(count) => println!("Headers declare {count} frames, records hold {recovered}"),
        None => println!("Headers unreadable, records hold {recovered} frames"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    // Pipelines poll this between frames and keep partial output.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            info!("Ctrl+C received, stopping after the current frame");
            cancel.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl+C handler")?;
    }

    match cli.command {
        Command::Info { stream } => print_info(&stream)?,
        Command::Copy {
            source,
            destination,
            from,
            to,
            config_file,
            carry_adjustments,
            asynchronous,
            max_segment_mb,
        } => {
            let mut writer = WriterConfig::builder().asynchronous(asynchronous);
            if let Some(mb) = max_segment_mb {
                writer = writer.max_segment_size(mb * 1024 * 1024);
            }
            let config = CopyConfig::builder()
                .from(from)
                .to(to)
                .config_file(config_file)
                .carry_adjustments(carry_adjustments)
                .writer(writer.build())
                .build();
            let (outcome, first) = StreamCopyPipeline::new(config)
                .run(&source, &destination, &cancel)
                .context("stream copy failed")?;
            info!("{:?} -> {}", outcome, first.display());
            if !outcome.is_completed() {
                bail!("copy aborted after {} frames", outcome.frames());
            }
        }
        Command::Gps {
            stream,
            output,
            format,
            width,
            height,
        } => {
            let mut reader = open(&stream, false)?;
            let count = reader.write_gps_summary(&output, format.into(), width, height)?;
            println!("Wrote {} GPS fixes to {}", count, output.display());
        }
        Command::Config { stream, output } => {
            open(&stream, false)?.write_config_file(&output)?;
            println!("Wrote configuration to {}", output.display());
        }
        Command::Extract {
            stream,
            out_dir,
            from,
            to,
            debayer,
            compression,
            sensors,
        } => {
            let config = ExportConfig::builder()
                .debayer(debayer)
                .compression(compression.into())
                .sensors((!sensors.is_empty()).then_some(sensors))
                .build();
            let outcome = FrameExportPipeline::new(config)
                .run(&stream, from, to, &out_dir, &cancel)
                .context("frame export failed")?;
            println!("Exported {} frames to {}", outcome.frames(), out_dir.display());
        }
        Command::RepairCheck { stream } => repair_check(&stream)?,
    }

    Ok(())
}
