// Command-line shell around the `lineara` library. It owns everything the
// library deliberately does not: argument parsing, logging setup, the stdio
// handles and the mapping from errors to exit codes.

use anyhow::Context;
use clap::Parser;
use lineara::{ConversionPipeline, ConversionReport, GreyReduction, Mode, PipelineConfig, StreamLimits};
use std::ffi::OsString;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

/// Exit code used when the source image is grey or grey-alpha.
const EXIT_UNSUPPORTED_CHANNELS: u8 = 50;
const EXIT_FAILURE: u8 = 1;

const LONG_ABOUT: &str = "\
Converts images to and from LEFPLRGBA, an uncompressed stream meant for
passing pixels between tools over pipes:

   LE | little-endian
   FP | 32-bit floating point per channel
 LRGB | linear light RGB (0..1, no gamma)
    A | straight alpha (0 is transparent)

The stream is two int32 values (width, height) followed by one
R, G, B, A float32 record per pixel, left-to-right, top-to-bottom.
There is no magic number and no integrity check.

Input: 8-bit sRGB(A) JPEG, PNG, BMP, TGA and anything else the image
decoder understands. Grey images are not supported.
Output: the format follows the file extension, PNG by default.

Example:
  lineara 1.bmp | appX | appY | lineara --back 2.jpg";

#[derive(Parser, Debug)]
#[command(name = "lineara", version, about = "sRGB image <-> linear float RGBA stream", long_about = LONG_ABOUT)]
struct Args {
    /// Read a stream from stdin and write IMAGE instead of the other way round.
    #[arg(short = 'b', long = "back")]
    back: bool,

    /// Image to read (forward) or to write (with --back).
    image: PathBuf,

    /// Grey reduction on the way back: off, legacy or luma.
    #[arg(long, default_value_t = GreyReduction::Off)]
    grey: GreyReduction,

    /// Worker tasks (0 = one per CPU, 1 = no worker pool).
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Rows per band handed to a worker.
    #[arg(long, default_value_t = lineara::pipeline::DEFAULT_BAND_ROWS)]
    band_rows: usize,

    /// Refuse streams declaring more pixels than this.
    #[arg(long)]
    max_pixels: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.back { Mode::Decode } else { Mode::Encode }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            grey: self.grey,
            workers: self.workers,
            band_rows: self.band_rows,
            limits: StreamLimits {
                max_pixels: self.max_pixels,
            },
        }
    }
}

/// Accepts the single-dash `-back` spelling older scripts use.
fn normalize_legacy_flags<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| if arg == "-back" { OsString::from("--back") } else { arg })
        .collect()
}

fn init_logging(verbose: bool) {
    // stdout carries the stream, so logs go to stderr.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run(args: &Args) -> anyhow::Result<ConversionReport> {
    let mode = args.mode();
    let pipeline = ConversionPipeline::new(args.pipeline_config());
    let stdin = io::stdin();
    let stdout = io::stdout();

    pipeline
        .run(
            mode,
            &args.image,
            BufReader::new(stdin.lock()),
            BufWriter::new(stdout.lock()),
        )
        .await
        .with_context(|| format!("Failed to {} {}", mode, args.image.display()))
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<lineara::Error>() {
        Some(lineara::Error::UnsupportedChannelCount { .. }) => EXIT_UNSUPPORTED_CHANNELS,
        _ => EXIT_FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_from(normalize_legacy_flags(std::env::args_os()));
    init_logging(args.verbose);

    match run(&args).await {
        Ok(report) => {
            debug!(?report, "conversion finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
