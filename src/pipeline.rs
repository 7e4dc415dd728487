// THEORY:
// The `pipeline` module is the top-level API of the crate. A conversion is a
// one-shot batch job: one image file on one side, one linear stream on the
// other, and an explicit `Mode` saying which way the data flows.
//
// Everything that used to be ambient process state is passed in:
// - `PipelineConfig` carries the grey reduction policy, the worker count, the
//   band height and the stream limits.
// - The stream endpoints (stdin/stdout for the CLI, anything `Read`/`Write` for
//   library users) are handed to `ConversionPipeline::run` by the caller.
//
// With one worker the serial codec runs directly on the caller's task; with
// more, a `ParallelCodec` is spun up for the duration of the call and shut down
// before returning. Either way the output is fully written and flushed before
// `run` returns, and a failure never returns partial output.

use crate::core_modules::stream::{self, StreamDecoder, StreamLimits};
use crate::core_modules::transfer::GreyReduction;
use crate::core_modules::utils::image_helper::image_helper::{self, OutputFormat};
use crate::error::Result;
use crate::parallel_pipeline::ParallelCodec;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// Rows per band handed to a worker.
pub const DEFAULT_BAND_ROWS: usize = 64;

/// Direction of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Image file -> linear stream.
    Encode,
    /// Linear stream -> image file.
    Decode,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Encode => f.write_str("encode"),
            Mode::Decode => f.write_str("decode"),
        }
    }
}

/// Configuration for the ConversionPipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How the reverse direction turns linear RGB into output bytes.
    pub grey: GreyReduction,
    /// Worker tasks for band conversion. 0 means one per CPU, 1 means serial.
    pub workers: usize,
    /// Rows per band when converting in parallel.
    pub band_rows: usize,
    /// Applied to stream headers before allocating the output image.
    pub limits: StreamLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grey: GreyReduction::Off,
            workers: 0,
            band_rows: DEFAULT_BAND_ROWS,
            limits: StreamLimits::unlimited(),
        }
    }
}

impl PipelineConfig {
    /// Resolved worker count.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => num_cpus::get(),
            workers => workers,
        }
    }

    pub fn is_serial(&self) -> bool {
        self.worker_count() <= 1
    }
}

/// What a finished conversion did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub mode: Mode,
    pub width: i32,
    pub height: i32,
    /// Stream bytes written (encode) or consumed (decode).
    pub stream_bytes: u64,
    /// Container written, for decode.
    pub format: Option<OutputFormat>,
}

pub struct ConversionPipeline {
    config: PipelineConfig,
}

impl ConversionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Runs one conversion.
    ///
    /// - `Mode::Encode` reads `image_path` and writes the stream to `output`;
    ///   `input` is not touched.
    /// - `Mode::Decode` reads the stream from `input` and writes `image_path`;
    ///   `output` is not touched.
    pub async fn run<R: Read, W: Write>(
        &self,
        mode: Mode,
        image_path: &Path,
        input: R,
        output: W,
    ) -> Result<ConversionReport> {
        match mode {
            Mode::Encode => self.encode_file(image_path, output).await,
            Mode::Decode => self.decode_to_file(input, image_path).await,
        }
    }

    async fn encode_file<W: Write>(&self, image_path: &Path, output: W) -> Result<ConversionReport> {
        let image = image_helper::load_source(image_path)?;

        let header = if self.config.is_serial() {
            stream::encode(&image, output)?
        } else {
            let codec = ParallelCodec::new(&self.config);
            let result = codec.encode(&image, output).await;
            codec.shutdown().await;
            result?
        };

        Ok(ConversionReport {
            mode: Mode::Encode,
            width: header.width(),
            height: header.height(),
            stream_bytes: header.stream_len(),
            format: None,
        })
    }

    async fn decode_to_file<R: Read>(&self, input: R, image_path: &Path) -> Result<ConversionReport> {
        let image = if self.config.is_serial() {
            StreamDecoder::new(self.config.grey, self.config.limits).decode(input)?
        } else {
            let codec = ParallelCodec::new(&self.config);
            let result = codec.decode(input).await;
            codec.shutdown().await;
            result?
        };

        let header = stream::StreamHeader::new(image.width(), image.height())?;
        let format = image_helper::save_rgba(image_path, image)?;
        info!(
            "Wrote {}x{} image to {} ({:?}).",
            header.width(),
            header.height(),
            image_path.display(),
            format
        );

        Ok(ConversionReport {
            mode: Mode::Decode,
            width: header.width(),
            height: header.height(),
            stream_bytes: header.stream_len(),
            format: Some(format),
        })
    }
}
