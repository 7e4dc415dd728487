use crate::core_modules::pixel::pixel::{
    ChannelLayout, OUTPUT_CHANNELS, RECORD_SIZE, RgbaImage, SourceImage,
};
use crate::core_modules::stream::{
    HEADER_SIZE, StreamDecoder, StreamHeader, convert_records, fill, linearize_into, output_buffer,
};
use crate::core_modules::transfer::GreyReduction;
use crate::error::{Error, Result};
use crate::pipeline::PipelineConfig;
use futures::stream::{FuturesOrdered, StreamExt};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const BUFFER_POOL_SIZE: usize = 16;
/// Bands kept in flight per worker.
const BANDS_PER_WORKER: usize = 2;
/// Upper bound on pixels per band, whatever the declared width.
const MAX_BAND_PIXELS: usize = 1 << 16;

/// What a worker does with a band.
#[derive(Debug, Clone, Copy)]
pub enum BandKind {
    /// Source bytes in `layout` -> stream records.
    Linearize(ChannelLayout),
    /// Stream records -> 8-bit RGBA.
    Convert(GreyReduction),
}

/// A run of consecutive pixels travelling through the pool.
///
/// `output` is pre-sized by the submitter; workers fill it from `input`.
#[derive(Debug)]
pub struct Band {
    pub id: u64,
    pub first_pixel: usize,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
}

pub struct BandTask {
    pub band: Band,
    pub kind: BandKind,
    pub result_sender: oneshot::Sender<Band>,
}

/// Splits `total` pixels into bands of at most `band_pixels` pixels.
///
/// Yields `(id, first_pixel, pixels)`.
pub fn bands(total: usize, band_pixels: usize) -> impl Iterator<Item = (u64, usize, usize)> {
    let band_pixels = band_pixels.max(1);
    (0..total)
        .step_by(band_pixels)
        .enumerate()
        .map(move |(id, first)| (id as u64, first, band_pixels.min(total - first)))
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<BandTask>,
    dispatcher: tokio::task::JoinHandle<()>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers plus a round-robin dispatcher.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<BandTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<BandTask>())
            .unzip();

        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, mut worker_receiver)| {
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let BandTask {
                            mut band,
                            kind,
                            result_sender,
                        } = task;
                        Self::process_band_worker(&mut band, kind);
                        debug!(worker_id, band = band.id, "band converted");
                        // The submitter may have given up (e.g. truncated input).
                        let _ = result_sender.send(band);
                    }
                })
            })
            .collect();

        Self {
            task_sender,
            dispatcher,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn process_band_worker(band: &mut Band, kind: BandKind) {
        match kind {
            BandKind::Linearize(layout) => linearize_into(&band.input, layout, &mut band.output),
            BandKind::Convert(grey) => convert_records(&band.input, grey, &mut band.output),
        }
    }

    /// Queues a band and returns the channel its result arrives on.
    pub fn submit(&self, band: Band, kind: BandKind) -> Result<oneshot::Receiver<Band>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(BandTask {
                band,
                kind,
                result_sender,
            })
            .map_err(|_| Error::WorkerPool("Failed to send band to worker pool"))?;
        Ok(result_receiver)
    }

    /// Stops accepting bands and waits for every worker to drain.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Recycled band buffers, so steady-state conversion stops allocating.
#[derive(Default)]
struct BufferPool {
    buffers: Mutex<VecDeque<Vec<u8>>>,
}

impl BufferPool {
    fn take(&self, len: usize) -> Vec<u8> {
        let mut buffer = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        buffer.resize(len, 0);
        buffer
    }

    fn give(&self, buffer: Vec<u8>) {
        let mut pool = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < BUFFER_POOL_SIZE {
            pool.push_back(buffer);
        }
    }
}

/// Stream codec that converts bands of pixels on a worker pool.
///
/// Produces byte-identical output to the serial codec in `stream`: the header
/// goes out first and bands are written strictly in pixel order. A band covers
/// `band_rows` rows, capped at `MAX_BAND_PIXELS`.
pub struct ParallelCodec {
    worker_pool: WorkerPool,
    buffer_pool: BufferPool,
    band_rows: usize,
    decoder: StreamDecoder,
}

impl ParallelCodec {
    pub fn new(config: &PipelineConfig) -> Self {
        let worker_pool = WorkerPool::new(config.worker_count());
        debug!(
            workers = worker_pool.worker_count(),
            band_rows = config.band_rows,
            "worker pool started"
        );
        Self {
            worker_pool,
            buffer_pool: BufferPool::default(),
            band_rows: config.band_rows.max(1),
            decoder: StreamDecoder::new(config.grey, config.limits),
        }
    }

    fn band_pixels(&self, row_pixels: usize) -> usize {
        self.band_rows.saturating_mul(row_pixels).min(MAX_BAND_PIXELS)
    }

    fn window(&self) -> usize {
        self.worker_pool.worker_count() * BANDS_PER_WORKER
    }

    fn receive(result: Option<std::result::Result<Band, oneshot::error::RecvError>>) -> Result<Band> {
        match result {
            Some(Ok(band)) => Ok(band),
            _ => Err(Error::WorkerPool("Failed to receive band from worker")),
        }
    }

    pub async fn encode<W: Write>(&self, image: &SourceImage, mut writer: W) -> Result<StreamHeader> {
        let header = StreamHeader::new(image.width(), image.height())?;
        header.write_to(&mut writer)?;

        let layout = image.layout();
        let band_pixels = self.band_pixels(image.width() as usize);
        let mut in_flight = FuturesOrdered::new();

        for (id, first_pixel, pixels) in bands(image.pixel_count(), band_pixels) {
            let source = image.pixels(first_pixel, pixels);
            let mut input = self.buffer_pool.take(source.len());
            input.copy_from_slice(source);
            let band = Band {
                id,
                first_pixel,
                input,
                output: self.buffer_pool.take(pixels * RECORD_SIZE),
            };
            in_flight.push_back(self.worker_pool.submit(band, BandKind::Linearize(layout))?);

            if in_flight.len() >= self.window() {
                let band = Self::receive(in_flight.next().await)?;
                self.write_band(band, &mut writer)?;
            }
        }
        while let Some(result) = in_flight.next().await {
            let band = Self::receive(Some(result))?;
            self.write_band(band, &mut writer)?;
        }
        writer.flush()?;

        Ok(header)
    }

    fn write_band<W: Write>(&self, band: Band, writer: &mut W) -> Result<()> {
        writer.write_all(&band.output)?;
        self.buffer_pool.give(band.input);
        self.buffer_pool.give(band.output);
        Ok(())
    }

    pub async fn decode<R: Read>(&self, mut reader: R) -> Result<RgbaImage> {
        let header = self.decoder.read_header(&mut reader)?;
        let band_pixels = self.band_pixels(header.width() as usize);
        let grey = self.decoder.grey;

        // Bounded reserve, then grows band by band as records arrive.
        let mut data = output_buffer(header.pixel_count());
        let mut consumed = HEADER_SIZE as u64;
        let mut in_flight = FuturesOrdered::new();

        for (id, first_pixel, pixels) in bands(header.pixel_count(), band_pixels) {
            let mut input = self.buffer_pool.take(pixels * RECORD_SIZE);
            let read = fill(&mut reader, &mut input)?;
            consumed += read as u64;
            if read < input.len() {
                return Err(Error::TruncatedStream {
                    expected: header.stream_len(),
                    available: consumed,
                });
            }
            let band = Band {
                id,
                first_pixel,
                input,
                output: self.buffer_pool.take(pixels * OUTPUT_CHANNELS),
            };
            in_flight.push_back(self.worker_pool.submit(band, BandKind::Convert(grey))?);

            if in_flight.len() >= self.window() {
                let band = Self::receive(in_flight.next().await)?;
                self.append_band(band, &mut data);
            }
        }
        while let Some(result) = in_flight.next().await {
            let band = Self::receive(Some(result))?;
            self.append_band(band, &mut data);
        }

        RgbaImage::new(header.width(), header.height(), data)
    }

    fn append_band(&self, band: Band, data: &mut Vec<u8>) {
        debug_assert_eq!(data.len(), band.first_pixel * OUTPUT_CHANNELS);
        data.extend_from_slice(&band.output);
        self.buffer_pool.give(band.input);
        self.buffer_pool.give(band.output);
    }

    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}
