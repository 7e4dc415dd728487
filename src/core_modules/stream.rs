// THEORY:
// The `stream` module is the wire codec. A stream is an 8-byte header (width,
// height as little-endian i32) followed by exactly width x height 16-byte
// records (linear R, G, B, A as little-endian f32). There is no magic number,
// no version and no checksum; the only thing checked is that the declared
// dimensions are sane and that enough bytes arrive.
//
// Encoding works one row at a time through a single scratch row buffer. Decoding
// reads at most `DECODE_CHUNK_PIXELS` records at a time and grows the output
// pixel buffer only as records arrive: the header is untrusted, so a few bytes
// claiming a 100000x100000 image end in `TruncatedStream`, not in a 40 GB
// allocation. The header is always written (or read) before any record.
//
// The per-row helpers (`linearize_into`, `convert_records`) are public so the
// parallel pipeline can run them on bands of rows from worker tasks.

use crate::core_modules::pixel::pixel::{
    ChannelLayout, LinearPixel, OUTPUT_CHANNELS, RECORD_SIZE, RgbaImage, SourceImage, pixel_count,
};
use crate::core_modules::transfer::GreyReduction;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Read, Write};
use tracing::{debug, info};

/// Size in bytes of the stream header.
pub const HEADER_SIZE: usize = 8;

/// Records read per step when decoding.
pub const DECODE_CHUNK_PIXELS: usize = 4096;
/// Output bytes reserved up front when decoding; the rest grows with the input.
const DECODE_RESERVE_LIMIT: usize = 64 << 20;

/// The two-field stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    width: i32,
    height: i32,
    pixel_count: usize,
    stream_len: u64,
}

impl StreamHeader {
    /// Validates the dimensions and precomputes the stream size.
    pub fn new(width: i32, height: i32) -> Result<Self> {
        let pixel_count = pixel_count(width, height)?;
        let stream_len = (pixel_count as u64)
            .checked_mul(RECORD_SIZE as u64)
            .and_then(|records| records.checked_add(HEADER_SIZE as u64))
            .filter(|len| usize::try_from(*len).is_ok())
            .ok_or(Error::InvalidDimensions {
                width: width as i64,
                height: height as i64,
            })?;
        Ok(Self {
            width,
            height,
            pixel_count,
            stream_len,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Total stream length: header plus all records.
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    /// Parses and validates a header from its 8 raw bytes.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        Self::new(
            LittleEndian::read_i32(&bytes[0..4]),
            LittleEndian::read_i32(&bytes[4..8]),
        )
    }

    /// Reads the header from the head of a stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        let read = fill(reader, &mut bytes)?;
        if read < HEADER_SIZE {
            return Err(Error::TruncatedStream {
                expected: HEADER_SIZE as u64,
                available: read as u64,
            });
        }
        Self::parse(&bytes)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.width)?;
        writer.write_i32::<LittleEndian>(self.height)
    }
}

/// Upper bounds applied to a header before any pixel buffer is allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLimits {
    /// Largest accepted width x height. `None` accepts anything addressable.
    pub max_pixels: Option<u64>,
}

impl StreamLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self {
            max_pixels: Some(max_pixels),
        }
    }

    pub fn check(&self, header: &StreamHeader) -> Result<()> {
        match self.max_pixels {
            Some(limit) if header.pixel_count() as u64 > limit => Err(Error::LimitExceeded {
                pixels: header.pixel_count() as u64,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

/// Linearizes source pixels into stream records.
///
/// `source` holds whole pixels in `layout`; `records` must be exactly
/// `RECORD_SIZE` bytes per source pixel.
pub fn linearize_into(source: &[u8], layout: ChannelLayout, records: &mut [u8]) {
    for (pixel, record) in source
        .chunks_exact(layout.channels())
        .zip(records.chunks_exact_mut(RECORD_SIZE))
    {
        LinearPixel::from_source(pixel, layout).write_record(record);
    }
}

/// Converts stream records into 8-bit RGBA output pixels.
pub fn convert_records(records: &[u8], grey: GreyReduction, output: &mut [u8]) {
    for (record, pixel) in records
        .chunks_exact(RECORD_SIZE)
        .zip(output.chunks_exact_mut(OUTPUT_CHANNELS))
    {
        pixel.copy_from_slice(&LinearPixel::read_record(record).to_rgba(grey));
    }
}

/// Serializes `image` into `writer` and returns the header that was written.
///
/// Alpha comes from the source's fourth channel when its layout has one and
/// is fixed at 1.0 otherwise.
pub fn encode<W: Write>(image: &SourceImage, mut writer: W) -> Result<StreamHeader> {
    let header = StreamHeader::new(image.width(), image.height())?;
    header.write_to(&mut writer)?;

    let layout = image.layout();
    let row_pixels = image.width() as usize;
    let mut scratch = vec![0u8; row_pixels * RECORD_SIZE];
    for row in image.data().chunks_exact(row_pixels * layout.channels()) {
        linearize_into(row, layout, &mut scratch);
        writer.write_all(&scratch)?;
    }
    writer.flush()?;

    debug!(
        width = header.width(),
        height = header.height(),
        bytes = header.stream_len(),
        "stream encoded"
    );
    Ok(header)
}

/// Serializes a raw decoded buffer given the collaborator's channel count.
///
/// Fails with [`Error::UnsupportedChannelCount`] for grey and grey-alpha data.
pub fn encode_raw<W: Write>(
    width: i32,
    height: i32,
    channels: u8,
    data: Vec<u8>,
    writer: W,
) -> Result<StreamHeader> {
    let layout = ChannelLayout::from_channel_count(channels)?;
    let image = SourceImage::new(width, height, layout, data)?;
    encode(&image, writer)
}

/// Decodes streams into 8-bit RGBA images.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamDecoder {
    pub grey: GreyReduction,
    pub limits: StreamLimits,
}

impl StreamDecoder {
    pub fn new(grey: GreyReduction, limits: StreamLimits) -> Self {
        Self { grey, limits }
    }

    /// Reads the header and applies the limits.
    pub fn read_header<R: Read>(&self, reader: &mut R) -> Result<StreamHeader> {
        let header = StreamHeader::read_from(reader)?;
        self.limits.check(&header)?;
        info!("Stream image size: {}x{}.", header.width(), header.height());
        Ok(header)
    }

    /// Reads a complete stream from `reader` in chunks of
    /// [`DECODE_CHUNK_PIXELS`] records.
    ///
    /// Bytes after the last declared record are left unread.
    pub fn decode<R: Read>(&self, mut reader: R) -> Result<RgbaImage> {
        let header = self.read_header(&mut reader)?;
        let mut remaining = header.pixel_count();

        let mut data = output_buffer(remaining);
        let mut scratch = vec![0u8; remaining.min(DECODE_CHUNK_PIXELS) * RECORD_SIZE];
        let mut consumed = HEADER_SIZE as u64;
        while remaining > 0 {
            let pixels = remaining.min(DECODE_CHUNK_PIXELS);
            let records = &mut scratch[..pixels * RECORD_SIZE];
            let read = fill(&mut reader, records)?;
            consumed += read as u64;
            if read < records.len() {
                return Err(Error::TruncatedStream {
                    expected: header.stream_len(),
                    available: consumed,
                });
            }

            let start = data.len();
            data.resize(start + pixels * OUTPUT_CHANNELS, 0);
            convert_records(records, self.grey, &mut data[start..]);
            remaining -= pixels;
        }

        RgbaImage::new(header.width(), header.height(), data)
    }

    /// Decodes a stream held in memory.
    ///
    /// The length is checked against the header before the output buffer is
    /// allocated. Trailing bytes are ignored.
    pub fn decode_slice(&self, stream: &[u8]) -> Result<RgbaImage> {
        let header_bytes: &[u8; HEADER_SIZE] = stream
            .get(..HEADER_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::TruncatedStream {
                expected: HEADER_SIZE as u64,
                available: stream.len() as u64,
            })?;
        let header = StreamHeader::parse(header_bytes)?;
        self.limits.check(&header)?;
        if (stream.len() as u64) < header.stream_len() {
            return Err(Error::TruncatedStream {
                expected: header.stream_len(),
                available: stream.len() as u64,
            });
        }

        let records = &stream[HEADER_SIZE..header.stream_len() as usize];
        let mut data = vec![0u8; header.pixel_count() * OUTPUT_CHANNELS];
        convert_records(records, self.grey, &mut data);
        RgbaImage::new(header.width(), header.height(), data)
    }
}

/// Decodes a stream with color output and no limits.
pub fn decode<R: Read>(reader: R) -> Result<RgbaImage> {
    StreamDecoder::default().decode(reader)
}

/// Empty RGBA buffer for `pixels` decoded pixels, with capacity reserved up to
/// `DECODE_RESERVE_LIMIT` bytes.
pub(crate) fn output_buffer(pixels: usize) -> Vec<u8> {
    Vec::with_capacity(pixels.saturating_mul(OUTPUT_CHANNELS).min(DECODE_RESERVE_LIMIT))
}

/// Reads until `buf` is full or the input ends; returns the bytes read.
pub(crate) fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::transfer::srgb_to_linear;
    use std::io::Cursor;

    fn read_f32s(bytes: &[u8]) -> Vec<f32> {
        bytes.chunks_exact(4).map(LittleEndian::read_f32).collect()
    }

    fn white_rgb(width: i32, height: i32) -> SourceImage {
        let len = (width * height * 3) as usize;
        SourceImage::new(width, height, ChannelLayout::Rgb, vec![255; len]).expect("valid image")
    }

    #[test]
    fn two_white_pixels_encode_to_forty_bytes() {
        let mut stream = Vec::new();
        encode(&white_rgb(2, 1), &mut stream).expect("encode");

        assert_eq!(stream.len(), 40);
        assert_eq!(LittleEndian::read_i32(&stream[0..4]), 2);
        assert_eq!(LittleEndian::read_i32(&stream[4..8]), 1);
        assert_eq!(read_f32s(&stream[8..]), vec![1.0; 8]);

        let image = decode(Cursor::new(&stream)).expect("decode");
        assert_eq!(image.pixel_count(), 2);
        assert_eq!(image.pixel(0), [255, 255, 255, 255]);
        assert_eq!(image.pixel(1), [255, 255, 255, 255]);
    }

    #[test]
    fn stream_size_matches_dimensions() {
        for (width, height) in [(1, 1), (3, 5), (17, 2), (64, 64)] {
            let mut stream = Vec::new();
            let header = encode(&white_rgb(width, height), &mut stream).expect("encode");
            let expected = 8 + 16 * (width * height) as usize;
            assert_eq!(stream.len(), expected);
            assert_eq!(header.stream_len(), expected as u64);

            let image = decode(stream.as_slice()).expect("decode");
            assert_eq!(image.pixel_count(), (width * height) as usize);
        }
    }

    #[test]
    fn alpha_channel_is_normalized_not_linearized() {
        let image =
            SourceImage::new(1, 1, ChannelLayout::Rgba, vec![128, 64, 0, 128]).expect("valid image");
        let mut stream = Vec::new();
        encode(&image, &mut stream).expect("encode");

        let values = read_f32s(&stream[8..]);
        assert_eq!(values[0], srgb_to_linear(128));
        assert_eq!(values[1], srgb_to_linear(64));
        assert_eq!(values[2], 0.0);
        assert!((values[3] - 0.50196).abs() < 1e-5);

        let decoded = StreamDecoder::default().decode_slice(&stream).expect("decode");
        assert_eq!(decoded.pixel(0), [128, 64, 0, 128]);
    }

    #[test]
    fn truncated_records_are_rejected() {
        let mut stream = Vec::new();
        StreamHeader::new(10, 10)
            .expect("valid header")
            .write_to(&mut stream)
            .expect("write header");
        stream.resize(1607, 0);

        let err = decode(stream.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedStream {
                expected: 1608,
                available: 1607
            }
        ));

        let err = StreamDecoder::default().decode_slice(&stream).unwrap_err();
        assert!(matches!(err, Error::TruncatedStream { expected: 1608, .. }));
    }

    #[test]
    fn huge_header_with_short_body_is_truncated() {
        let mut stream = Vec::new();
        StreamHeader::new(100_000, 100_000)
            .expect("valid header")
            .write_to(&mut stream)
            .expect("write header");
        stream.extend_from_slice(&[0u8; RECORD_SIZE]);

        let err = decode(stream.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedStream {
                expected: 160_000_000_008,
                available: 24
            }
        ));

        let err = StreamDecoder::default().decode_slice(&stream).unwrap_err();
        assert!(matches!(err, Error::TruncatedStream { available: 24, .. }));
    }

    #[test]
    fn decoding_spans_several_chunks() {
        let width = DECODE_CHUNK_PIXELS as i32 + 3;
        let mut stream = Vec::new();
        encode(&white_rgb(width, 2), &mut stream).expect("encode");

        let image = decode(stream.as_slice()).expect("decode");
        assert_eq!(image.pixel_count(), 2 * width as usize);
        assert!(image.data().iter().all(|&byte| byte == 255));
        assert_eq!(image, StreamDecoder::default().decode_slice(&stream).expect("decode"));
    }

    #[test]
    fn short_header_is_truncated() {
        let err = decode(&[2u8, 0, 0][..]).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedStream {
                expected: 8,
                available: 3
            }
        ));
        let err = StreamDecoder::default().decode_slice(&[]).unwrap_err();
        assert!(matches!(err, Error::TruncatedStream { available: 0, .. }));
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        for (width, height) in [(0, 1), (1, 0), (-4, 2), (3, i32::MIN)] {
            let mut stream = Vec::new();
            stream.write_i32::<LittleEndian>(width).expect("write");
            stream.write_i32::<LittleEndian>(height).expect("write");
            let err = decode(stream.as_slice()).unwrap_err();
            assert!(matches!(err, Error::InvalidDimensions { .. }), "{width}x{height}");
        }
    }

    #[test]
    fn overflowing_stream_size_is_rejected() {
        assert!(matches!(
            StreamHeader::new(i32::MAX, i32::MAX),
            Err(Error::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn limits_apply_before_allocation() {
        let mut stream = Vec::new();
        StreamHeader::new(1000, 1000)
            .expect("valid header")
            .write_to(&mut stream)
            .expect("write header");

        let decoder = StreamDecoder::new(GreyReduction::Off, StreamLimits::with_max_pixels(999_999));
        let err = decoder.decode(stream.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            Error::LimitExceeded {
                pixels: 1_000_000,
                limit: 999_999
            }
        ));
    }

    #[test]
    fn out_of_range_records_clamp() {
        let mut stream = Vec::new();
        StreamHeader::new(1, 1)
            .expect("valid header")
            .write_to(&mut stream)
            .expect("write header");
        for value in [-0.5f32, 1.5, 0.0, 2.0] {
            stream.write_f32::<LittleEndian>(value).expect("write");
        }
        let image = decode(stream.as_slice()).expect("decode");
        assert_eq!(image.pixel(0), [0, 255, 0, 255]);
    }

    #[test]
    fn grey_policy_is_applied_on_decode() {
        let mut stream = Vec::new();
        encode(&white_rgb(1, 1), &mut stream).expect("encode");

        let legacy = StreamDecoder::new(GreyReduction::Legacy, StreamLimits::unlimited());
        assert_eq!(legacy.decode_slice(&stream).expect("decode").pixel(0), [167, 167, 167, 255]);

        let luma = StreamDecoder::new(GreyReduction::Luma, StreamLimits::unlimited());
        assert_eq!(luma.decode_slice(&stream).expect("decode").pixel(0), [255, 255, 255, 255]);
    }

    #[test]
    fn encode_raw_rejects_grey_sources() {
        let err = encode_raw(2, 2, 1, vec![0; 4], Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedChannelCount { channels: 1 }));
        let err = encode_raw(2, 2, 2, vec![0; 8], Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedChannelCount { channels: 2 }));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut stream = Vec::new();
        encode(&white_rgb(1, 1), &mut stream).expect("encode");
        stream.extend_from_slice(&[0xAA; 5]);
        assert_eq!(decode(stream.as_slice()).expect("decode").pixel_count(), 1);
        assert_eq!(
            StreamDecoder::default().decode_slice(&stream).expect("decode").pixel_count(),
            1
        );
    }
}
