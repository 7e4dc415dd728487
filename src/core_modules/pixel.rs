// THEORY:
// The `pixel` module holds the "dumb" data containers the rest of the crate
// passes around. Nothing here knows about streams or files; it only knows how
// pixels are laid out in memory and how one pixel changes representation.
//
// Three forms of a pixel exist:
// - source bytes:  3 or 4 interleaved gamma-encoded bytes (R,G,B[,A])
// - linear:        4 f32 values (R,G,B linear light, A straight opacity)
// - output bytes:  4 interleaved bytes (R,G,B gamma-encoded, A)
//
// Image buffers are row-major, left-to-right, top-to-bottom, with `i32`
// dimensions that must be positive. Constructors check that the buffer length
// matches the declared dimensions, so code downstream can slice without
// re-validating.

pub mod pixel {
    use crate::core_modules::transfer::{
        Byte, GreyReduction, LinearChannel, alpha_to_linear, float_to_byte, linearization_table,
    };
    use crate::error::{Error, Result};
    use byteorder::{ByteOrder, LittleEndian};

    /// Size in bytes of one serialized linear pixel (4 x f32).
    pub const RECORD_SIZE: usize = 16;
    /// Channels in an output pixel.
    pub const OUTPUT_CHANNELS: usize = 4;

    /// Interleaving of a source image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChannelLayout {
        Rgb,
        Rgba,
    }

    impl ChannelLayout {
        /// Picks the layout for a decoded image's channel count.
        ///
        /// Grey (1) and grey-alpha (2) sources are rejected, not expanded.
        pub fn from_channel_count(channels: u8) -> Result<Self> {
            match channels {
                3 => Ok(ChannelLayout::Rgb),
                4 => Ok(ChannelLayout::Rgba),
                other => Err(Error::UnsupportedChannelCount { channels: other }),
            }
        }

        pub fn channels(self) -> usize {
            match self {
                ChannelLayout::Rgb => 3,
                ChannelLayout::Rgba => 4,
            }
        }

        pub fn has_alpha(self) -> bool {
            matches!(self, ChannelLayout::Rgba)
        }
    }

    /// Number of pixels in a `width` x `height` image.
    ///
    /// Fails with [`Error::InvalidDimensions`] when either side is not positive
    /// or the count does not fit in `usize`.
    pub fn pixel_count(width: i32, height: i32) -> Result<usize> {
        let invalid = || Error::InvalidDimensions {
            width: width as i64,
            height: height as i64,
        };
        if width <= 0 || height <= 0 {
            return Err(invalid());
        }
        (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(invalid)
    }

    /// One pixel in linear light.
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct LinearPixel {
        pub red: LinearChannel,
        pub green: LinearChannel,
        pub blue: LinearChannel,
        /// Straight (non-premultiplied) opacity, 0 = transparent.
        pub alpha: LinearChannel,
    }

    impl LinearPixel {
        pub fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
            Self {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// Linearizes one source pixel. Alpha is 1.0 for RGB layouts.
        #[inline]
        pub fn from_source(bytes: &[Byte], layout: ChannelLayout) -> Self {
            let table = linearization_table();
            let alpha = match layout {
                ChannelLayout::Rgba => alpha_to_linear(bytes[3]),
                ChannelLayout::Rgb => 1.0,
            };
            Self {
                red: table[bytes[0] as usize],
                green: table[bytes[1] as usize],
                blue: table[bytes[2] as usize],
                alpha,
            }
        }

        /// Reads one little-endian record. `record` must hold `RECORD_SIZE` bytes.
        #[inline]
        pub fn read_record(record: &[u8]) -> Self {
            Self {
                red: LittleEndian::read_f32(&record[0..4]),
                green: LittleEndian::read_f32(&record[4..8]),
                blue: LittleEndian::read_f32(&record[8..12]),
                alpha: LittleEndian::read_f32(&record[12..16]),
            }
        }

        /// Writes this pixel as one little-endian record into `record`.
        #[inline]
        pub fn write_record(&self, record: &mut [u8]) {
            LittleEndian::write_f32(&mut record[0..4], self.red);
            LittleEndian::write_f32(&mut record[4..8], self.green);
            LittleEndian::write_f32(&mut record[8..12], self.blue);
            LittleEndian::write_f32(&mut record[12..16], self.alpha);
        }

        /// Encodes back to 8-bit RGBA.
        #[inline]
        pub fn to_rgba(&self, grey: GreyReduction) -> [Byte; OUTPUT_CHANNELS] {
            let [red, green, blue] = grey.reduce(self.red, self.green, self.blue);
            [red, green, blue, float_to_byte(self.alpha)]
        }
    }

    /// Decoded 8-bit source image, as handed over by the decoder adapter.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SourceImage {
        width: i32,
        height: i32,
        layout: ChannelLayout,
        data: Vec<Byte>,
    }

    impl SourceImage {
        pub fn new(width: i32, height: i32, layout: ChannelLayout, data: Vec<Byte>) -> Result<Self> {
            let expected = pixel_count(width, height)?
                .checked_mul(layout.channels())
                .ok_or(Error::InvalidDimensions {
                    width: width as i64,
                    height: height as i64,
                })?;
            if data.len() != expected {
                return Err(Error::BufferSizeMismatch {
                    expected,
                    actual: data.len(),
                });
            }
            Ok(Self {
                width,
                height,
                layout,
                data,
            })
        }

        pub fn width(&self) -> i32 {
            self.width
        }

        pub fn height(&self) -> i32 {
            self.height
        }

        pub fn layout(&self) -> ChannelLayout {
            self.layout
        }

        pub fn has_alpha(&self) -> bool {
            self.layout.has_alpha()
        }

        pub fn pixel_count(&self) -> usize {
            self.width as usize * self.height as usize
        }

        pub fn data(&self) -> &[Byte] {
            &self.data
        }

        /// Bytes of pixels `first..first + count` in row-major order.
        pub fn pixels(&self, first: usize, count: usize) -> &[Byte] {
            let channels = self.layout.channels();
            &self.data[first * channels..(first + count) * channels]
        }
    }

    /// 8-bit RGBA image produced by the reverse direction.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RgbaImage {
        width: i32,
        height: i32,
        data: Vec<Byte>,
    }

    impl RgbaImage {
        pub fn new(width: i32, height: i32, data: Vec<Byte>) -> Result<Self> {
            let expected = pixel_count(width, height)?
                .checked_mul(OUTPUT_CHANNELS)
                .ok_or(Error::InvalidDimensions {
                    width: width as i64,
                    height: height as i64,
                })?;
            if data.len() != expected {
                return Err(Error::BufferSizeMismatch {
                    expected,
                    actual: data.len(),
                });
            }
            Ok(Self {
                width,
                height,
                data,
            })
        }

        pub fn width(&self) -> i32 {
            self.width
        }

        pub fn height(&self) -> i32 {
            self.height
        }

        pub fn pixel_count(&self) -> usize {
            self.width as usize * self.height as usize
        }

        /// The RGBA bytes of pixel `index` in row-major order.
        pub fn pixel(&self, index: usize) -> [Byte; OUTPUT_CHANNELS] {
            let start = index * OUTPUT_CHANNELS;
            [
                self.data[start],
                self.data[start + 1],
                self.data[start + 2],
                self.data[start + 3],
            ]
        }

        pub fn data(&self) -> &[Byte] {
            &self.data
        }

        pub fn into_data(self) -> Vec<Byte> {
            self.data
        }
    }
}
