// THEORY:
// This file is the main entry point for the `lineara` library crate. It turns
// 8-bit sRGB image files into an uncompressed, linear-light, little-endian
// float RGBA stream ("LEFPLRGBA") and back, so image tools can be chained with
// plain pipes:
//
//     lineara 1.bmp | appX | appY | lineara --back 2.jpg
//
// The public surface is the `ConversionPipeline` (with `PipelineConfig` and
// `Mode`) for whole conversions, plus the two core building blocks for callers
// that bring their own pixels: the color transform functions in
// `core_modules::transfer` and the wire codec in `core_modules::stream`.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::pixel::pixel::{ChannelLayout, LinearPixel, RgbaImage, SourceImage};
pub use core_modules::stream::{StreamDecoder, StreamHeader, StreamLimits, decode, encode};
pub use core_modules::transfer::{
    GreyReduction, linear_rgb_to_luma, linear_to_srgb, srgb_to_linear,
};
pub use core_modules::utils::image_helper::image_helper::OutputFormat;
pub use error::{Error, Result};
pub use pipeline::{ConversionPipeline, ConversionReport, Mode, PipelineConfig};
