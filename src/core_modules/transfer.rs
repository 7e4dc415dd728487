// THEORY:
// The `transfer` module is the color transform engine of the crate. It owns the
// sRGB transfer function pair and nothing else: every function here is pure,
// works on a single channel value, and never fails.
//
// Key principles:
// 1.  **Byte in, float out (and back)**: the forward direction maps an 8-bit
//     gamma-encoded sample to a normalized linear-light `f32`. The reverse
//     direction maps an unbounded linear `f32` back to a displayable byte,
//     clamping instead of failing because upstream tools may produce values
//     outside [0, 1].
// 2.  **Alpha is not gamma-encoded**: alpha only gets normalized (`a / 255`)
//     and clamped back, never linearized.
// 3.  **Grey reduction is a policy, not an accident**: the historical tool
//     produced grey output by encoding each BT.709-weighted channel separately
//     and summing the bytes with 8-bit wrap-around. `GreyReduction` keeps that
//     behavior available as `Legacy`, offers the corrected `Luma` variant, and
//     defaults to `Off` (plain color output).
//
// Intermediate math is done in f64 and narrowed to f32 at the end, so that the
// 8-bit round trip `linear_to_srgb(srgb_to_linear(b)) == b` is exact for every
// byte.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub type Byte = u8;
pub type LinearChannel = f32;
pub type Luma = f32;

/// Gamma-encoded cutoff below which the sRGB curve is linear.
const SRGB_LINEAR_THRESHOLD: f64 = 0.04045;
/// Linear-light cutoff below which the inverse curve is linear.
const LINEAR_ENCODE_THRESHOLD: f64 = 0.0031308;
const LINEAR_SLOPE: f64 = 12.92;
const SRGB_OFFSET: f64 = 0.055;
const GAMMA: f64 = 2.4;
const MAX_BYTE: f64 = 255.0;

/// ITU-R BT.709 luma coefficients.
pub const LUMA_RED: f64 = 0.2126;
pub const LUMA_GREEN: f64 = 0.7152;
pub const LUMA_BLUE: f64 = 0.0722;

static LINEARIZATION_TABLE: OnceLock<[LinearChannel; 256]> = OnceLock::new();

/// Converts one gamma-encoded 8-bit sample to normalized linear intensity.
///
/// `0` maps to `0.0` and `255` maps to exactly `1.0`.
#[inline]
pub fn srgb_to_linear(sample: Byte) -> LinearChannel {
    let normalized = sample as f64 / MAX_BYTE;
    let linear = if normalized <= SRGB_LINEAR_THRESHOLD {
        normalized / LINEAR_SLOPE
    } else {
        ((normalized + SRGB_OFFSET) / (1.0 + SRGB_OFFSET)).powf(GAMMA)
    };
    linear as LinearChannel
}

/// Converts a linear-light value back to a gamma-encoded byte.
///
/// - Negative values clamp to `0`, values above `1.0` clamp to `255`.
/// - `NaN` maps to `0`.
/// - Rounds half away from zero.
#[inline]
pub fn linear_to_srgb(value: LinearChannel) -> Byte {
    let linear = value as f64;
    let encoded = if linear <= LINEAR_ENCODE_THRESHOLD {
        linear * LINEAR_SLOPE
    } else {
        (1.0 + SRGB_OFFSET) * linear.powf(1.0 / GAMMA) - SRGB_OFFSET
    };
    float_to_byte(encoded as f32)
}

/// Perceptual luminance of a linear RGB triple (BT.709 weights).
#[inline]
pub fn linear_rgb_to_luma(red: LinearChannel, green: LinearChannel, blue: LinearChannel) -> Luma {
    (LUMA_RED * red as f64 + LUMA_GREEN * green as f64 + LUMA_BLUE * blue as f64) as Luma
}

/// Normalizes a straight alpha byte to [0, 1].
#[inline]
pub fn alpha_to_linear(alpha: Byte) -> LinearChannel {
    (alpha as f64 / MAX_BYTE) as LinearChannel
}

/// Scales a normalized value to a byte with clamping and rounding.
///
/// Used directly for alpha, and as the last step of [`linear_to_srgb`].
#[inline]
pub fn float_to_byte(value: f32) -> Byte {
    // `as u8` saturates and sends NaN to 0.
    (MAX_BYTE * value as f64).round().clamp(0.0, MAX_BYTE) as Byte
}

/// 256-entry table of `srgb_to_linear` for every byte, built on first use.
///
/// The stream encoder looks samples up here instead of calling `powf` per
/// channel.
pub fn linearization_table() -> &'static [LinearChannel; 256] {
    LINEARIZATION_TABLE.get_or_init(|| {
        let mut table = [0.0f32; 256];
        for (sample, entry) in table.iter_mut().enumerate() {
            *entry = srgb_to_linear(sample as Byte);
        }
        table
    })
}

/// How the reverse direction turns a linear RGB triple into output bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GreyReduction {
    /// Keep color: each channel goes through [`linear_to_srgb`] on its own.
    #[default]
    Off,
    /// Byte-compatible with the historical tool: every weighted channel is
    /// gamma-encoded separately and the three bytes are summed modulo 256.
    /// Bright inputs wrap around (white becomes 167).
    Legacy,
    /// Corrected grey: gamma-encode the BT.709 luma once.
    Luma,
}

impl GreyReduction {
    /// Reduces one linear pixel's color channels to three output bytes.
    #[inline]
    pub fn reduce(self, red: LinearChannel, green: LinearChannel, blue: LinearChannel) -> [Byte; 3] {
        match self {
            GreyReduction::Off => [
                linear_to_srgb(red),
                linear_to_srgb(green),
                linear_to_srgb(blue),
            ],
            GreyReduction::Legacy => {
                let grey = linear_to_srgb((red as f64 * LUMA_RED) as f32)
                    .wrapping_add(linear_to_srgb((green as f64 * LUMA_GREEN) as f32))
                    .wrapping_add(linear_to_srgb((blue as f64 * LUMA_BLUE) as f32));
                [grey; 3]
            }
            GreyReduction::Luma => [linear_to_srgb(linear_rgb_to_luma(red, green, blue)); 3],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GreyReduction::Off => "off",
            GreyReduction::Legacy => "legacy",
            GreyReduction::Luma => "luma",
        }
    }
}

impl fmt::Display for GreyReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GreyReduction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" | "color" => Ok(GreyReduction::Off),
            "legacy" => Ok(GreyReduction::Legacy),
            "luma" => Ok(GreyReduction::Luma),
            other => Err(format!(
                "unknown grey reduction '{other}' (expected off, legacy or luma)"
            )),
        }
    }
}
