// THEORY:
// `image_helper` is the boundary to compressed image files. It is the only
// place that touches the `image` crate: `load_source` plays the decoder role
// (file -> interleaved 8-bit RGB/RGBA), `save_rgba` plays the encoder role
// (8-bit RGBA -> file, container picked from the file extension, PNG when the
// extension is missing or unknown). Errors from the codec are passed through
// untouched as `DecodeFailure` / `EncodeFailure`.

pub mod image_helper {
    use crate::core_modules::pixel::pixel::{ChannelLayout, RgbaImage, SourceImage};
    use crate::error::{Error, Result};
    use image::{DynamicImage, ImageFormat, ImageReader};
    use std::path::Path;
    use tracing::{debug, info};

    /// Containers the encoder adapter can write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum OutputFormat {
        /// PNG (lossless). Used when nothing else matches.
        #[default]
        Png,
        /// JPEG (lossy, no alpha).
        Jpeg,
        Bmp,
        Tga,
        Tiff,
        /// WebP (lossless).
        WebP,
        Qoi,
    }

    impl OutputFormat {
        /// Picks the container from the file extension, falling back to PNG.
        pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
            match ImageFormat::from_path(path) {
                Ok(ImageFormat::Jpeg) => OutputFormat::Jpeg,
                Ok(ImageFormat::Bmp) => OutputFormat::Bmp,
                Ok(ImageFormat::Tga) => OutputFormat::Tga,
                Ok(ImageFormat::Tiff) => OutputFormat::Tiff,
                Ok(ImageFormat::WebP) => OutputFormat::WebP,
                Ok(ImageFormat::Qoi) => OutputFormat::Qoi,
                _ => OutputFormat::Png,
            }
        }

        pub fn supports_alpha(self) -> bool {
            !matches!(self, OutputFormat::Jpeg)
        }

        fn to_image_format(self) -> ImageFormat {
            match self {
                OutputFormat::Png => ImageFormat::Png,
                OutputFormat::Jpeg => ImageFormat::Jpeg,
                OutputFormat::Bmp => ImageFormat::Bmp,
                OutputFormat::Tga => ImageFormat::Tga,
                OutputFormat::Tiff => ImageFormat::Tiff,
                OutputFormat::WebP => ImageFormat::WebP,
                OutputFormat::Qoi => ImageFormat::Qoi,
            }
        }
    }

    /// Decodes an image file into an 8-bit RGB or RGBA source buffer.
    ///
    /// Higher bit depths are reduced to 8 bits per channel. Grey and
    /// grey-alpha files fail with [`Error::UnsupportedChannelCount`].
    pub fn load_source<P: AsRef<Path>>(path: P) -> Result<SourceImage> {
        let image = ImageReader::open(path.as_ref())?
            .with_guessed_format()?
            .decode()
            .map_err(Error::DecodeFailure)?;
        source_from_dynamic(image)
    }

    /// Decodes an in-memory image file.
    pub fn load_source_from_bytes(bytes: &[u8]) -> Result<SourceImage> {
        let image = image::load_from_memory(bytes).map_err(Error::DecodeFailure)?;
        source_from_dynamic(image)
    }

    fn source_from_dynamic(image: DynamicImage) -> Result<SourceImage> {
        let channels = image.color().channel_count();
        info!(
            "Image {}x{} ({} channels).",
            image.width(),
            image.height(),
            channels
        );

        let layout = ChannelLayout::from_channel_count(channels)?;
        let (width, height) = dimensions(image.width(), image.height())?;
        let data = match layout {
            ChannelLayout::Rgb => image.into_rgb8().into_raw(),
            ChannelLayout::Rgba => image.into_rgba8().into_raw(),
        };
        SourceImage::new(width, height, layout, data)
    }

    /// Writes `image` to `path`, choosing the container from its extension.
    pub fn save_rgba<P: AsRef<Path>>(path: P, image: RgbaImage) -> Result<OutputFormat> {
        let format = OutputFormat::from_path(path.as_ref());
        save_rgba_with_format(path, image, format)?;
        Ok(format)
    }

    /// Writes `image` to `path` as `format`. Alpha is dropped for formats
    /// that cannot store it. The pixel buffer is handed to the encoder as is.
    pub fn save_rgba_with_format<P: AsRef<Path>>(
        path: P,
        image: RgbaImage,
        format: OutputFormat,
    ) -> Result<()> {
        let (width, height) = (image.width() as u32, image.height() as u32);
        let data = image.into_data();
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        let buffer = image::RgbaImage::from_raw(width, height, data)
            .ok_or(Error::BufferSizeMismatch { expected, actual })?;

        let mut output = DynamicImage::ImageRgba8(buffer);
        if !format.supports_alpha() {
            output = DynamicImage::ImageRgb8(output.to_rgb8());
        }

        debug!(?format, path = %path.as_ref().display(), "writing image");
        output
            .save_with_format(path.as_ref(), format.to_image_format())
            .map_err(Error::EncodeFailure)
    }

    fn dimensions(width: u32, height: u32) -> Result<(i32, i32)> {
        match (i32::try_from(width), i32::try_from(height)) {
            (Ok(width), Ok(height)) => Ok((width, height)),
            _ => Err(Error::InvalidDimensions {
                width: width as i64,
                height: height as i64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::image_helper::*;
    use crate::core_modules::pixel::pixel::{ChannelLayout, RgbaImage};
    use crate::error::Error;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lineara-{}-{}", std::process::id(), name))
    }

    fn gradient(width: i32, height: i32) -> RgbaImage {
        let mut buffer = vec![255u8; (width * height * 4) as usize];
        let mut intensity = 0u8;
        for pixel in buffer.chunks_mut(4) {
            pixel[0] = intensity;
            pixel[1] = intensity / 2;
            pixel[2] = 255 - intensity;
            pixel[3] = 200;
            intensity = intensity.wrapping_add(7);
        }
        RgbaImage::new(width, height, buffer).expect("Error building image.")
    }

    #[test]
    fn output_format_follows_extension() {
        assert_eq!(OutputFormat::from_path("out.png"), OutputFormat::Png);
        assert_eq!(OutputFormat::from_path("out.jpg"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_path("out.JPEG"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_path("out.bmp"), OutputFormat::Bmp);
        assert_eq!(OutputFormat::from_path("out.tga"), OutputFormat::Tga);
        assert_eq!(OutputFormat::from_path("out.unknown"), OutputFormat::Png);
        assert_eq!(OutputFormat::from_path("no_extension"), OutputFormat::Png);
    }

    #[test]
    fn png_keeps_every_byte() {
        let path = temp_path("roundtrip.png");
        let image = gradient(16, 8);

        save_rgba(&path, image.clone()).expect("Error Saving File.");
        let loaded = load_source(&path).expect("Error Loading File.");
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.layout(), ChannelLayout::Rgba);
        assert_eq!((loaded.width(), loaded.height()), (16, 8));
        assert_eq!(loaded.data(), image.data());
    }

    #[test]
    fn jpeg_drops_alpha() {
        let path = temp_path("opaque.jpg");
        let format = save_rgba(&path, gradient(8, 8)).expect("Error Saving File.");
        let loaded = load_source(&path).expect("Error Loading File.");
        std::fs::remove_file(&path).ok();

        assert_eq!(format, OutputFormat::Jpeg);
        assert_eq!(loaded.layout(), ChannelLayout::Rgb);
    }

    #[test]
    fn unknown_extension_writes_png() {
        let path = temp_path("mystery.lefpl");
        let format = save_rgba(&path, gradient(2, 2)).expect("Error Saving File.");
        let bytes = std::fs::read(&path).expect("Error Reading File.");
        std::fs::remove_file(&path).ok();

        assert_eq!(format, OutputFormat::Png);
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn grey_sources_are_rejected() {
        let path = temp_path("grey.png");
        image::GrayImage::from_pixel(4, 4, image::Luma([90]))
            .save(&path)
            .expect("Error Saving File.");
        let result = load_source(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(Error::UnsupportedChannelCount { channels: 1 })
        ));
    }

    #[test]
    fn undecodable_bytes_fail_to_decode() {
        let result = load_source_from_bytes(b"definitely not an image");
        assert!(matches!(result, Err(Error::DecodeFailure(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_source(temp_path("does-not-exist.png"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
