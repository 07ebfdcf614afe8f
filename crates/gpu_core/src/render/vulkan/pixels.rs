//! Pixel payloads handed to texture constructors
//!
//! The PNG codec lives in the `image` crate; this module only converts between
//! its buffers and the channel model textures are built from.

use ash::vk;
use std::path::Path;

use super::error::{ErrorKind, VulkanError, VulkanResult};

/// Number and meaning of channels per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    /// Single channel
    R,
    /// Two channels
    Rg,
    /// Three channels
    Rgb,
    /// Four channels
    Rgba,
}

impl Channels {
    /// Channels per pixel
    pub fn count(self) -> usize {
        match self {
            Self::R => 1,
            Self::Rg => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// Storage type of each channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTy {
    /// 8-bit unsigned normalized
    U8,
    /// 16-bit unsigned normalized
    U16,
    /// 32-bit float
    F32,
}

impl ChannelTy {
    /// Bytes per channel
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Vulkan format for a channel layout; `srgb` only affects 8-bit colour
pub fn vk_format(channels: Channels, channel_ty: ChannelTy, srgb: bool) -> vk::Format {
    use vk::Format as F;
    match (channel_ty, channels, srgb) {
        (ChannelTy::U8, Channels::R, false) => F::R8_UNORM,
        (ChannelTy::U8, Channels::R, true) => F::R8_SRGB,
        (ChannelTy::U8, Channels::Rg, false) => F::R8G8_UNORM,
        (ChannelTy::U8, Channels::Rg, true) => F::R8G8_SRGB,
        (ChannelTy::U8, Channels::Rgb, false) => F::R8G8B8_UNORM,
        (ChannelTy::U8, Channels::Rgb, true) => F::R8G8B8_SRGB,
        (ChannelTy::U8, Channels::Rgba, false) => F::R8G8B8A8_UNORM,
        (ChannelTy::U8, Channels::Rgba, true) => F::R8G8B8A8_SRGB,
        (ChannelTy::U16, Channels::R, _) => F::R16_UNORM,
        (ChannelTy::U16, Channels::Rg, _) => F::R16G16_UNORM,
        (ChannelTy::U16, Channels::Rgb, _) => F::R16G16B16_UNORM,
        (ChannelTy::U16, Channels::Rgba, _) => F::R16G16B16A16_UNORM,
        (ChannelTy::F32, Channels::R, _) => F::R32_SFLOAT,
        (ChannelTy::F32, Channels::Rg, _) => F::R32G32_SFLOAT,
        (ChannelTy::F32, Channels::Rgb, _) => F::R32G32B32_SFLOAT,
        (ChannelTy::F32, Channels::Rgba, _) => F::R32G32B32A32_SFLOAT,
    }
}

/// Tightly packed pixel rows
#[derive(Debug, Clone, PartialEq)]
pub struct PixelData {
    width: u32,
    height: u32,
    channels: Channels,
    channel_ty: ChannelTy,
    bytes: Vec<u8>,
}

impl PixelData {
    /// Wrap `bytes`, which must hold exactly `width * height` pixels
    #[track_caller]
    pub fn new(
        width: u32,
        height: u32,
        channels: Channels,
        channel_ty: ChannelTy,
        bytes: Vec<u8>,
    ) -> VulkanResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(channels.count() * channel_ty.size()));
        match expected {
            Some(expected) if expected == bytes.len() && expected > 0 => Ok(Self {
                width,
                height,
                channels,
                channel_ty,
                bytes,
            }),
            _ => Err(VulkanError::precondition(format!(
                "{width}x{height} {channels:?}/{channel_ty:?} pixels do not match {} bytes",
                bytes.len()
            ))),
        }
    }

    /// Square RGBA8 checkerboard of `size` pixels with `cell`-pixel squares
    pub fn checkerboard(size: u32, cell: u32, dark: [u8; 4], light: [u8; 4]) -> VulkanResult<Self> {
        let cell = cell.max(1);
        let mut bytes = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let texel = if ((x / cell) + (y / cell)) % 2 == 0 { dark } else { light };
                bytes.extend_from_slice(&texel);
            }
        }
        Self::new(size, size, Channels::Rgba, ChannelTy::U8, bytes)
    }

    /// Decode a PNG, widening it to four channels of its native depth
    pub fn load_png(path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| image_error(path, e))?;
        let (width, height) = (image.width(), image.height());
        let color = image.color();
        let bytes_per_channel = usize::from(color.bytes_per_pixel() / color.channel_count());

        let pixels = match bytes_per_channel {
            1 => Self::new(width, height, Channels::Rgba, ChannelTy::U8, image.into_rgba8().into_raw()),
            2 => {
                let raw = image.into_rgba16().into_raw();
                Self::new(width, height, Channels::Rgba, ChannelTy::U16, bytemuck::cast_slice(raw.as_slice()).to_vec())
            }
            _ => {
                let raw = image.into_rgba32f().into_raw();
                Self::new(width, height, Channels::Rgba, ChannelTy::F32, bytemuck::cast_slice(raw.as_slice()).to_vec())
            }
        }?;

        log::debug!("Loaded {path:?}: {width}x{height} {color:?}");
        Ok(pixels)
    }

    /// Encode as PNG; only 8- and 16-bit channels can be written
    pub fn save_png(&self, path: impl AsRef<Path>) -> VulkanResult<()> {
        use image::ColorType as C;
        let path = path.as_ref();
        let color = match (self.channel_ty, self.channels) {
            (ChannelTy::U8, Channels::R) => C::L8,
            (ChannelTy::U8, Channels::Rg) => C::La8,
            (ChannelTy::U8, Channels::Rgb) => C::Rgb8,
            (ChannelTy::U8, Channels::Rgba) => C::Rgba8,
            (ChannelTy::U16, Channels::R) => C::L16,
            (ChannelTy::U16, Channels::Rg) => C::La16,
            (ChannelTy::U16, Channels::Rgb) => C::Rgb16,
            (ChannelTy::U16, Channels::Rgba) => C::Rgba16,
            (ChannelTy::F32, _) => {
                return Err(VulkanError::precondition("PNG cannot store 32-bit float channels"));
            }
        };
        image::save_buffer(path, &self.bytes, self.width, self.height, color).map_err(|e| image_error(path, e))
    }

    /// Vulkan format matching this payload
    pub fn format(&self, srgb: bool) -> vk::Format {
        vk_format(self.channels, self.channel_ty, srgb)
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Channel layout
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Channel storage type
    pub fn channel_ty(&self) -> ChannelTy {
        self.channel_ty
    }

    /// Raw bytes, rows tightly packed
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[track_caller]
fn image_error(path: &Path, error: image::ImageError) -> VulkanError {
    let source = match error {
        image::ImageError::IoError(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
    };
    VulkanError::new(ErrorKind::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_byte_count() {
        assert!(PixelData::new(2, 2, Channels::Rgba, ChannelTy::U8, vec![0; 16]).is_ok());
        assert!(PixelData::new(2, 2, Channels::Rgba, ChannelTy::U8, vec![0; 15]).is_err());
        assert!(PixelData::new(2, 1, Channels::Rg, ChannelTy::U16, vec![0; 8]).is_ok());
        assert!(PixelData::new(0, 4, Channels::R, ChannelTy::U8, vec![]).is_err());
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(vk_format(Channels::Rgba, ChannelTy::U8, true), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(vk_format(Channels::Rgba, ChannelTy::U8, false), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(vk_format(Channels::R, ChannelTy::U16, true), vk::Format::R16_UNORM);
        assert_eq!(vk_format(Channels::Rg, ChannelTy::F32, false), vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_checkerboard_alternates_cells() {
        let dark = [0, 0, 0, 255];
        let light = [255, 255, 255, 255];
        let pixels = PixelData::checkerboard(4, 2, dark, light).unwrap();
        let texel = |x: usize, y: usize| &pixels.bytes()[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];

        assert_eq!(texel(0, 0), dark);
        assert_eq!(texel(1, 1), dark);
        assert_eq!(texel(2, 0), light);
        assert_eq!(texel(0, 2), light);
        assert_eq!(texel(3, 3), dark);
    }

    #[test]
    fn test_png_save_and_load() {
        let path = std::env::temp_dir().join(format!("gpu_core_pixels_{}.png", std::process::id()));
        let pixels = PixelData::checkerboard(8, 4, [10, 20, 30, 255], [200, 100, 50, 255]).unwrap();

        pixels.save_png(&path).unwrap();
        let loaded = PixelData::load_png(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, pixels);
    }

    #[test]
    fn test_float_pixels_cannot_be_saved() {
        let pixels = PixelData::new(1, 1, Channels::R, ChannelTy::F32, vec![0; 4]).unwrap();
        let error = pixels.save_png("unused.png").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Precondition(_)));
    }

    #[test]
    fn test_missing_png_is_io_error() {
        let error = PixelData::load_png("/definitely/not/here.png").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Io { .. }));
    }
}
