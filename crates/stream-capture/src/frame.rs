//! Video frame types and processing

use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Gray8 => "gray",
        }
    }
}

/// Decoded video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Packed pixel data (width * height * bytes_per_pixel)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Pixel layout of `data`
    pub format: PixelFormat,
    /// Capture timestamp (nanoseconds since the session started)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new RGB video frame from raw data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgb24,
            timestamp_ns,
            sequence,
        }
    }

    /// Solid-colour RGB frame, mostly useful for tests and placeholders
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, 0, 0)
    }

    /// Expected buffer length for the frame geometry
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Whether the buffer matches the declared geometry
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_len()
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let idx = (y as usize * self.width as usize + x as usize) * bpp;
        self.data.get(idx..idx + bpp)
    }

    /// Resize frame (nearest neighbour)
    pub fn resize(&self, new_width: u32, new_height: u32) -> VideoFrame {
        let bpp = self.format.bytes_per_pixel();
        let mut resized = Vec::with_capacity(new_width as usize * new_height as usize * bpp);

        let x_ratio = self.width as f32 / new_width.max(1) as f32;
        let y_ratio = self.height as f32 / new_height.max(1) as f32;

        for y in 0..new_height {
            for x in 0..new_width {
                let x0 = ((x as f32 * x_ratio).floor() as u32).min(self.width.saturating_sub(1));
                let y0 = ((y as f32 * y_ratio).floor() as u32).min(self.height.saturating_sub(1));

                match self.get_pixel(x0, y0) {
                    Some(pixel) => resized.extend_from_slice(pixel),
                    None => resized.extend(std::iter::repeat(0).take(bpp)),
                }
            }
        }

        VideoFrame {
            data: resized,
            width: new_width,
            height: new_height,
            format: self.format,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        }
    }

    /// Copy into an RGB image, converting from the frame's pixel format
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if !self.is_well_formed() {
            return None;
        }
        let data = match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Bgr24 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };
        RgbImage::from_raw(self.width, self.height, data)
    }

    /// RGB frame from an image, keeping this frame's timing
    pub fn with_rgb_image(&self, image: RgbImage) -> VideoFrame {
        let (width, height) = image.dimensions();
        VideoFrame {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb24,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        }
    }
}

/// Decode an MJPEG/JPEG buffer into an RGB frame
pub fn decode_jpeg(jpeg: &[u8]) -> Result<VideoFrame, image::ImageError> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8();
    let (width, height) = img.dimensions();
    Ok(VideoFrame::new(img.into_raw(), width, height, 0, 0))
}
