//! Frame to model-input conversion.
//!
//! Fixed pipeline: resize to the square model input, order channels, scale to
//! [0, 1], prepend a batch axis of 1.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, H, W, 3]` (Keras exports).
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`.
    Nchw,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// What the backend expects as input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub size: u32,
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
}

impl InputSpec {
    pub fn shape(&self) -> [usize; 4] {
        let side = self.size as usize;
        match self.layout {
            TensorLayout::Nhwc => [1, side, side, 3],
            TensorLayout::Nchw => [1, 3, side, side],
        }
    }
}

/// Dense f32 input tensor with batch axis.
#[derive(Clone, Debug)]
pub struct InputTensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

pub fn preprocess(frame: &RgbImage, spec: &InputSpec) -> Result<InputTensor> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!("cannot preprocess an empty frame"));
    }
    if spec.size == 0 {
        return Err(anyhow!("model input size must be > 0"));
    }

    let side = spec.size;
    let resized = if frame.dimensions() == (side, side) {
        frame.clone()
    } else {
        image::imageops::resize(frame, side, side, FilterType::Triangle)
    };

    let channel_map: [usize; 3] = match spec.channel_order {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    };

    let side = side as usize;
    let mut data = vec![0f32; side * side * 3];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (channel, &source) in channel_map.iter().enumerate() {
            let value = pixel.0[source] as f32 / 255.0;
            let idx = match spec.layout {
                TensorLayout::Nhwc => (y * side + x) * 3 + channel,
                TensorLayout::Nchw => channel * side * side + y * side + x,
            };
            data[idx] = value;
        }
    }

    Ok(InputTensor {
        shape: spec.shape(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn spec(layout: TensorLayout, channel_order: ChannelOrder) -> InputSpec {
        InputSpec {
            size: 4,
            layout,
            channel_order,
        }
    }

    #[test]
    fn nhwc_rgb_scales_and_resizes() -> Result<()> {
        let frame = RgbImage::from_pixel(16, 9, Rgb([255, 0, 51]));
        let tensor = preprocess(&frame, &spec(TensorLayout::Nhwc, ChannelOrder::Rgb))?;
        assert_eq!(tensor.shape, [1, 4, 4, 3]);
        assert_eq!(tensor.data.len(), 48);
        assert!((tensor.data[0] - 1.0).abs() < 0.01);
        assert!(tensor.data[1].abs() < 0.01);
        assert!((tensor.data[2] - 0.2).abs() < 0.01);
        assert!(tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));
        Ok(())
    }

    #[test]
    fn nchw_bgr_puts_blue_plane_first() -> Result<()> {
        let frame = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        let tensor = preprocess(&frame, &spec(TensorLayout::Nchw, ChannelOrder::Bgr))?;
        assert_eq!(tensor.shape, [1, 3, 4, 4]);
        // Plane 0 is blue (zero), plane 2 is red (one).
        assert!(tensor.data[..16].iter().all(|v| v.abs() < 1e-6));
        assert!(tensor.data[32..].iter().all(|v| (v - 1.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = RgbImage::new(0, 0);
        assert!(preprocess(&frame, &spec(TensorLayout::Nhwc, ChannelOrder::Rgb)).is_err());
    }
}
