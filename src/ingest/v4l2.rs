//! V4L2 camera backend.
//!
//! Opens `/dev/video{index}` and streams frames through mmap buffers. RGB3 is
//! requested first; devices that only offer MJPEG are decoded per frame.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::{CaptureBackend, CaptureDevice, CaptureSettings};
use crate::codec::decode_image_bytes;

#[derive(Clone, Debug, Default)]
pub struct V4l2Backend;

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&self, index: u32, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>> {
        let camera = V4l2Camera::open(format!("/dev/video{}", index), settings)?;
        Ok(Box::new(camera))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb3,
    Mjpeg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: &v4l::FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb3),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

pub struct V4l2Camera {
    path: String,
    state: V4l2State,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    fn open(path: String, settings: &CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;

        let mut negotiated = None;
        for fourcc in [b"RGB3", b"MJPG"] {
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(actual) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&actual.fourcc) {
                        negotiated = Some((actual, pixel_format));
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("v4l2: {} rejected format {:?}: {}", path, format.fourcc, err);
                }
            }
        }
        let (format, pixel_format) = negotiated
            .ok_or_else(|| anyhow!("{} offers neither RGB3 nor MJPEG frames", path))?;

        if settings.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "v4l2: opened {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            path,
            state,
            pixel_format,
            width: format.width,
            height: format.height,
        })
    }
}

impl CaptureDevice for V4l2Camera {
    fn read_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let path = &self.path;
        self.state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .with_context(|| format!("capture v4l2 frame from {}", path))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let bytes = if used == 0 { buf } else { &buf[..used] };
            match pixel_format {
                PixelFormat::Rgb3 => {
                    let expected = (width as usize) * (height as usize) * 3;
                    if bytes.len() < expected {
                        return Err(anyhow!(
                            "short RGB3 frame from {}: {} of {} bytes",
                            path,
                            bytes.len(),
                            expected
                        ));
                    }
                    RgbImage::from_raw(width, height, bytes[..expected].to_vec())
                        .ok_or_else(|| anyhow!("RGB3 buffer does not fit {}x{}", width, height))
                }
                PixelFormat::Mjpeg => {
                    decode_image_bytes(bytes).with_context(|| format!("decode MJPEG frame from {}", path))
                }
            }
        })
    }

    fn describe(&self) -> String {
        format!("{} ({}x{})", self.path, self.width, self.height)
    }
}
