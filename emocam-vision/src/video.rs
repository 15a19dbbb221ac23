use anyhow::{Context, Result};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::source::FrameSource;

/// V4L2 capture device delivering RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {device}"))?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let fourcc = fmt.fourcc;
        let width = fmt.width;
        let height = fmt.height;
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            width,
            height,
            fourcc
        );
        Ok(Self {
            stream,
            width,
            height,
            fourcc,
        })
    }

    fn capture(&mut self) -> Result<Frame, PipelineError> {
        let (data, meta) = self
            .stream
            .next()
            .map_err(|e| PipelineError::Acquisition(format!("capture frame: {e}")))?;
        log::trace!(
            "captured frame: seq={} len={}",
            meta.sequence,
            data.len()
        );
        let mut buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => {
                return Err(PipelineError::Acquisition(format!(
                    "unsupported pixel format {other:?}"
                )))
            }
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            return Err(PipelineError::Acquisition(format!(
                "buffer too small: got {}, expected {} ({:?})",
                buf.len(),
                expected,
                self.fourcc
            )));
        }
        buf.truncate(expected);
        Frame::from_raw(buf, self.width, self.height, 3)
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        self.capture().map(Some)
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(PipelineError::Acquisition("short YUYV buffer".into()));
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;
        for y in [y0, y1] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return Err(PipelineError::Acquisition("short GREY buffer".into()));
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
