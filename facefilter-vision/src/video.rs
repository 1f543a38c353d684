use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

/// V4L2 capture device delivering RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device)
            .with_context(|| format!("opening camera {}", device))?;
        let current = dev.format().context("querying camera format")?;

        // RGB3 if the driver offers it, YUYV otherwise, else whatever it has
        let mut fmt = current.clone();
        for fourcc in [RGB3, YUYV] {
            let wanted = Format::new(current.width, current.height, FourCC::new(fourcc));
            if let Ok(set) = dev.set_format(&wanted) {
                fmt = set;
                if set.fourcc == FourCC::new(fourcc) {
                    break;
                }
            }
        }
        if ![RGB3, YUYV, GREY].iter().any(|f| fmt.fourcc == FourCC::new(f)) {
            anyhow::bail!("camera {} offers unsupported format {:?}", device, fmt.fourcc);
        }

        log::info!(
            "camera {}: {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
            .context("starting capture stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Block for the next frame; returns the driver sequence number with it.
    pub fn capture(&mut self) -> Result<(u32, RgbImage)> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        let rgb = to_rgb(self.fourcc, self.width, self.height, data)?;
        let image = RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow::anyhow!("frame buffer does not match {}x{}", self.width, self.height))?;
        Ok((meta.sequence, image))
    }
}

fn to_rgb(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let pixels = (width * height) as usize;
    if fourcc == FourCC::new(RGB3) {
        if data.len() < pixels * 3 {
            anyhow::bail!("short RGB3 buffer: {} < {}", data.len(), pixels * 3);
        }
        Ok(data[..pixels * 3].to_vec())
    } else if fourcc == FourCC::new(YUYV) {
        yuyv_to_rgb(pixels, data)
    } else {
        if data.len() < pixels {
            anyhow::bail!("short GREY buffer: {} < {}", data.len(), pixels);
        }
        Ok(data[..pixels].iter().flat_map(|&y| [y, y, y]).collect())
    }
}

fn yuyv_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < pixels * 2 {
        anyhow::bail!("short YUYV buffer: {} < {}", data.len(), pixels * 2);
    }
    let mut out = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_grey_stays_grey() {
        let rgb = yuyv_to_rgb(2, &[100, 128, 200, 128]).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(to_rgb(FourCC::new(YUYV), 4, 4, &[0; 8]).is_err());
        assert!(to_rgb(FourCC::new(RGB3), 2, 2, &[0; 11]).is_err());
        assert_eq!(to_rgb(FourCC::new(GREY), 1, 2, &[7, 9]).unwrap(), vec![7, 7, 7, 9, 9, 9]);
    }
}
