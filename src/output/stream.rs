use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::note::Rgb;

use super::{ColorOrder, OutputDevice};

/// Writes each flushed frame as raw pixel bytes (`len * 3`, in the strip's
/// colour order) to a file, FIFO or serial device.
pub struct StreamDevice<W: Write + Send> {
    sink: W,
    pixels: Vec<Rgb>,
    order: ColorOrder,
    brightness: u8,
    frame: Vec<u8>,
}

impl StreamDevice<std::fs::File> {
    /// Open `path` for writing, creating it when it is a regular file.
    pub fn open(path: &Path, len: usize, order: ColorOrder) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        log::info!("Streaming {} pixels ({:?}) to {}", len, order, path.display());
        Ok(Self::new(file, len, order))
    }
}

impl<W: Write + Send> StreamDevice<W> {
    pub fn new(sink: W, len: usize, order: ColorOrder) -> Self {
        Self {
            sink,
            pixels: vec![Rgb::BLACK; len],
            order,
            brightness: 255,
            frame: Vec::with_capacity(len * 3),
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write + Send> OutputDevice for StreamDevice<W> {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(px) = self.pixels.get_mut(index) {
            *px = color;
        }
    }

    fn set_brightness(&mut self, level: u8) {
        self.brightness = level;
    }

    fn flush(&mut self) -> Result<()> {
        let factor = self.brightness as f32 / 255.0;
        self.frame.clear();
        for px in &self.pixels {
            let shown = if self.brightness == 255 { *px } else { px.scaled(factor) };
            self.frame.extend_from_slice(&self.order.bytes(shown));
        }
        self.sink
            .write_all(&self.frame)
            .and_then(|()| self.sink.flush())
            .map_err(|e| Error::DeviceWrite(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_one_frame_per_flush_in_strip_order() {
        let mut dev = StreamDevice::new(Vec::new(), 2, ColorOrder::Grb);
        dev.set_all(Rgb::new(10, 20, 30));
        dev.flush().unwrap();
        dev.set_pixel(1, Rgb::BLACK);
        dev.flush().unwrap();
        assert_eq!(
            dev.into_inner(),
            vec![20, 10, 30, 20, 10, 30, 20, 10, 30, 0, 0, 0]
        );
    }

    #[test]
    fn brightness_scales_written_bytes() {
        let mut dev = StreamDevice::new(Vec::new(), 1, ColorOrder::Rgb);
        dev.set_all(Rgb::new(200, 100, 0));
        dev.set_brightness(128);
        dev.flush().unwrap();
        assert_eq!(dev.into_inner(), vec![100, 50, 0]);
    }

    #[test]
    fn write_failures_surface_as_device_errors() {
        let mut dev = StreamDevice::new(Broken, 3, ColorOrder::Rgb);
        dev.set_all(Rgb::new(1, 1, 1));
        assert!(matches!(dev.flush(), Err(Error::DeviceWrite(_))));
    }
}
