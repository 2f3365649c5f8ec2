//! The light array as seen by the show: something that accepts colours and
//! makes them visible on `flush`.

pub mod ambient;
pub mod stream;

use serde::Deserialize;

use crate::error::Result;
use crate::note::Rgb;

use ambient::BrightnessHook;

/// Byte order a strip expects on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    Rgb,
    /// WS281x / NeoPixel strips
    #[default]
    Grb,
}

impl ColorOrder {
    pub fn bytes(self, color: Rgb) -> [u8; 3] {
        match self {
            ColorOrder::Rgb => [color.r, color.g, color.b],
            ColorOrder::Grb => [color.g, color.r, color.b],
        }
    }
}

/// A physical or virtual strip of addressable pixels.
pub trait OutputDevice: Send {
    fn len(&self) -> usize;

    /// Stage `color` for pixel `index`. Out-of-range indices are ignored.
    fn set_pixel(&mut self, index: usize, color: Rgb);

    fn set_all(&mut self, color: Rgb) {
        for i in 0..self.len() {
            self.set_pixel(i, color);
        }
    }

    /// Global brightness applied on the next flush (255 = unscaled).
    fn set_brightness(&mut self, _level: u8) {}

    /// Make the staged pixels visible.
    fn flush(&mut self) -> Result<()>;
}

/// A device plus the optional brightness hook consulted before every flush.
pub struct Output {
    device: Box<dyn OutputDevice>,
    hook: Option<Box<dyn BrightnessHook>>,
}

impl Output {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self { device, hook: None }
    }

    pub fn with_hook(mut self, hook: Box<dyn BrightnessHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Cap the strip at a fixed global brightness. 255 leaves it unscaled.
    pub fn dimmed(self, level: u8) -> Self {
        if level == u8::MAX {
            return self;
        }
        self.with_hook(Box::new(move || level))
    }

    pub fn set_all(&mut self, color: Rgb) {
        self.device.set_all(color);
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(hook) = self.hook.as_mut() {
            let level = hook.brightness();
            self.device.set_brightness(level);
        }
        self.device.flush()
    }

    /// Paint every pixel `color` and flush, as one write.
    pub fn show(&mut self, color: Rgb) -> Result<()> {
        self.set_all(color);
        self.flush()
    }
}

/// A device that only logs what it would display. Used for dry runs.
pub struct LogDevice {
    pixels: Vec<Rgb>,
    brightness: u8,
    last_shown: Option<Rgb>,
    flushes: u64,
}

impl LogDevice {
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![Rgb::BLACK; len],
            brightness: 255,
            last_shown: None,
            flushes: 0,
        }
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }
}

impl OutputDevice for LogDevice {
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
        self.flushes += 1;
        let first = self.pixels.first().copied().unwrap_or_default();
        let shown = first.scaled(self.brightness as f32 / 255.0);
        if self.last_shown != Some(shown) {
            log::debug!(
                "flush #{}: ({:3}, {:3}, {:3}) x{}",
                self.flushes,
                shown.r,
                shown.g,
                shown.b,
                self.pixels.len()
            );
            self.last_shown = Some(shown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Spy {
        pixels: Vec<Rgb>,
        brightness: Arc<Mutex<Vec<u8>>>,
    }

    impl OutputDevice for Spy {
        fn len(&self) -> usize {
            self.pixels.len()
        }
        fn set_pixel(&mut self, index: usize, color: Rgb) {
            if let Some(px) = self.pixels.get_mut(index) {
                *px = color;
            }
        }
        fn set_brightness(&mut self, level: u8) {
            self.brightness.lock().unwrap().push(level);
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn grb_swaps_red_and_green() {
        let c = Rgb::new(1, 2, 3);
        assert_eq!(ColorOrder::Grb.bytes(c), [2, 1, 3]);
        assert_eq!(ColorOrder::Rgb.bytes(c), [1, 2, 3]);
    }

    #[test]
    fn hook_runs_before_every_flush() {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let spy = Spy {
            pixels: vec![Rgb::BLACK; 4],
            brightness: levels.clone(),
        };
        let mut calls = 0u8;
        let mut out = Output::new(Box::new(spy)).with_hook(Box::new(move || {
            calls += 1;
            calls * 10
        }));
        out.show(Rgb::new(255, 0, 0)).unwrap();
        out.show(Rgb::new(0, 255, 0)).unwrap();
        assert_eq!(*levels.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn no_hook_leaves_brightness_alone() {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let spy = Spy {
            pixels: vec![Rgb::BLACK; 2],
            brightness: levels.clone(),
        };
        let mut out = Output::new(Box::new(spy));
        out.show(Rgb::new(9, 9, 9)).unwrap();
        assert!(levels.lock().unwrap().is_empty());
    }

    #[test]
    fn dimmed_output_caps_brightness() {
        let spy = Arc::new(Mutex::new(Vec::new()));
        let mut out = Output::new(Box::new(Spy {
            pixels: vec![Rgb::BLACK; 2],
            brightness: spy.clone(),
        }))
        .dimmed(128);
        out.show(Rgb::new(200, 0, 0)).unwrap();
        out.show(Rgb::BLACK).unwrap();
        assert_eq!(*spy.lock().unwrap(), vec![128, 128]);

        let full = Arc::new(Mutex::new(Vec::new()));
        let mut out = Output::new(Box::new(Spy {
            pixels: vec![Rgb::BLACK; 2],
            brightness: full.clone(),
        }))
        .dimmed(255);
        out.show(Rgb::new(200, 0, 0)).unwrap();
        assert!(full.lock().unwrap().is_empty());
    }

    #[test]
    fn set_all_reaches_every_pixel() {
        let mut dev = LogDevice::new(5);
        dev.set_all(Rgb::new(10, 20, 30));
        dev.set_pixel(99, Rgb::BLACK);
        assert!(dev.pixels().iter().all(|&p| p == Rgb::new(10, 20, 30)));
        dev.flush().unwrap();
    }
}
