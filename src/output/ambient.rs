//! Brightness compensation for the room the lights are in.

pub const MIN_BRIGHTNESS: u8 = 10;
pub const MAX_BRIGHTNESS: u8 = 255;
pub const LUX_MIN: f32 = 0.0;
pub const LUX_MAX: f32 = 1000.0;

/// Supplies a global brightness level just before each flush.
pub trait BrightnessHook: Send {
    fn brightness(&mut self) -> u8;
}

impl<F> BrightnessHook for F
where
    F: FnMut() -> u8 + Send,
{
    fn brightness(&mut self) -> u8 {
        self()
    }
}

/// An ambient light sensor. `None` means the read failed.
pub trait LuxSensor: Send {
    fn read_lux(&mut self) -> Option<f32>;
}

/// Brighter rooms get dimmer lights: lux in `[LUX_MIN, LUX_MAX]` maps
/// linearly onto `[MAX_BRIGHTNESS, MIN_BRIGHTNESS]`. A failed read yields
/// full brightness.
pub fn lux_to_brightness(lux: Option<f32>) -> u8 {
    let Some(lux) = lux.filter(|l| l.is_finite()) else {
        return MAX_BRIGHTNESS;
    };
    let norm = (lux.clamp(LUX_MIN, LUX_MAX) - LUX_MIN) / (LUX_MAX - LUX_MIN);
    let span = (MAX_BRIGHTNESS - MIN_BRIGHTNESS) as f32;
    (MAX_BRIGHTNESS as f32 - norm * span) as u8
}

pub struct LuxCompensation<S> {
    sensor: S,
}

impl<S: LuxSensor> LuxCompensation<S> {
    pub fn new(sensor: S) -> Self {
        Self { sensor }
    }
}

impl<S: LuxSensor> BrightnessHook for LuxCompensation<S> {
    fn brightness(&mut self) -> u8 {
        let lux = self.sensor.read_lux();
        let level = lux_to_brightness(lux);
        log::trace!("ambient lux {:?} -> brightness {}", lux, level);
        level
    }
}
