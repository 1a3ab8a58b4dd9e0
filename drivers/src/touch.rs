//! XPT2046 resistive touch sampling
//!
//! Every conversion is one three byte full-duplex exchange on the shared bus
//! with the touch chip select asserted. A position is the mean of several raw
//! readings that fall inside the calibration window, rescaled to pixels and
//! remapped for the current rotation.
//!
//! The controller must be clocked at 2 MHz or less. The caller lowers the bus
//! clock around a sampling burst (see [`crate::bus::SpiTransport::bus_mut`]).

use embedded_graphics_core::geometry::Point;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::bus::{Device, Interface};
use crate::orientation::{DisplayGeometry, Rotation};
use crate::Error;

/// Start of a control byte
pub const START: u8 = 0b1000_0000;

/// Conversion mode flag, set for 8-bit conversions
pub const MODE_8BIT: u8 = 0b0000_1000;

/// Input channel select bits of the control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Temperature 0
    T0 = 0b0000_0000,
    Y = 0b0001_0000,
    /// Battery voltage
    Bat = 0b0010_0000,
    /// Pressure 1
    Z1 = 0b0011_0000,
    /// Pressure 2
    Z2 = 0b0100_0000,
    X = 0b0101_0000,
    /// Auxiliary input
    Aux = 0b0110_0000,
    /// Temperature 1
    T1 = 0b0111_0000,
}

/// ADC conversion width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcResolution {
    Bits8 = 8,
    #[default]
    Bits12 = 12,
}

impl AdcResolution {
    const fn mode_flag(self) -> u8 {
        match self {
            AdcResolution::Bits8 => MODE_8BIT,
            AdcResolution::Bits12 => 0,
        }
    }

    fn decode(self, rx: &[u8; 3]) -> u16 {
        match self {
            AdcResolution::Bits8 => u16::from(rx[1]),
            AdcResolution::Bits12 => (u16::from(rx[1]) << 4) | (u16::from(rx[2]) >> 4),
        }
    }
}

/// Raw reading window per axis, bounds inclusive
///
/// Readings outside the window mean "not touched".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchCalibration {
    x_min: u16,
    x_max: u16,
    y_min: u16,
    y_max: u16,
}

impl TouchCalibration {
    /// # Panics
    ///
    /// If either range is empty or a single value.
    pub const fn new(x_min: u16, x_max: u16, y_min: u16, y_max: u16) -> Self {
        assert!(x_min < x_max, "x calibration range is empty");
        assert!(y_min < y_max, "y calibration range is empty");
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Raw X window as `(min, max)`
    pub const fn x_range(&self) -> (u16, u16) {
        (self.x_min, self.x_max)
    }

    /// Raw Y window as `(min, max)`
    pub const fn y_range(&self) -> (u16, u16) {
        (self.y_min, self.y_max)
    }

    pub const fn contains_x(&self, raw: u16) -> bool {
        self.x_min <= raw && raw <= self.x_max
    }

    pub const fn contains_y(&self, raw: u16) -> bool {
        self.y_min <= raw && raw <= self.y_max
    }
}

impl Default for TouchCalibration {
    /// MSP2807 at 12 bits
    fn default() -> Self {
        Self::new(100, 1900, 200, 1950)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchConfig {
    pub calibration: TouchCalibration,
    pub resolution: AdcResolution,
}

/// How many readings make up one position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamplingConfig {
    /// Valid readings to average
    pub samples: u16,
    /// Upper bound on raw readings taken
    pub attempts: u16,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            attempts: 20,
        }
    }
}

/// Raw ADC reading of both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchSample {
    pub x: u16,
    pub y: u16,
}

/// Pointer state handed to an input layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchState {
    #[default]
    Released,
    Pressed(Point),
}

impl From<Option<Point>> for TouchState {
    fn from(position: Option<Point>) -> Self {
        match position {
            Some(point) => TouchState::Pressed(point),
            None => TouchState::Released,
        }
    }
}

/// XPT2046 touch controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xpt2046 {
    config: TouchConfig,
    width: u16,
    height: u16,
    rotation: Rotation,
}

impl Xpt2046 {
    /// `width` and `height` are the screen dimensions at rotation 0
    pub fn new(config: TouchConfig, width: u16, height: u16, rotation: Rotation) -> Self {
        Self {
            config,
            width,
            height,
            rotation,
        }
    }

    /// Sampler matching the screen `geometry`
    pub fn for_geometry(config: TouchConfig, geometry: &DisplayGeometry) -> Self {
        Self::new(
            config,
            geometry.native_width,
            geometry.native_height,
            geometry.rotation,
        )
    }

    pub fn config(&self) -> &TouchConfig {
        &self.config
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    /// One conversion on `channel`
    pub fn read_channel<I: Interface>(&self, bus: &mut I, channel: Channel) -> Result<u16, Error> {
        let resolution = self.config.resolution;
        let tx = [START | resolution.mode_flag() | u8::from(channel), 0, 0];
        let mut rx = [0u8; 3];
        bus.write_then_read(Device::Touch, &tx, &mut rx)?;
        Ok(resolution.decode(&rx))
    }

    /// X then Y; `None` as soon as an axis reads outside its window
    pub fn read_raw<I: Interface>(&self, bus: &mut I) -> Result<Option<TouchSample>, Error> {
        let calibration = &self.config.calibration;
        let x = self.read_channel(bus, Channel::X)?;
        if !calibration.contains_x(x) {
            return Ok(None);
        }
        let y = self.read_channel(bus, Channel::Y)?;
        if !calibration.contains_y(y) {
            return Ok(None);
        }
        Ok(Some(TouchSample { x, y }))
    }

    /// Touch position with the default sampling parameters
    pub fn read_position<I: Interface>(&self, bus: &mut I) -> Result<Option<Point>, Error> {
        self.read_position_with(bus, &SamplingConfig::default())
    }

    /// Averaged touch position in rotated pixel coordinates
    ///
    /// Takes at most `sampling.attempts` raw readings and stops as soon as
    /// `sampling.samples` of them were valid. `None` when not enough valid
    /// readings were collected.
    pub fn read_position_with<I: Interface>(
        &self,
        bus: &mut I,
        sampling: &SamplingConfig,
    ) -> Result<Option<Point>, Error> {
        let samples = u32::from(sampling.samples);
        if samples == 0 {
            return Ok(None);
        }

        let mut valid = 0u32;
        let mut sum_x = 0u32;
        let mut sum_y = 0u32;
        for _ in 0..sampling.attempts {
            if let Some(sample) = self.read_raw(bus)? {
                sum_x += u32::from(sample.x);
                sum_y += u32::from(sample.y);
                valid += 1;
                if valid == samples {
                    break;
                }
            }
        }

        if valid < samples {
            #[cfg(feature = "defmt")]
            defmt::trace!("Touch: {} of {} valid readings", valid, samples);
            #[cfg(feature = "log-04")]
            log::trace!("Touch: {} of {} valid readings", valid, samples);
            return Ok(None);
        }

        let calibration = &self.config.calibration;
        let x = rescale(sum_x, samples, calibration.x_min, calibration.x_max, self.width);
        let y = rescale(sum_y, samples, calibration.y_min, calibration.y_max, self.height);
        let (px, py) = self.rotation.remap_touch(x, y, self.width, self.height);
        Ok(Some(Point::new(i32::from(px), i32::from(py))))
    }
}

/// `dim * (sum / n - min) / (max - min)`, truncated, without intermediate rounding
fn rescale(sum: u32, n: u32, min: u16, max: u16, dim: u16) -> u16 {
    let offset = u64::from(sum) - u64::from(n) * u64::from(min);
    let span = u64::from(n) * u64::from(max - min);
    let pixel = u64::from(dim) * offset / span;
    // the mean lies inside the window, so the result is at most `dim`
    pixel.min(u64::from(dim)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, Line, Op};
    use alloc::vec;

    const X12: u8 = 0xD0;
    const Y12: u8 = 0x90;

    fn sampler(rotation: Rotation) -> Xpt2046 {
        Xpt2046::new(TouchConfig::default(), 240, 320, rotation)
    }

    fn constant(x: u16, y: u16) -> impl FnMut(u8) -> u16 {
        move |command| if command & 0x70 == 0x50 { x } else { y }
    }

    #[test]
    fn test_read_channel_12bit() {
        let (mut bus, log) = mock::transport();
        log.set_touch(|_| 0x0ABC);
        log.clear();
        let value = sampler(Rotation::Portrait)
            .read_channel(&mut bus, Channel::X)
            .unwrap();
        assert_eq!(value, 0x0ABC);
        assert_eq!(
            log.ops(),
            vec![
                Op::Set(Line::TouchCs, false),
                Op::Transfer(vec![X12, 0, 0]),
                Op::Flush,
                Op::Set(Line::TouchCs, true),
            ]
        );
    }

    #[test]
    fn test_read_channel_8bit() {
        let (mut bus, log) = mock::transport();
        log.set_touch(|_| 0xAB);
        let config = TouchConfig {
            calibration: TouchCalibration::new(6, 118, 12, 121),
            resolution: AdcResolution::Bits8,
        };
        let touch = Xpt2046::new(config, 240, 320, Rotation::Portrait);
        assert_eq!(touch.read_channel(&mut bus, Channel::Y).unwrap(), 0xAB);
        assert_eq!(log.touch_reads(0x98), 1);
        assert_eq!(touch.read_channel(&mut bus, Channel::Z1).unwrap(), 0xAB);
        assert_eq!(log.touch_reads(0xB8), 1);
    }

    #[test]
    fn test_read_raw_stops_after_invalid_x() {
        let (mut bus, log) = mock::transport();
        log.set_touch(constant(50, 1000));
        let touch = sampler(Rotation::Portrait);
        assert_eq!(touch.read_raw(&mut bus), Ok(None));
        assert_eq!(log.touch_reads(X12), 1);
        assert_eq!(log.touch_reads(Y12), 0);
    }

    #[test]
    fn test_read_raw_rejects_invalid_y() {
        let (mut bus, log) = mock::transport();
        log.set_touch(constant(1000, 1951));
        let touch = sampler(Rotation::Portrait);
        assert_eq!(touch.read_raw(&mut bus), Ok(None));
        assert_eq!(log.touch_reads(Y12), 1);

        log.set_touch(constant(1900, 1950));
        assert_eq!(
            touch.read_raw(&mut bus),
            Ok(Some(TouchSample { x: 1900, y: 1950 }))
        );
    }

    #[test]
    fn test_untouched_panel_exhausts_attempts() {
        let (mut bus, log) = mock::transport();
        log.set_touch(|_| 0);
        let touch = sampler(Rotation::Portrait);
        assert_eq!(touch.read_position(&mut bus), Ok(None));
        assert_eq!(log.touch_reads(X12), 20);
        assert_eq!(log.touch_reads(Y12), 0);

        log.clear();
        let sampling = SamplingConfig {
            samples: 3,
            attempts: 7,
        };
        assert_eq!(touch.read_position_with(&mut bus, &sampling), Ok(None));
        assert_eq!(log.touch_reads(X12), 7);
    }

    #[test]
    fn test_stops_once_enough_samples() {
        let (mut bus, log) = mock::transport();
        log.set_touch(constant(1000, 1075));
        let touch = sampler(Rotation::Portrait);
        assert!(touch.read_position(&mut bus).unwrap().is_some());
        assert_eq!(log.touch_reads(X12), 10);
        assert_eq!(log.touch_reads(Y12), 10);
    }

    #[test]
    fn test_too_few_valid_readings() {
        let (mut bus, log) = mock::transport();
        // every other X reading is out of range
        let mut x_reads = 0;
        log.set_touch(move |command| {
            if command == X12 {
                x_reads += 1;
                if x_reads % 2 == 0 {
                    50
                } else {
                    1000
                }
            } else {
                1075
            }
        });
        let touch = sampler(Rotation::Portrait);
        assert_eq!(
            touch.read_position(&mut bus),
            Ok(Some(Point::new(120, 160)))
        );
        assert_eq!(log.touch_reads(X12), 19);

        let sampling = SamplingConfig {
            samples: 11,
            attempts: 20,
        };
        assert_eq!(touch.read_position_with(&mut bus, &sampling), Ok(None));
    }

    #[test]
    fn test_constant_reading_per_rotation() {
        let (mut bus, log) = mock::transport();
        log.set_touch(constant(1000, 1075));
        // x = 240 * 900 / 1800 = 120, y = 320 * 875 / 1750 = 160
        let expected = [
            (Rotation::Portrait, Point::new(120, 160)),
            (Rotation::Landscape, Point::new(160, 120)),
            (Rotation::InvertedPortrait, Point::new(120, 160)),
            (Rotation::InvertedLandscape, Point::new(160, 120)),
        ];
        let mut touch = sampler(Rotation::Portrait);
        for (rotation, point) in expected {
            touch.set_rotation(rotation);
            assert_eq!(touch.read_position(&mut bus), Ok(Some(point)), "{rotation}");
        }
    }

    #[test]
    fn test_rescale_truncates() {
        let (mut bus, log) = mock::transport();
        // x = 240 * 1 / 1800 -> 0, y = 320 * 1749 / 1750 -> 319
        log.set_touch(constant(101, 1949));
        let touch = sampler(Rotation::InvertedPortrait);
        assert_eq!(
            touch.read_position(&mut bus),
            Ok(Some(Point::new(240, 319)))
        );
    }

    #[test]
    fn test_calibration_corners_map_inside_active_area() {
        let (mut bus, log) = mock::transport();
        for rotation in Rotation::ALL {
            let touch = sampler(rotation);
            let geometry = DisplayGeometry::new(240, 320, rotation, Default::default());
            let (w, h) = geometry.active_size();
            for (x, y) in [(100, 200), (1900, 200), (100, 1950), (1900, 1950)] {
                log.set_touch(constant(x, y));
                let point = touch.read_position(&mut bus).unwrap().unwrap();
                assert!((0..=i32::from(w)).contains(&point.x), "{rotation}: {point:?}");
                assert!((0..=i32::from(h)).contains(&point.y), "{rotation}: {point:?}");
            }
        }
    }

    #[test]
    fn test_zero_samples_reads_nothing() {
        let (mut bus, log) = mock::transport();
        log.set_touch(constant(1000, 1000));
        log.clear();
        let sampling = SamplingConfig {
            samples: 0,
            attempts: 20,
        };
        let touch = sampler(Rotation::Portrait);
        assert_eq!(touch.read_position_with(&mut bus, &sampling), Ok(None));
        assert!(log.ops().is_empty());
    }

    #[test]
    fn test_bus_fault_propagates() {
        let (mut bus, log) = mock::transport();
        log.fail_spi(true);
        let touch = sampler(Rotation::Portrait);
        assert_eq!(touch.read_position(&mut bus), Err(Error::Bus));
    }

    #[test]
    fn test_touch_state_from_position() {
        assert_eq!(TouchState::from(None), TouchState::Released);
        assert_eq!(
            TouchState::from(Some(Point::new(3, 4))),
            TouchState::Pressed(Point::new(3, 4))
        );
    }

    #[test]
    #[should_panic]
    fn test_calibration_rejects_empty_range() {
        let _ = TouchCalibration::new(100, 100, 200, 1950);
    }

    #[test]
    #[should_panic]
    fn test_calibration_rejects_inverted_y_range() {
        let _ = TouchCalibration::new(100, 1900, 1950, 200);
    }

    #[test]
    fn test_calibration_windows() {
        let calibration = TouchCalibration::default();
        assert_eq!(calibration.x_range(), (100, 1900));
        assert_eq!(calibration.y_range(), (200, 1950));

        // the narrowest window still rescales without a zero span
        let config = TouchConfig {
            calibration: TouchCalibration::new(1000, 1001, 1000, 1001),
            resolution: AdcResolution::Bits12,
        };
        let (mut bus, log) = mock::transport();
        log.set_touch(constant(1001, 1000));
        let touch = Xpt2046::new(config, 240, 320, Rotation::Portrait);
        assert_eq!(
            touch.read_position(&mut bus),
            Ok(Some(Point::new(240, 320)))
        );
    }

    #[test]
    fn test_default_resolution_is_12bit() {
        assert_eq!(AdcResolution::default(), AdcResolution::Bits12);
        assert_eq!(TouchConfig::default().resolution, AdcResolution::Bits12);
    }
}
