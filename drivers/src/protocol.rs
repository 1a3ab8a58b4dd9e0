//! ILI9341 register protocol
//!
//! Controller configuration is kept as data: a [`Model`] carries its native
//! size and an init table of [`InitCommand`] records, and a single interpreter
//! loop writes them. [`Display`] holds the per-panel state (reset line,
//! geometry) and issues the addressing and memory write commands.

use core::convert::Infallible;

use embedded_graphics_core::pixelcolor::raw::{RawData, RawU16};
use embedded_graphics_core::pixelcolor::Rgb565;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::bus::Interface;
use crate::orientation::{AddressMode, ColorOrder, DisplayGeometry, Rotation};
use crate::Error;

/// Longest parameter list a table entry may carry
pub const MAX_PARAMS: usize = 16;

/// Pixels per write when filling with a single color
pub const FILL_CHUNK_PIXELS: usize = 128;

/// ILI9341 command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SleepOut = 0x11,
    GammaSet = 0x26,
    DisplayOn = 0x29,
    ColumnAddressSet = 0x2A,
    PageAddressSet = 0x2B,
    MemoryWrite = 0x2C,
    MemoryAccessControl = 0x36,
    VerticalScrollStart = 0x37,
    PixelFormat = 0x3A,
    FrameRateControl = 0xB1,
    DisplayFunctionControl = 0xB6,
    PowerControl1 = 0xC0,
    PowerControl2 = 0xC1,
    VcomControl1 = 0xC5,
    VcomControl2 = 0xC7,
    PowerControlA = 0xCB,
    PowerControlB = 0xCF,
    PositiveGamma = 0xE0,
    NegativeGamma = 0xE1,
    DriverTimingControlA = 0xE8,
    DriverTimingControlB = 0xEA,
    PowerOnSequence = 0xED,
    Enable3Gamma = 0xF2,
    PumpRatioControl = 0xF7,
}

/// One entry of a controller init table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitCommand {
    pub command: u8,
    pub params: &'static [u8],
    /// Pause after the command, if the controller needs one
    pub delay_ms: Option<u32>,
}

impl InitCommand {
    pub const fn new(command: u8, params: &'static [u8]) -> Self {
        Self {
            command,
            params,
            delay_ms: None,
        }
    }

    pub const fn with_delay(command: u8, params: &'static [u8], delay_ms: u32) -> Self {
        Self {
            command,
            params,
            delay_ms: Some(delay_ms),
        }
    }
}

/// True when `sequence` is non-empty and no entry exceeds [`MAX_PARAMS`]
pub const fn validate_sequence(sequence: &[InitCommand]) -> bool {
    if sequence.is_empty() {
        return false;
    }
    let mut i = 0;
    while i < sequence.len() {
        if sequence[i].params.len() > MAX_PARAMS {
            return false;
        }
        i += 1;
    }
    true
}

/// A display controller variant
pub trait Model {
    /// `(width, height)` at rotation 0
    const NATIVE_SIZE: (u16, u16);

    /// Register writes that bring the controller from reset to display on
    const INIT_SEQUENCE: &'static [InitCommand];

    /// MADCTL pattern for `rotation`
    fn address_mode(&self, rotation: Rotation, color_order: ColorOrder) -> AddressMode {
        rotation.address_mode(color_order)
    }

    /// Write the init table in order, honoring per-entry delays
    fn configure<I, D>(&self, bus: &mut I, delay: &mut D) -> Result<(), Error>
    where
        I: Interface,
        D: DelayNs,
    {
        for entry in Self::INIT_SEQUENCE {
            bus.write_register(entry.command, entry.params)?;
            if let Some(ms) = entry.delay_ms {
                delay.delay_ms(ms);
            }
        }
        Ok(())
    }
}

/// ILI9341 240x320 TFT controller
#[derive(Debug, Clone, Copy, Default)]
pub struct Ili9341;

impl Model for Ili9341 {
    const NATIVE_SIZE: (u16, u16) = (240, 320);

    const INIT_SEQUENCE: &'static [InitCommand] = &[
        // undocumented, required by most panel vendors
        InitCommand::new(0xEF, &[0x03, 0x80, 0x02]),
        InitCommand::new(Command::PowerControlB as u8, &[0x00, 0xC1, 0x30]),
        InitCommand::new(Command::PowerOnSequence as u8, &[0x64, 0x03, 0x12, 0x81]),
        InitCommand::new(Command::DriverTimingControlA as u8, &[0x85, 0x00, 0x78]),
        InitCommand::new(
            Command::PowerControlA as u8,
            &[0x39, 0x2C, 0x00, 0x34, 0x02],
        ),
        InitCommand::new(Command::PumpRatioControl as u8, &[0x20]),
        InitCommand::new(Command::DriverTimingControlB as u8, &[0x00, 0x00]),
        InitCommand::new(Command::PowerControl1 as u8, &[0x23]), // 4.60 V
        InitCommand::new(Command::PowerControl2 as u8, &[0x10]),
        InitCommand::new(Command::VcomControl1 as u8, &[0x3E, 0x28]),
        InitCommand::new(Command::VcomControl2 as u8, &[0x86]),
        InitCommand::new(Command::MemoryAccessControl as u8, &[0x00]),
        InitCommand::new(Command::VerticalScrollStart as u8, &[0x00]),
        InitCommand::new(Command::PixelFormat as u8, &[0x55]), // 16 bit/pixel
        InitCommand::new(Command::FrameRateControl as u8, &[0x00, 0x18]),
        InitCommand::new(Command::DisplayFunctionControl as u8, &[0x08, 0x82, 0x27]),
        InitCommand::new(Command::Enable3Gamma as u8, &[0x00]),
        InitCommand::new(Command::GammaSet as u8, &[0x01]),
        InitCommand::new(
            Command::PositiveGamma as u8,
            &[
                0x0F, 0x31, 0x2B, 0x0C, 0x0E, 0x08, 0x4E, 0xF1, 0x37, 0x07, 0x10, 0x03, 0x0E, 0x09,
                0x00,
            ],
        ),
        InitCommand::new(
            Command::NegativeGamma as u8,
            &[
                0x00, 0x0E, 0x14, 0x03, 0x11, 0x07, 0x31, 0xC1, 0x48, 0x08, 0x0F, 0x0C, 0x31, 0x36,
                0x0F,
            ],
        ),
        InitCommand::with_delay(Command::SleepOut as u8, &[], 100),
        InitCommand::with_delay(Command::DisplayOn as u8, &[], 100),
    ];
}

const _: () = assert!(validate_sequence(<Ili9341 as Model>::INIT_SEQUENCE));

/// Placeholder for panels whose reset line is not wired to the MCU
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResetPin;

impl ErrorType for NoResetPin {
    type Error = Infallible;
}

impl OutputPin for NoResetPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Hardware reset pulse timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetTiming {
    /// Wait after every reset line transition
    pub settle_ms: u32,
}

impl Default for ResetTiming {
    fn default() -> Self {
        Self { settle_ms: 200 }
    }
}

/// Big-endian bytes of an RGB565 color as the controller expects them
pub(crate) fn color_bytes(color: Rgb565) -> [u8; 2] {
    RawU16::from(color).into_inner().to_be_bytes()
}

/// Display controller state
pub struct Display<M, RST = NoResetPin> {
    model: M,
    reset: Option<RST>,
    geometry: DisplayGeometry,
    timing: ResetTiming,
}

impl<M: Model> Display<M, NoResetPin> {
    /// Display whose reset line is tied high
    pub fn without_reset(model: M, geometry: DisplayGeometry) -> Self {
        Self::new(model, None, geometry)
    }
}

impl<M, RST> Display<M, RST>
where
    M: Model,
    RST: OutputPin,
{
    pub fn new(model: M, reset: Option<RST>, geometry: DisplayGeometry) -> Self {
        Self {
            model,
            reset,
            geometry,
            timing: ResetTiming::default(),
        }
    }

    /// Display sized from the model's native resolution
    pub fn for_model(
        model: M,
        reset: Option<RST>,
        rotation: Rotation,
        color_order: ColorOrder,
    ) -> Self {
        let (width, height) = M::NATIVE_SIZE;
        Self::new(
            model,
            reset,
            DisplayGeometry::new(width, height, rotation, color_order),
        )
    }

    pub fn with_timing(mut self, timing: ResetTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn geometry(&self) -> &DisplayGeometry {
        &self.geometry
    }

    pub fn rotation(&self) -> Rotation {
        self.geometry.rotation
    }

    /// Pulse the reset line, write the init table and the current rotation
    pub fn reset<I, D>(&mut self, bus: &mut I, delay: &mut D) -> Result<(), Error>
    where
        I: Interface,
        D: DelayNs,
    {
        if let Some(pin) = self.reset.as_mut() {
            let settle = self.timing.settle_ms;
            pin.set_high().map_err(|_| Error::Pin)?;
            delay.delay_ms(settle);
            pin.set_low().map_err(|_| Error::Pin)?;
            delay.delay_ms(settle);
            pin.set_high().map_err(|_| Error::Pin)?;
            delay.delay_ms(settle);
            delay.delay_ms(settle);
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("Writing display init table");
        #[cfg(feature = "log-04")]
        log::debug!("Writing display init table");

        self.model.configure(bus, delay)?;
        self.set_rotation(bus, self.geometry.rotation)
    }

    /// Write MADCTL for `rotation` and switch the active dimensions
    pub fn set_rotation<I: Interface>(&mut self, bus: &mut I, rotation: Rotation) -> Result<(), Error> {
        let mode = self.model.address_mode(rotation, self.geometry.color_order);
        bus.write_register(Command::MemoryAccessControl.into(), &[mode.bits()])?;
        self.geometry.rotation = rotation;

        #[cfg(feature = "defmt")]
        defmt::debug!("Display rotation: {}", rotation);
        #[cfg(feature = "log-04")]
        log::debug!("Display rotation: {}", rotation);
        Ok(())
    }

    /// Set the column and row address window, end coordinates inclusive
    ///
    /// `w` and `h` must be non-zero.
    pub fn set_window<I: Interface>(
        &mut self,
        bus: &mut I,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
    ) -> Result<(), Error> {
        bus.write_register(Command::ColumnAddressSet.into(), &span(x, w))?;
        bus.write_register(Command::PageAddressSet.into(), &span(y, h))
    }

    /// Write raw RGB565 bytes into the current window
    pub fn write_pixels<I: Interface>(&mut self, bus: &mut I, bytes: &[u8]) -> Result<(), Error> {
        bus.write_register(Command::MemoryWrite.into(), bytes)
    }

    /// Write `count` pixels of `color` into the current window
    pub fn fill<I: Interface>(&mut self, bus: &mut I, color: Rgb565, count: usize) -> Result<(), Error> {
        let [hi, lo] = color_bytes(color);
        let mut chunk = [0u8; FILL_CHUNK_PIXELS * 2];
        for pixel in chunk.chunks_exact_mut(2) {
            pixel[0] = hi;
            pixel[1] = lo;
        }

        let full = count / FILL_CHUNK_PIXELS;
        let rest = count % FILL_CHUNK_PIXELS;
        let chunks = core::iter::repeat(&chunk[..])
            .take(full)
            .chain((rest > 0).then(|| &chunk[..rest * 2]));
        bus.write_register_chunks(Command::MemoryWrite.into(), chunks)
    }
}

fn span(start: u16, len: u16) -> [u8; 4] {
    let [s0, s1] = start.to_be_bytes();
    let [e0, e1] = start.wrapping_add(len).wrapping_sub(1).to_be_bytes();
    [s0, s1, e0, e1]
}
