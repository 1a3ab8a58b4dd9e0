//! Rectangle blits and solid fills
//!
//! A blit is validated against the active area before anything reaches the
//! bus. With a DMA channel on the transport, [`Display::blit_dma`] can return
//! while the pixels are still streaming; the returned [`Blit::Pending`] must be
//! handed back to [`SpiTransport::wait`] (or [`Blit::finish`]) before the bus
//! is used again. A DMA blit that fails returns its buffer in the error.

use embedded_dma::ReadBuffer;
use embedded_graphics_core::geometry::{Point, Size};
use embedded_graphics_core::pixelcolor::Rgb565;
use embedded_graphics_core::primitives::Rectangle as EgRectangle;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::bus::{BufferError, DmaChannel, DmaTransfer, Interface, SpiTransport};
use crate::orientation::DisplayGeometry;
use crate::protocol::{Command, Display, Model};
use crate::Error;

/// Area in active (rotated) pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rectangle {
    pub const fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }

    /// The whole active area of `geometry`
    pub const fn full(geometry: &DisplayGeometry) -> Self {
        let (w, h) = geometry.active_size();
        Self::new(0, 0, w, h)
    }

    pub const fn pixel_count(&self) -> usize {
        self.w as usize * self.h as usize
    }

    /// RGB565 bytes needed to cover the rectangle
    pub const fn byte_len(&self) -> usize {
        self.pixel_count() * 2
    }

    /// Non-empty and fully inside the active area
    pub fn validate(&self, geometry: &DisplayGeometry) -> Result<(), Error> {
        let (width, height) = geometry.active_size();
        let fits_x = u32::from(self.x) + u32::from(self.w) <= u32::from(width);
        let fits_y = u32::from(self.y) + u32::from(self.h) <= u32::from(height);
        if self.w == 0 || self.h == 0 || !fits_x || !fits_y {
            return Err(Error::OutOfBounds);
        }
        Ok(())
    }
}

impl TryFrom<EgRectangle> for Rectangle {
    type Error = Error;

    fn try_from(rect: EgRectangle) -> Result<Self, Self::Error> {
        let x = u16::try_from(rect.top_left.x).map_err(|_| Error::OutOfBounds)?;
        let y = u16::try_from(rect.top_left.y).map_err(|_| Error::OutOfBounds)?;
        let w = u16::try_from(rect.size.width).map_err(|_| Error::OutOfBounds)?;
        let h = u16::try_from(rect.size.height).map_err(|_| Error::OutOfBounds)?;
        Ok(Self { x, y, w, h })
    }
}

impl From<Rectangle> for EgRectangle {
    fn from(rect: Rectangle) -> Self {
        EgRectangle::new(
            Point::new(i32::from(rect.x), i32::from(rect.y)),
            Size::new(u32::from(rect.w), u32::from(rect.h)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlitMode {
    /// Return once every pixel has been sent
    #[default]
    Blocking,
    /// Return as soon as the DMA channel is running
    NonBlocking,
}

/// Outcome of [`Display::blit_dma`]
#[must_use = "a pending blit keeps the bus locked until it is waited on"]
pub enum Blit<B> {
    /// All pixels sent, buffer handed back
    Done(B),
    /// DMA still streaming from the buffer
    Pending(DmaTransfer<B>),
}

impl<B> Blit<B> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Blit::Pending(_))
    }

    /// Wait for a pending transfer if needed and return the buffer
    pub fn finish<SPI, CS, DC, DMA>(
        self,
        bus: &mut SpiTransport<SPI, CS, DC, DMA>,
    ) -> Result<B, BufferError<B>>
    where
        SPI: SpiBus,
        CS: OutputPin,
        DC: OutputPin,
        DMA: DmaChannel<SPI>,
    {
        match self {
            Blit::Done(buffer) => Ok(buffer),
            Blit::Pending(transfer) => bus.wait(transfer),
        }
    }
}

impl<M, RST> Display<M, RST>
where
    M: Model,
    RST: OutputPin,
{
    /// Copy `pixels` (big-endian RGB565, row-major) into `rect`
    pub fn blit<I: Interface>(&mut self, bus: &mut I, rect: Rectangle, pixels: &[u8]) -> Result<(), Error> {
        rect.validate(self.geometry())?;
        if pixels.len() != rect.byte_len() {
            return Err(Error::BufferSize);
        }
        self.set_window(bus, rect.x, rect.y, rect.w, rect.h)?;
        self.write_pixels(bus, pixels)
    }

    /// Copy `buffer` into `rect`, through the DMA channel when there is one
    ///
    /// Without a DMA channel the pixels are written synchronously whatever
    /// `mode` says. On any error the buffer is handed back untouched.
    pub fn blit_dma<SPI, CS, DC, DMA, B>(
        &mut self,
        bus: &mut SpiTransport<SPI, CS, DC, DMA>,
        rect: Rectangle,
        buffer: B,
        mode: BlitMode,
    ) -> Result<Blit<B>, BufferError<B>>
    where
        SPI: SpiBus,
        CS: OutputPin,
        DC: OutputPin,
        DMA: DmaChannel<SPI>,
        B: ReadBuffer<Word = u8>,
    {
        let prepared = self.prepare_blit(bus, rect, pixels(&buffer).len());
        if let Err(error) = prepared {
            return Err(BufferError::new(error, buffer));
        }

        if !bus.has_dma() {
            return match self.write_pixels(bus, pixels(&buffer)) {
                Ok(()) => Ok(Blit::Done(buffer)),
                Err(error) => Err(BufferError::new(error, buffer)),
            };
        }

        let transfer = bus.begin_dma(Command::MemoryWrite.into(), buffer)?;
        match mode {
            BlitMode::NonBlocking => Ok(Blit::Pending(transfer)),
            BlitMode::Blocking => bus.wait(transfer).map(Blit::Done),
        }
    }

    /// Check `rect` against the active area and a `len` byte buffer, then
    /// open the window
    fn prepare_blit<I: Interface>(&mut self, bus: &mut I, rect: Rectangle, len: usize) -> Result<(), Error> {
        rect.validate(self.geometry())?;
        if len != rect.byte_len() {
            return Err(Error::BufferSize);
        }
        self.set_window(bus, rect.x, rect.y, rect.w, rect.h)
    }

    /// Fill the whole active area with `color`
    pub fn clear<I: Interface>(&mut self, bus: &mut I, color: Rgb565) -> Result<(), Error> {
        let rect = Rectangle::full(self.geometry());
        self.set_window(bus, rect.x, rect.y, rect.w, rect.h)?;
        self.fill(bus, color, rect.pixel_count())
    }

    /// Fill `rect` with `color`
    pub fn fill_rect<I: Interface>(&mut self, bus: &mut I, rect: Rectangle, color: Rgb565) -> Result<(), Error> {
        rect.validate(self.geometry())?;
        self.set_window(bus, rect.x, rect.y, rect.w, rect.h)?;
        self.fill(bus, color, rect.pixel_count())
    }
}

fn pixels<B: ReadBuffer<Word = u8>>(buffer: &B) -> &[u8] {
    // SAFETY: ReadBuffer guarantees a stable, readable region for as long as
    // the buffer is borrowed
    unsafe {
        let (ptr, len) = buffer.read_buffer();
        core::slice::from_raw_parts(ptr, len)
    }
}
