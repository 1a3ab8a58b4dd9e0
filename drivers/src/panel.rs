//! Display and touch sampler on one transport
//!
//! [`TouchPanel`] owns the shared bus and keeps the display and touch
//! rotations in step. Touch reads drain any DMA blit still running before the
//! touch chip select is asserted.

use embedded_dma::ReadBuffer;
use embedded_graphics_core::draw_target::DrawTarget;
use embedded_graphics_core::geometry::{Dimensions, OriginDimensions, Point, Size};
use embedded_graphics_core::pixelcolor::Rgb565;
use embedded_graphics_core::primitives::Rectangle as EgRectangle;
use embedded_graphics_core::Pixel;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::blit::{Blit, BlitMode, Rectangle};
use crate::bus::{BufferError, DmaChannel, DmaTransfer, NoDma, SpiTransport};
use crate::orientation::Rotation;
use crate::protocol::{color_bytes, Display, Model, NoResetPin};
use crate::touch::{SamplingConfig, TouchConfig, TouchState, Xpt2046};
use crate::Error;

pub struct TouchPanel<SPI, CS, DC, M, RST = NoResetPin, DMA = NoDma> {
    transport: SpiTransport<SPI, CS, DC, DMA>,
    display: Display<M, RST>,
    touch: Xpt2046,
    sampling: SamplingConfig,
}

impl<SPI, CS, DC, M, RST, DMA> TouchPanel<SPI, CS, DC, M, RST, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    M: Model,
    RST: OutputPin,
    DMA: DmaChannel<SPI>,
{
    /// The touch sampler takes its dimensions and rotation from `display`
    pub fn new(
        transport: SpiTransport<SPI, CS, DC, DMA>,
        display: Display<M, RST>,
        touch_config: TouchConfig,
    ) -> Self {
        let touch = Xpt2046::for_geometry(touch_config, display.geometry());
        Self {
            transport,
            display,
            touch,
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    /// Reset and configure the display
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Error> {
        self.transport.drain()?;
        self.display.reset(&mut self.transport, delay)?;
        self.touch.set_rotation(self.display.rotation());

        #[cfg(feature = "defmt")]
        defmt::info!("Panel ready: {}", self.display.geometry());
        #[cfg(feature = "log-04")]
        log::info!("Panel ready: {:?}", self.display.geometry());
        Ok(())
    }

    /// Rotate the display and the touch mapping together
    pub fn set_rotation(&mut self, rotation: Rotation) -> Result<(), Error> {
        self.display.set_rotation(&mut self.transport, rotation)?;
        self.touch.set_rotation(rotation);
        Ok(())
    }

    pub fn rotation(&self) -> Rotation {
        self.display.rotation()
    }

    pub fn blit(&mut self, rect: Rectangle, pixels: &[u8]) -> Result<(), Error> {
        self.display.blit(&mut self.transport, rect, pixels)
    }

    /// DMA blit; the buffer comes back with the error if it cannot be sent
    pub fn blit_dma<B>(
        &mut self,
        rect: Rectangle,
        buffer: B,
        mode: BlitMode,
    ) -> Result<Blit<B>, BufferError<B>>
    where
        B: ReadBuffer<Word = u8>,
    {
        self.display.blit_dma(&mut self.transport, rect, buffer, mode)
    }

    /// Wait for a DMA blit and get its buffer back
    pub fn wait<B>(&mut self, transfer: DmaTransfer<B>) -> Result<B, BufferError<B>> {
        self.transport.wait(transfer)
    }

    pub fn clear(&mut self, color: Rgb565) -> Result<(), Error> {
        self.display.clear(&mut self.transport, color)
    }

    pub fn fill_rect(&mut self, rect: Rectangle, color: Rgb565) -> Result<(), Error> {
        self.display.fill_rect(&mut self.transport, rect, color)
    }

    /// Averaged touch position, draining any running blit first
    pub fn read_position(&mut self) -> Result<Option<Point>, Error> {
        self.transport.drain()?;
        self.touch
            .read_position_with(&mut self.transport, &self.sampling)
    }

    pub fn poll_touch(&mut self) -> Result<TouchState, Error> {
        self.read_position().map(TouchState::from)
    }

    pub fn transport_mut(&mut self) -> &mut SpiTransport<SPI, CS, DC, DMA> {
        &mut self.transport
    }

    pub fn display(&self) -> &Display<M, RST> {
        &self.display
    }

    pub fn touch(&self) -> &Xpt2046 {
        &self.touch
    }

    /// Give back the transport and the display
    pub fn release(self) -> (SpiTransport<SPI, CS, DC, DMA>, Display<M, RST>) {
        (self.transport, self.display)
    }
}

impl<SPI, CS, DC, M, RST, DMA> OriginDimensions for TouchPanel<SPI, CS, DC, M, RST, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    M: Model,
    RST: OutputPin,
    DMA: DmaChannel<SPI>,
{
    fn size(&self) -> Size {
        let (width, height) = self.display.geometry().active_size();
        Size::new(u32::from(width), u32::from(height))
    }
}

impl<SPI, CS, DC, M, RST, DMA> DrawTarget for TouchPanel<SPI, CS, DC, M, RST, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    M: Model,
    RST: OutputPin,
    DMA: DmaChannel<SPI>,
{
    type Color = Rgb565;
    type Error = Error;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let bounds = self.bounding_box();
        for Pixel(point, color) in pixels {
            if !bounds.contains(point) {
                continue;
            }
            // inside the bounding box, so both coordinates fit in u16
            let (x, y) = (point.x as u16, point.y as u16);
            self.display.set_window(&mut self.transport, x, y, 1, 1)?;
            self.display
                .write_pixels(&mut self.transport, &color_bytes(color))?;
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &EgRectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        if area.is_zero_sized() {
            return Ok(());
        }
        self.fill_rect(Rectangle::try_from(area)?, color)
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.display.clear(&mut self.transport, color)
    }
}
