//! Shared SPI transport
//!
//! One SPI bus, two devices: the display (chip select + data/command line) and
//! the touch controller (chip select only). Every transaction is bracketed by
//! chip select low → payload → chip select high through a [`BusHandle`].
//!
//! Pixel data can also be handed to a DMA channel that writes straight into
//! the SPI data register. While such a transfer is active the display chip
//! select stays low and the transport refuses every other transaction with
//! [`Error::DmaActive`] until [`SpiTransport::wait`] or [`SpiTransport::drain`]
//! has observed completion.
//!
//! A DMA request that cannot be started, or whose completion reports a fault,
//! hands its buffer back inside a [`BufferError`].

use core::fmt::{Display, Formatter};
use core::mem::ManuallyDrop;

use embedded_dma::ReadBuffer;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::Error;

/// Logical device slot on the shared bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Device {
    Display,
    Touch,
}

/// Lifecycle of the DMA transfer owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    /// No transfer; the bus is free
    Idle,
    /// Channel enabled and still moving bytes
    Active,
    /// Channel finished, chip select not yet released
    Complete,
}

/// Memory to peripheral copy programmed into a [`DmaChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaDescriptor {
    /// Address of the first byte to send
    pub source: usize,
    /// Address of the SPI transmit data register
    pub destination: usize,
    /// Number of bytes
    pub count: usize,
}

/// A DMA channel able to feed the transmit side of the SPI bus `SPI`
///
/// The channel increments the source address, keeps the destination fixed and
/// is paced by the SPI transmit request. Channels that are attached to the SPI
/// driver itself (rather than to its data register) get the bus on every call
/// after [`configure`](Self::configure); the transport never touches the bus
/// between [`enable`](Self::enable) and [`disable`](Self::disable).
pub trait DmaChannel<SPI> {
    /// Program the channel. It stays disarmed until [`enable`](Self::enable).
    ///
    /// # Safety
    ///
    /// `descriptor.source` must point to `descriptor.count` readable bytes that
    /// stay valid and unmodified until [`is_busy`](Self::is_busy) has returned
    /// `false` after the channel was enabled.
    unsafe fn configure(&mut self, descriptor: &DmaDescriptor);

    /// Arm and trigger the programmed transfer
    fn enable(&mut self, bus: &mut SPI);

    /// True while bytes remain to be issued
    fn is_busy(&mut self, bus: &mut SPI) -> bool;

    /// Disarm the channel once it is idle, reporting a fault seen on the way
    fn disable(&mut self, bus: &mut SPI) -> Result<(), Error>;
}

/// Transport without a DMA channel
#[derive(Debug)]
pub enum NoDma {}

impl<SPI> DmaChannel<SPI> for NoDma {
    unsafe fn configure(&mut self, _descriptor: &DmaDescriptor) {
        match *self {}
    }

    fn enable(&mut self, _bus: &mut SPI) {
        match *self {}
    }

    fn is_busy(&mut self, _bus: &mut SPI) -> bool {
        match *self {}
    }

    fn disable(&mut self, _bus: &mut SPI) -> Result<(), Error> {
        match *self {}
    }
}

/// Operations the display and touch drivers need from a bus
pub trait Interface {
    /// Payload with the data/command line high, in one chip select window
    fn write(&mut self, device: Device, bytes: &[u8]) -> Result<(), Error>;

    /// Display command byte, then `params` as data, in one chip select window
    fn write_register(&mut self, command: u8, params: &[u8]) -> Result<(), Error> {
        self.write_register_chunks(command, [params])
    }

    /// Display command byte, then every chunk as data, in one chip select window
    fn write_register_chunks<'c, I>(&mut self, command: u8, chunks: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'c [u8]>;

    /// Full-duplex exchange with `device`
    fn write_then_read(
        &mut self,
        device: Device,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error>;
}

struct DmaLink<DMA> {
    channel: DMA,
    data_register: usize,
}

/// The shared SPI bus with its chip selects and optional DMA channel
pub struct SpiTransport<SPI, CS, DC, DMA = NoDma> {
    spi: SPI,
    display_cs: CS,
    touch_cs: CS,
    dc: DC,
    dma: Option<DmaLink<DMA>>,
    state: TransferState,
}

impl<SPI, CS, DC> SpiTransport<SPI, CS, DC, NoDma>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
{
    /// Create the transport; both chip selects are driven inactive (high)
    pub fn new(spi: SPI, mut display_cs: CS, mut touch_cs: CS, dc: DC) -> Result<Self, Error> {
        display_cs.set_high().map_err(|_| Error::Pin)?;
        touch_cs.set_high().map_err(|_| Error::Pin)?;
        Ok(Self {
            spi,
            display_cs,
            touch_cs,
            dc,
            dma: None,
            state: TransferState::Idle,
        })
    }

    /// Attach a DMA channel writing to the SPI data register at `data_register`
    pub fn with_dma<DMA: DmaChannel<SPI>>(
        self,
        channel: DMA,
        data_register: usize,
    ) -> SpiTransport<SPI, CS, DC, DMA> {
        SpiTransport {
            spi: self.spi,
            display_cs: self.display_cs,
            touch_cs: self.touch_cs,
            dc: self.dc,
            dma: Some(DmaLink {
                channel,
                data_register,
            }),
            state: TransferState::Idle,
        }
    }
}

impl<SPI, CS, DC, DMA> SpiTransport<SPI, CS, DC, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    DMA: DmaChannel<SPI>,
{
    pub fn has_dma(&self) -> bool {
        self.dma.is_some()
    }

    /// Current transfer state, polling the channel while a transfer is active
    pub fn dma_state(&mut self) -> TransferState {
        if self.state == TransferState::Active {
            if let Some(link) = self.dma.as_mut() {
                if !link.channel.is_busy(&mut self.spi) {
                    self.state = TransferState::Complete;
                }
            }
        }
        self.state
    }

    /// Assert `device`'s chip select and hand out the bus for one transaction
    pub fn acquire(&mut self, device: Device) -> Result<BusHandle<'_, SPI, CS, DC, DMA>, Error> {
        self.ensure_idle()?;
        self.chip_select(device)
            .set_low()
            .map_err(|_| Error::Pin)?;
        Ok(BusHandle {
            bus: self,
            device,
            released: false,
        })
    }

    /// The SPI peripheral, e.g. to change its clock around a touch burst
    pub fn bus_mut(&mut self) -> Result<&mut SPI, Error> {
        self.ensure_idle()?;
        Ok(&mut self.spi)
    }

    /// Start streaming `buffer` to the display after `command`
    ///
    /// Returns as soon as the channel is triggered. The display chip select
    /// stays asserted and the bus is unusable until the transfer is passed to
    /// [`wait`](Self::wait) or [`drain`](Self::drain) is called. When the
    /// transfer cannot be started the buffer comes back with the error.
    pub fn begin_dma<B>(
        &mut self,
        command: u8,
        buffer: B,
    ) -> Result<DmaTransfer<B>, BufferError<B>>
    where
        B: ReadBuffer<Word = u8>,
    {
        let data_register = match self.dma.as_ref() {
            Some(link) => link.data_register,
            None => return Err(BufferError::new(Error::DmaUnavailable, buffer)),
        };
        if let Err(error) = self.open_stream(command) {
            return Err(BufferError::new(error, buffer));
        }

        let buffer = ManuallyDrop::new(buffer);
        // SAFETY: the buffer is 'static and stable (ReadBuffer contract) and is
        // owned by the returned transfer, which never drops it before
        // completion has been observed.
        let (source, count) = unsafe { buffer.read_buffer() };
        let descriptor = DmaDescriptor {
            source: source as usize,
            destination: data_register,
            count,
        };

        if let Some(link) = self.dma.as_mut() {
            // SAFETY: see above, `source` stays valid until the channel is idle.
            unsafe { link.channel.configure(&descriptor) };
            link.channel.enable(&mut self.spi);
        }
        self.state = TransferState::Active;

        #[cfg(feature = "defmt")]
        defmt::trace!("DMA started: {} bytes", count);
        #[cfg(feature = "log-04")]
        log::trace!("DMA started: {} bytes", count);

        Ok(DmaTransfer { buffer, descriptor })
    }

    /// Block until `transfer` has completed and release the bus
    ///
    /// Returns the buffer to the caller for reuse, also when the transfer
    /// reported a fault.
    pub fn wait<B>(&mut self, transfer: DmaTransfer<B>) -> Result<B, BufferError<B>> {
        let drained = self.drain();
        // the channel is idle once drain returns, whatever it reports
        let buffer = transfer.into_buffer();
        match drained {
            Ok(()) => Ok(buffer),
            Err(error) => Err(BufferError::new(error, buffer)),
        }
    }

    /// Block until any active transfer has completed and release the bus
    ///
    /// No-op when the bus is idle. Call before any transaction that may follow
    /// a non-blocking blit.
    pub fn drain(&mut self) -> Result<(), Error> {
        if self.state == TransferState::Idle {
            return Ok(());
        }
        let mut finished = Ok(());
        if let Some(link) = self.dma.as_mut() {
            while link.channel.is_busy(&mut self.spi) {
                core::hint::spin_loop();
            }
            finished = link.channel.disable(&mut self.spi);
        }
        self.state = TransferState::Complete;

        // The channel only fills the transmit FIFO; wait for the last byte to
        // leave the shifter before releasing chip select.
        let flushed = self.spi.flush().map_err(|_| Error::Bus);
        let deselected = self.display_cs.set_high().map_err(|_| Error::Pin);
        self.state = TransferState::Idle;

        #[cfg(feature = "defmt")]
        defmt::trace!("DMA drained");
        #[cfg(feature = "log-04")]
        log::trace!("DMA drained");
        finished.and(flushed).and(deselected)
    }

    /// Display command, then data mode with chip select held for a stream
    fn open_stream(&mut self, command: u8) -> Result<(), Error> {
        let mut handle = self.acquire(Device::Display)?;
        handle.command(command)?;
        handle.data_mode()?;
        handle.hold();
        Ok(())
    }

    fn ensure_idle(&mut self) -> Result<(), Error> {
        if self.state != TransferState::Idle {
            #[cfg(feature = "defmt")]
            defmt::warn!("Bus access while a DMA transfer is active");
            #[cfg(feature = "log-04")]
            log::warn!("Bus access while a DMA transfer is active");
            return Err(Error::DmaActive);
        }
        Ok(())
    }

    fn chip_select(&mut self, device: Device) -> &mut CS {
        match device {
            Device::Display => &mut self.display_cs,
            Device::Touch => &mut self.touch_cs,
        }
    }
}

impl<SPI, CS, DC, DMA> Interface for SpiTransport<SPI, CS, DC, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    DMA: DmaChannel<SPI>,
{
    fn write(&mut self, device: Device, bytes: &[u8]) -> Result<(), Error> {
        let mut handle = self.acquire(device)?;
        handle.data(bytes)?;
        handle.finish()
    }

    fn write_register_chunks<'c, I>(&mut self, command: u8, chunks: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'c [u8]>,
    {
        let mut handle = self.acquire(Device::Display)?;
        handle.command(command)?;
        for chunk in chunks {
            if !chunk.is_empty() {
                handle.data(chunk)?;
            }
        }
        handle.finish()
    }

    fn write_then_read(
        &mut self,
        device: Device,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error> {
        let mut handle = self.acquire(device)?;
        handle.transfer(read, write)?;
        handle.finish()
    }
}

/// Exclusive use of the bus by one device for one transaction
///
/// The chip select is released by [`finish`](Self::finish), or on drop if
/// the transaction was abandoned early.
pub struct BusHandle<'a, SPI, CS, DC, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    DMA: DmaChannel<SPI>,
{
    bus: &'a mut SpiTransport<SPI, CS, DC, DMA>,
    device: Device,
    released: bool,
}

impl<SPI, CS, DC, DMA> BusHandle<'_, SPI, CS, DC, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    DMA: DmaChannel<SPI>,
{
    pub fn device(&self) -> Device {
        self.device
    }

    /// Send one command byte with the data/command line low
    pub fn command(&mut self, command: u8) -> Result<(), Error> {
        self.bus.spi.flush().map_err(|_| Error::Bus)?;
        self.bus.dc.set_low().map_err(|_| Error::Pin)?;
        self.bus.spi.write(&[command]).map_err(|_| Error::Bus)
    }

    /// Send payload bytes with the data/command line high
    pub fn data(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.data_mode()?;
        self.bus.spi.write(bytes).map_err(|_| Error::Bus)
    }

    /// Full-duplex exchange; `read` and `write` may differ in length
    pub fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Error> {
        self.bus.spi.transfer(read, write).map_err(|_| Error::Bus)
    }

    /// Release chip select once every byte has left the bus
    pub fn finish(mut self) -> Result<(), Error> {
        self.release()
    }

    fn data_mode(&mut self) -> Result<(), Error> {
        self.bus.spi.flush().map_err(|_| Error::Bus)?;
        self.bus.dc.set_high().map_err(|_| Error::Pin)
    }

    /// Keep chip select asserted past this handle; a DMA transfer owns it now
    fn hold(mut self) {
        self.released = true;
    }

    fn release(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let flushed = self.bus.spi.flush().map_err(|_| Error::Bus);
        let device = self.device;
        let deselected = self
            .bus
            .chip_select(device)
            .set_high()
            .map_err(|_| Error::Pin);
        flushed.and(deselected)
    }
}

impl<SPI, CS, DC, DMA> Drop for BusHandle<'_, SPI, CS, DC, DMA>
where
    SPI: SpiBus,
    CS: OutputPin,
    DC: OutputPin,
    DMA: DmaChannel<SPI>,
{
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// A DMA transfer in flight, owning its source buffer
///
/// Hand it back to [`SpiTransport::wait`] to get the buffer back. Dropping it
/// instead leaks the buffer, since the channel may still be reading from it.
#[must_use = "the bus stays locked until the transfer is waited on"]
pub struct DmaTransfer<B> {
    buffer: ManuallyDrop<B>,
    descriptor: DmaDescriptor,
}

impl<B> DmaTransfer<B> {
    pub fn descriptor(&self) -> &DmaDescriptor {
        &self.descriptor
    }

    fn into_buffer(mut self) -> B {
        // SAFETY: taken exactly once; `self` is consumed and ManuallyDrop
        // never drops its content on its own.
        unsafe { ManuallyDrop::take(&mut self.buffer) }
    }
}

/// A DMA request that failed, with the buffer it was given
#[derive(Debug)]
pub struct BufferError<B> {
    pub error: Error,
    pub buffer: B,
}

impl<B> BufferError<B> {
    pub fn new(error: Error, buffer: B) -> Self {
        Self { error, buffer }
    }

    pub fn into_parts(self) -> (Error, B) {
        (self.error, self.buffer)
    }
}

impl<B> From<BufferError<B>> for Error {
    fn from(value: BufferError<B>) -> Self {
        value.error
    }
}

impl<B> Display for BufferError<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Display::fmt(&self.error, f)
    }
}
