//! DMA pixel streaming on SPI2
//!
//! On the ESP32-S3 the GDMA channel is bound to the SPI driver rather than to
//! a data register. [`DmaSpi`] wraps the DMA-backed SPI bus so command bytes,
//! touch reads and streamed blits all go through one peripheral, and
//! [`SpiDmaChannel`] feeds a blit through the driver's transmit buffer one
//! chunk at a time while the panel's chip select stays asserted.

use core::mem;

use drivers::bus::{DmaChannel, DmaDescriptor};
use drivers::Error;
use embedded_hal::spi::{ErrorKind, ErrorType, SpiBus};
use esp_hal::dma::{DmaRxBuf, DmaTxBuf};
use esp_hal::spi::master::{Config as SpiConfig, SpiDmaBus, SpiDmaTransfer};
use esp_hal::Blocking;
use log::warn;

/// SPI2 W0 register, reported in the transfer descriptor
pub const SPI2_DATA_REGISTER: usize = 0x6002_4098;

enum State {
    Idle(SpiDmaBus<'static, Blocking>),
    Streaming {
        transfer: SpiDmaTransfer<'static, Blocking, DmaTxBuf>,
        rx: DmaRxBuf,
    },
    /// Only seen while the driver is moved between the other two states
    Moving,
}

/// DMA-backed SPI bus that can also run one streamed write in the background
pub struct DmaSpi {
    state: State,
}

#[derive(Debug)]
pub enum DmaSpiError {
    Spi(esp_hal::spi::Error),
    /// A streamed write still owns the bus
    Busy,
    /// The driver rejected the configuration
    Config,
}

impl embedded_hal::spi::Error for DmaSpiError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl DmaSpi {
    pub fn new(bus: SpiDmaBus<'static, Blocking>) -> Self {
        Self {
            state: State::Idle(bus),
        }
    }

    /// Change clock or mode between transactions
    pub fn apply_config(&mut self, config: &SpiConfig) -> Result<(), DmaSpiError> {
        self.idle()?
            .apply_config(config)
            .map_err(|_| DmaSpiError::Config)
    }

    fn idle(&mut self) -> Result<&mut SpiDmaBus<'static, Blocking>, DmaSpiError> {
        match &mut self.state {
            State::Idle(bus) => Ok(bus),
            _ => Err(DmaSpiError::Busy),
        }
    }

    /// Start writing `bytes` in the background; at most one transmit buffer
    fn stream(&mut self, bytes: &[u8]) -> Result<(), DmaSpiError> {
        if !matches!(self.state, State::Idle(_)) {
            return Err(DmaSpiError::Busy);
        }
        let State::Idle(bus) = mem::replace(&mut self.state, State::Moving) else {
            return Err(DmaSpiError::Busy);
        };

        let (spi, rx, mut tx) = bus.split();
        tx.fill(bytes);
        match spi.write(bytes.len(), tx) {
            Ok(transfer) => {
                self.state = State::Streaming { transfer, rx };
                Ok(())
            }
            Err((e, spi, tx)) => {
                self.state = State::Idle(spi.with_buffers(rx, tx));
                Err(DmaSpiError::Spi(e))
            }
        }
    }

    /// A streamed write has been started and not settled yet
    fn in_flight(&self) -> bool {
        matches!(self.state, State::Streaming { .. })
    }

    /// A streamed write is still moving bytes
    fn is_streaming(&self) -> bool {
        match &self.state {
            State::Streaming { transfer, .. } => !transfer.is_done(),
            _ => false,
        }
    }

    /// Wait for a streamed write and take the bus back
    fn settle(&mut self) {
        if !self.in_flight() {
            return;
        }
        if let State::Streaming { transfer, rx } = mem::replace(&mut self.state, State::Moving) {
            let (spi, tx) = transfer.wait();
            self.state = State::Idle(spi.with_buffers(rx, tx));
        }
    }
}

impl ErrorType for DmaSpi {
    type Error = DmaSpiError;
}

impl SpiBus for DmaSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        SpiBus::read(self.idle()?, words).map_err(DmaSpiError::Spi)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        SpiBus::write(self.idle()?, words).map_err(DmaSpiError::Spi)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        SpiBus::transfer(self.idle()?, read, write).map_err(DmaSpiError::Spi)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        SpiBus::transfer_in_place(self.idle()?, words).map_err(DmaSpiError::Spi)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        SpiBus::flush(self.idle()?).map_err(DmaSpiError::Spi)
    }
}

/// Streams a blit through [`DmaSpi`] in transmit buffer sized chunks
pub struct SpiDmaChannel {
    chunk: usize,
    source: usize,
    count: usize,
    sent: usize,
    fault: bool,
}

impl SpiDmaChannel {
    /// `chunk` is the size of the driver's transmit buffer
    pub const fn new(chunk: usize) -> Self {
        Self {
            chunk,
            source: 0,
            count: 0,
            sent: 0,
            fault: false,
        }
    }

    fn next_chunk(&mut self, bus: &mut DmaSpi) {
        let len = (self.count - self.sent).min(self.chunk);
        // SAFETY: the transport keeps `count` bytes at `source` alive and
        // unmodified until is_busy has reported the channel idle
        let bytes =
            unsafe { core::slice::from_raw_parts((self.source + self.sent) as *const u8, len) };
        match bus.stream(bytes) {
            Ok(()) => self.sent += len,
            Err(e) => {
                warn!("DMA chunk at {} of {} failed: {e:?}", self.sent, self.count);
                self.fault = true;
                self.sent = self.count;
            }
        }
    }
}

impl DmaChannel<DmaSpi> for SpiDmaChannel {
    unsafe fn configure(&mut self, descriptor: &DmaDescriptor) {
        self.source = descriptor.source;
        self.count = descriptor.count;
        self.sent = 0;
        self.fault = false;
    }

    fn enable(&mut self, bus: &mut DmaSpi) {
        if self.count > 0 {
            self.next_chunk(bus);
        }
    }

    fn is_busy(&mut self, bus: &mut DmaSpi) -> bool {
        if bus.is_streaming() {
            return true;
        }
        bus.settle();
        if self.sent < self.count {
            self.next_chunk(bus);
        }
        bus.in_flight()
    }

    fn disable(&mut self, bus: &mut DmaSpi) -> Result<(), Error> {
        bus.settle();
        if self.fault {
            return Err(Error::Bus);
        }
        Ok(())
    }
}
