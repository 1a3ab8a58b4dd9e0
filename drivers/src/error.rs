use core::fmt::{Display, Formatter};

/// Errors surfaced by the display and touch drivers
///
/// An idle touch panel is not an error: sampling reports it as `Ok(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The SPI peripheral reported a read or write failure
    Bus,
    /// Driving a chip select, data/command or reset line failed
    Pin,
    /// A transaction was attempted while a DMA transfer still owns the bus
    DmaActive,
    /// Rectangle lies (partly) outside the active display area
    OutOfBounds,
    /// Pixel buffer length is not `2 * w * h` bytes
    BufferSize,
    /// A DMA transfer was requested on a transport without a DMA channel
    DmaUnavailable,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Bus => write!(f, "SPI bus fault"),
            Error::Pin => write!(f, "Control line fault"),
            Error::DmaActive => write!(f, "DMA transfer still active on the bus"),
            Error::OutOfBounds => write!(f, "Rectangle outside the active area"),
            Error::BufferSize => write!(f, "Pixel buffer does not match rectangle"),
            Error::DmaUnavailable => write!(f, "No DMA channel configured"),
        }
    }
}
