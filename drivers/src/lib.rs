#![no_std]
//! MSP2807 display and touch driver stack
//!
//! Drives an ILI9341 TFT controller and an XPT2046 resistive touch controller
//! that share one SPI bus. The display and the touch controller each get their
//! own chip select; the display additionally uses a data/command line.
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐
//! │ blit / clear  │   │ read_position │
//! └───────┬───────┘   └───────┬───────┘
//!         ▼                   ▼
//! ┌───────────────┐   ┌───────────────┐
//! │ protocol      │   │ touch         │
//! │ (ILI9341)     │   │ (XPT2046)     │
//! └───────┬───────┘   └───────┬───────┘
//!         │   orientation     │
//!         └─────────┬─────────┘
//!                   ▼
//!         ┌───────────────────┐
//!         │ bus (SPI + DMA)   │
//!         └───────────────────┘
//! ```
//!
//! A non-blocking blit leaves a DMA transfer running on the bus. Until it has
//! been drained with [`bus::SpiTransport::wait`] or [`bus::SpiTransport::drain`]
//! every other transaction is refused with [`Error::DmaActive`].

/// Pixel pipeline: rectangles, blits and fills.
pub mod blit;

/// Shared SPI transport, chip selects and DMA handoff.
pub mod bus;

/// Rotation, addressing mode and touch axis remapping.
pub mod orientation;

/// Display, touch and transport bundled with one rotation.
pub mod panel;

/// ILI9341 command protocol.
pub mod protocol;

/// XPT2046 touch sampling.
pub mod touch;

mod error;

pub use error::Error;

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
mod mock;

#[cfg(test)]
mod tests {
    use crate::orientation::Rotation;
    use crate::touch::AdcResolution;
    use crate::Error;
    use alloc::format;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::Bus), "SPI bus fault");
        assert_eq!(format!("{}", Error::Pin), "Control line fault");
        assert_eq!(
            format!("{}", Error::DmaActive),
            "DMA transfer still active on the bus"
        );
        assert_eq!(
            format!("{}", Error::OutOfBounds),
            "Rectangle outside the active area"
        );
        assert_eq!(
            format!("{}", Error::BufferSize),
            "Pixel buffer does not match rectangle"
        );
        assert_eq!(
            format!("{}", Error::DmaUnavailable),
            "No DMA channel configured"
        );
    }

    #[test]
    fn test_rotation_display() {
        assert_eq!(format!("{}", Rotation::Portrait), "Portrait");
        assert_eq!(format!("{}", Rotation::Landscape), "Landscape");
        assert_eq!(format!("{}", Rotation::InvertedPortrait), "Inverted portrait");
        assert_eq!(
            format!("{}", Rotation::InvertedLandscape),
            "Inverted landscape"
        );
    }

    #[test]
    fn test_rotation_from() {
        assert_eq!(Rotation::try_from(0).ok(), Some(Rotation::Portrait));
        assert_eq!(Rotation::try_from(1).ok(), Some(Rotation::Landscape));
        assert_eq!(Rotation::try_from(2).ok(), Some(Rotation::InvertedPortrait));
        assert_eq!(Rotation::try_from(3).ok(), Some(Rotation::InvertedLandscape));
        assert!(Rotation::try_from(4).is_err());
    }

    #[test]
    fn test_adc_resolution_from() {
        assert_eq!(AdcResolution::try_from(8).ok(), Some(AdcResolution::Bits8));
        assert_eq!(AdcResolution::try_from(12).ok(), Some(AdcResolution::Bits12));
        assert!(AdcResolution::try_from(10).is_err());
        assert!(AdcResolution::try_from(16).is_err());
    }
}
