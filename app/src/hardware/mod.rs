//! Hardware initialization modules
//!
//! - **Panel**: MSP2807 module, ILI9341 display and XPT2046 touch on SPI2
//! - **DMA**: background pixel streaming through the SPI2 DMA driver

pub mod dma;
pub mod panel;

pub use panel::{initialize_panel, Panel, PanelPeripherals, DISPLAY_SPI_HZ, TOUCH_SPI_HZ};
