//! MSP2807 panel initialization module
//!
//! The ILI9341 display and the XPT2046 touch controller share SPI2. The
//! display runs at 40MHz; the touch controller needs the bus lowered to 2MHz
//! while it is sampled. Pixel blits are streamed by DMA channel 0.

use drivers::bus::SpiTransport;
use drivers::orientation::{ColorOrder, Rotation};
use drivers::panel::TouchPanel;
use drivers::protocol::{Display, Ili9341};
use drivers::touch::TouchConfig;
use esp_hal::delay::Delay;
use esp_hal::dma::{DmaRxBuf, DmaTxBuf};
use esp_hal::dma_buffers;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::peripherals::{DMA_CH0, GPIO10, GPIO11, GPIO12, GPIO13, GPIO14, GPIO8, GPIO9, SPI2};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode;
use esp_hal::time::Rate;
use log::info;

use super::dma::{DmaSpi, SpiDmaChannel, SPI2_DATA_REGISTER};

/// SPI clock while talking to the display
pub const DISPLAY_SPI_HZ: u32 = 40_000_000;
/// SPI clock while sampling the touch controller
pub const TOUCH_SPI_HZ: u32 = 2_000_000;

/// DMA transmit buffer, also the largest chunk of a streamed blit
const DMA_TX_BYTES: usize = 32_000;
/// DMA receive buffer, touch reads are three bytes
const DMA_RX_BYTES: usize = 256;

/// Type alias for the MSP2807 panel on SPI2 with DMA blits
pub type Panel = TouchPanel<
    DmaSpi,
    Output<'static>,
    Output<'static>,
    Ili9341,
    Output<'static>,
    SpiDmaChannel,
>;

/// Pins and peripheral wired to the MSP2807 header
pub struct PanelPeripherals {
    pub spi: SPI2<'static>,
    pub sck: GPIO12<'static>,
    pub mosi: GPIO11<'static>,
    pub miso: GPIO13<'static>,
    pub display_cs: GPIO10<'static>,
    pub touch_cs: GPIO14<'static>,
    pub dc: GPIO9<'static>,
    pub reset: GPIO8<'static>,
    pub dma: DMA_CH0<'static>,
}

/// SPI mode 0 at `hz`
pub fn spi_config(hz: u32) -> SpiConfig {
    SpiConfig::default()
        .with_frequency(Rate::from_hz(hz))
        .with_mode(Mode::_0)
}

/// Initializes the MSP2807 display and touch controller.
///
/// This function configures:
/// - GPIO pins for both chip selects, data/command and reset
/// - SPI2 at the display clock with DMA channel 0
/// - The ILI9341 init table and the requested rotation
///
/// # Panics
///
/// Panics if the SPI bus cannot be configured or display initialization fails.
pub fn initialize_panel(p: PanelPeripherals, rotation: Rotation) -> Panel {
    #[allow(clippy::manual_div_ceil)]
    let (rx_buffer, rx_descriptors, tx_buffer, tx_descriptors) =
        dma_buffers!(DMA_RX_BYTES, DMA_TX_BYTES);
    let dma_rx_buf = DmaRxBuf::new(rx_descriptors, rx_buffer).expect("Failed to set up DMA rx buffer");
    let dma_tx_buf = DmaTxBuf::new(tx_descriptors, tx_buffer).expect("Failed to set up DMA tx buffer");

    let spi = Spi::new(p.spi, spi_config(DISPLAY_SPI_HZ))
        .expect("Failed to configure SPI2")
        .with_sck(p.sck)
        .with_mosi(p.mosi)
        .with_miso(p.miso)
        .with_dma(p.dma)
        .with_buffers(dma_rx_buf, dma_tx_buf);

    let display_cs = Output::new(p.display_cs, Level::High, OutputConfig::default());
    let touch_cs = Output::new(p.touch_cs, Level::High, OutputConfig::default());
    let dc = Output::new(p.dc, Level::Low, OutputConfig::default());
    let reset = Output::new(p.reset, Level::High, OutputConfig::default());

    let transport = SpiTransport::new(DmaSpi::new(spi), display_cs, touch_cs, dc)
        .expect("Failed to set up SPI transport")
        .with_dma(SpiDmaChannel::new(DMA_TX_BYTES), SPI2_DATA_REGISTER);
    let display = Display::for_model(Ili9341, Some(reset), rotation, ColorOrder::Rgb);
    let mut panel = TouchPanel::new(transport, display, TouchConfig::default());

    panel
        .init(&mut Delay::new())
        .expect("Failed to initialize display");
    info!("MSP2807 ready, rotation: {rotation}");

    panel
}
