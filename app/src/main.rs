#![no_std]
#![no_main]

use drivers::orientation::Rotation;
use embassy_executor::Spawner;
use embedded_graphics_core::pixelcolor::{Rgb565, RgbColor};
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use esp_hal_embassy::main;
use hardware::{initialize_panel, PanelPeripherals};
use log::info;
use paint_task::paint_task;

mod hardware;
mod paint_task;

esp_bootloader_esp_idf::esp_app_desc!();

/// Screen color after start-up
const BACKGROUND: Rgb565 = Rgb565::BLACK;

#[main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();

    // Initialize peripherals
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::_240MHz));

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timg0.timer0);
    info!("Embassy initialized!");

    let p = PanelPeripherals {
        spi: peripherals.SPI2,
        sck: peripherals.GPIO12,
        mosi: peripherals.GPIO11,
        miso: peripherals.GPIO13,
        display_cs: peripherals.GPIO10,
        touch_cs: peripherals.GPIO14,
        dc: peripherals.GPIO9,
        reset: peripherals.GPIO8,
        dma: peripherals.DMA_CH0,
    };
    let mut panel = initialize_panel(p, Rotation::Landscape);
    panel.clear(BACKGROUND).expect("Failed to clear display");

    // TASK: paint where the screen is touched
    spawner.spawn(paint_task(panel)).ok();
}
