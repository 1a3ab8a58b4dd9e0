use drivers::blit::{Blit, BlitMode, Rectangle};
use drivers::bus::DmaTransfer;
use drivers::touch::TouchState;
use drivers::Error;
use embassy_time::Timer;
use embedded_graphics_core::geometry::{OriginDimensions, Point, Size};
use embedded_graphics_core::pixelcolor::{IntoStorage, Rgb565, RgbColor};
use log::{info, warn};
use static_cell::StaticCell;

use crate::hardware::panel::spi_config;
use crate::hardware::{Panel, DISPLAY_SPI_HZ, TOUCH_SPI_HZ};

/// Touch polling period
const POLL_INTERVAL_MS: u64 = 20;
/// Edge length of the painted square in pixels
const BRUSH: u16 = 6;
/// RGB565 bytes of one brush square
const BRUSH_BYTES: usize = BRUSH as usize * BRUSH as usize * 2;

const PALETTE: [Rgb565; 4] = [Rgb565::RED, Rgb565::GREEN, Rgb565::BLUE, Rgb565::YELLOW];

#[embassy_executor::task()]
pub async fn paint_task(mut panel: Panel) {
    static BRUSH_PIXELS: StaticCell<[u8; BRUSH_BYTES]> = StaticCell::new();
    let mut pixels: Option<&'static mut [u8]> = Some(BRUSH_PIXELS.init([0; BRUSH_BYTES]));
    let mut pending: Option<DmaTransfer<&'static mut [u8]>> = None;
    let mut last = TouchState::Released;

    loop {
        Timer::after_millis(POLL_INTERVAL_MS).await;

        // the previous stroke has had a whole poll period to stream out
        if let Some(transfer) = pending.take() {
            pixels = Some(match panel.wait(transfer) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!("Paint failed: {e}");
                    e.buffer
                }
            });
        }

        let state = match sample(&mut panel) {
            Ok(state) => state,
            Err(e) => {
                warn!("Touch sampling failed: {e}");
                continue;
            }
        };

        match (last, state) {
            (TouchState::Released, TouchState::Pressed(point)) => info!("Touch down at {point:?}"),
            (TouchState::Pressed(point), TouchState::Released) => info!("Touch up at {point:?}"),
            _ => {}
        }

        if let TouchState::Pressed(point) = state {
            if let Some(buffer) = pixels.take() {
                let size = panel.size();
                paint(buffer, PALETTE[palette_index(point, size)]);
                match panel.blit_dma(brush(point, size), buffer, BlitMode::NonBlocking) {
                    Ok(Blit::Pending(transfer)) => pending = Some(transfer),
                    Ok(Blit::Done(buffer)) => pixels = Some(buffer),
                    Err(e) => {
                        warn!("Paint failed: {e}");
                        pixels = Some(e.buffer);
                    }
                }
            }
        }
        last = state;
    }
}

/// Poll the touch controller with the bus lowered to the touch clock
fn sample(panel: &mut Panel) -> Result<TouchState, Error> {
    let transport = panel.transport_mut();
    transport.drain()?;
    transport
        .bus_mut()?
        .apply_config(&spi_config(TOUCH_SPI_HZ))
        .map_err(|_| Error::Bus)?;

    let state = panel.poll_touch();

    panel
        .transport_mut()
        .bus_mut()?
        .apply_config(&spi_config(DISPLAY_SPI_HZ))
        .map_err(|_| Error::Bus)?;
    state
}

/// Fill a brush buffer with big-endian `color`
fn paint(buffer: &mut [u8], color: Rgb565) {
    let bytes = color.into_storage().to_be_bytes();
    for pixel in buffer.chunks_exact_mut(2) {
        pixel.copy_from_slice(&bytes);
    }
}

/// Square centered on `point`, pushed back inside the screen
fn brush(point: Point, size: Size) -> Rectangle {
    let half = i32::from(BRUSH / 2);
    let max_x = size.width as i32 - i32::from(BRUSH);
    let max_y = size.height as i32 - i32::from(BRUSH);
    let x = (point.x - half).clamp(0, max_x);
    let y = (point.y - half).clamp(0, max_y);
    Rectangle::new(x as u16, y as u16, BRUSH, BRUSH)
}

/// Vertical color bands
fn palette_index(point: Point, size: Size) -> usize {
    let band = size.width / PALETTE.len() as u32;
    let index = point.x.max(0) as u32 / band.max(1);
    (index as usize).min(PALETTE.len() - 1)
}
