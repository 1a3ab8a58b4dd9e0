//! Orientation model shared by the display and the touch sampler
//!
//! The display needs a memory access control (MADCTL) pattern per rotation and
//! the touch sampler needs an axis remap per rotation. Both tables live here so
//! they are keyed by the same [`Rotation`] value.

use core::fmt::{Display, Formatter};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Mounting orientation of the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rotation {
    #[default]
    Portrait = 0,
    Landscape = 1,
    InvertedPortrait = 2,
    InvertedLandscape = 3,
}

impl Display for Rotation {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Rotation::Portrait => write!(f, "Portrait"),
            Rotation::Landscape => write!(f, "Landscape"),
            Rotation::InvertedPortrait => write!(f, "Inverted portrait"),
            Rotation::InvertedLandscape => write!(f, "Inverted landscape"),
        }
    }
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Portrait,
        Rotation::Landscape,
        Rotation::InvertedPortrait,
        Rotation::InvertedLandscape,
    ];

    /// Wrapping conversion, `index` is taken modulo 4
    pub const fn from_index(index: u8) -> Self {
        match index % 4 {
            0 => Rotation::Portrait,
            1 => Rotation::Landscape,
            2 => Rotation::InvertedPortrait,
            _ => Rotation::InvertedLandscape,
        }
    }

    /// True for the 90° and 270° orientations
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Landscape | Rotation::InvertedLandscape)
    }

    /// MADCTL pattern for this rotation
    ///
    /// The MSP2807 panel is wired with BGR sub-pixels, so an RGB ordered
    /// pixel stream needs the `BGR` bit and a BGR ordered stream does not.
    pub fn address_mode(self, color_order: ColorOrder) -> AddressMode {
        let mode = match self {
            Rotation::Portrait => AddressMode::MX,
            Rotation::Landscape => AddressMode::MV,
            Rotation::InvertedPortrait => AddressMode::MY,
            Rotation::InvertedLandscape => AddressMode::MX | AddressMode::MY | AddressMode::MV,
        };
        match color_order {
            ColorOrder::Rgb => mode | AddressMode::BGR,
            ColorOrder::Bgr => mode,
        }
    }

    /// Maps a rescaled touch position to panel pixel coordinates
    ///
    /// `x` and `y` are along the physical touch axes, in `0..=width` and
    /// `0..=height` of the rotation 0 (native) panel.
    pub fn remap_touch(self, x: u16, y: u16, width: u16, height: u16) -> (u16, u16) {
        match self {
            Rotation::Portrait => (x, height.saturating_sub(y)),
            Rotation::Landscape => (height.saturating_sub(y), width.saturating_sub(x)),
            Rotation::InvertedPortrait => (width.saturating_sub(x), y),
            Rotation::InvertedLandscape => (y, x),
        }
    }
}

/// Sub-pixel order of the pixel stream handed to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ColorOrder {
    #[default]
    Rgb,
    Bgr,
}

bitflags! {
    /// Memory access control register (MADCTL, 0x36)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AddressMode: u8 {
        /// Row address order
        const MY  = 0x80;
        /// Column address order
        const MX  = 0x40;
        /// Row/column exchange
        const MV  = 0x20;
        /// Vertical refresh order
        const ML  = 0x10;
        /// BGR sub-pixel order
        const BGR = 0x08;
        /// Horizontal refresh order
        const MH  = 0x04;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AddressMode {
    fn format(&self, f: defmt::Formatter) {
        for (name, _) in self.iter_names() {
            defmt::write!(f, "{} ", name);
        }
    }
}

/// Panel geometry
///
/// Native dimensions are those of rotation 0. The active dimensions follow
/// the current rotation and are always a permutation of the native ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayGeometry {
    pub native_width: u16,
    pub native_height: u16,
    pub rotation: Rotation,
    pub color_order: ColorOrder,
}

impl Default for DisplayGeometry {
    /// MSP2807: 240x320 portrait, RGB pixel stream
    fn default() -> Self {
        Self {
            native_width: 240,
            native_height: 320,
            rotation: Rotation::Portrait,
            color_order: ColorOrder::Rgb,
        }
    }
}

impl DisplayGeometry {
    pub const fn new(
        native_width: u16,
        native_height: u16,
        rotation: Rotation,
        color_order: ColorOrder,
    ) -> Self {
        Self {
            native_width,
            native_height,
            rotation,
            color_order,
        }
    }

    /// `(width, height)` in the current rotation
    pub const fn active_size(&self) -> (u16, u16) {
        if self.rotation.swaps_axes() {
            (self.native_height, self.native_width)
        } else {
            (self.native_width, self.native_height)
        }
    }

    pub const fn active_width(&self) -> u16 {
        self.active_size().0
    }

    pub const fn active_height(&self) -> u16 {
        self.active_size().1
    }

    /// Number of pixels on the panel
    pub const fn pixel_count(&self) -> usize {
        self.native_width as usize * self.native_height as usize
    }

    pub fn address_mode(&self) -> AddressMode {
        self.rotation.address_mode(self.color_order)
    }
}
