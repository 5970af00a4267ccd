//! Color and font weight value types shared by the grid and the renderer.

/// 24-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Standard ANSI 16-color palette
const ANSI_PALETTE: [Rgb; 16] = [
    Rgb::new(0, 0, 0),       // black
    Rgb::new(128, 0, 0),     // dark red
    Rgb::new(0, 128, 0),     // dark green
    Rgb::new(128, 128, 0),   // dark yellow
    Rgb::new(0, 0, 128),     // dark blue
    Rgb::new(128, 0, 128),   // dark magenta
    Rgb::new(0, 128, 128),   // dark cyan
    Rgb::new(192, 192, 192), // light gray
    Rgb::new(128, 128, 128), // dark gray
    Rgb::new(255, 0, 0),     // red
    Rgb::new(0, 255, 0),     // green
    Rgb::new(255, 255, 0),   // yellow
    Rgb::new(0, 0, 255),     // blue
    Rgb::new(255, 0, 255),   // magenta
    Rgb::new(0, 255, 255),   // cyan
    Rgb::new(255, 255, 255), // white
];

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const LIGHT_GRAY: Rgb = Rgb::new(192, 192, 192);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    /// Default foreground for new and erased cells
    pub const DEFAULT_FG: Rgb = Rgb::LIGHT_GRAY;
    /// Default background for new and erased cells
    pub const DEFAULT_BG: Rgb = Rgb::BLACK;

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Look up an index in the ANSI 16-color palette.
    ///
    /// Indices outside 0-15 map to white.
    pub fn from_ansi(index: u32) -> Self {
        usize::try_from(index)
            .ok()
            .and_then(|i| ANSI_PALETTE.get(i))
            .copied()
            .unwrap_or(Rgb::WHITE)
    }

    /// Look up an index in the xterm 256-color palette (`38;5;n` / `48;5;n`).
    ///
    /// 0-15 use the ANSI table, 16-231 the 6x6x6 color cube, 232-255 the grayscale ramp.
    /// Anything larger maps to white, same as [`Rgb::from_ansi`].
    pub fn from_xterm256(index: u32) -> Self {
        match index {
            0..=15 => Self::from_ansi(index),
            16..=231 => {
                let n = index - 16;
                let level = |v: u32| if v == 0 { 0 } else { (55 + v * 40) as u8 };
                Rgb::new(level(n / 36), level((n / 6) % 6), level(n % 6))
            }
            232..=255 => {
                let gray = (8 + (index - 232) * 10) as u8;
                Rgb::new(gray, gray, gray)
            }
            _ => Rgb::WHITE,
        }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Font weight of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontWeight {
    Light,
    #[default]
    Normal,
    Bold,
    SemiBold,
    ExtraBold,
    Black,
}

impl FontWeight {
    /// CSS-style numeric weight
    pub fn value(self) -> u16 {
        match self {
            FontWeight::Light => 300,
            FontWeight::Normal => 400,
            FontWeight::SemiBold => 600,
            FontWeight::Bold => 700,
            FontWeight::ExtraBold => 800,
            FontWeight::Black => 900,
        }
    }

    /// Whether a renderer limited to normal/bold should draw this weight bold
    pub fn is_bold(self) -> bool {
        self.value() >= FontWeight::SemiBold.value()
    }
}
