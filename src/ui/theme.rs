//! Colors for the update screen, matched to the host application's themes.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// A 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    const fn hex(value: u32) -> Self {
        Self((value >> 16) as u8, (value >> 8) as u8, value as u8)
    }
}

/// The colors the update screen uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Rgb,
    pub header_text: Rgb,
    pub item_text: Rgb,
    pub accent: Rgb,
    pub dim: Rgb,
    pub progress: Rgb,
    pub progress_bg: Rgb,
}

const fn palette(bg: u32, header: u32, item: u32, accent: u32, dim: u32, progress: u32, progress_bg: u32) -> Palette {
    Palette {
        background: Rgb::hex(bg),
        header_text: Rgb::hex(header),
        item_text: Rgb::hex(item),
        accent: Rgb::hex(accent),
        dim: Rgb::hex(dim),
        progress: Rgb::hex(progress),
        progress_bg: Rgb::hex(progress_bg),
    }
}

/// Used when the settings name no known theme.
pub const DEFAULT_THEME: &str = "Classic iPod";

/// Color for the "Do not power off!" overlay, whatever the theme.
pub const WARNING: Rgb = Rgb::hex(0xFF4444);

const THEMES: &[(&str, Palette)] = &[
    ("Classic iPod", palette(0xB8B8B8, 0x000000, 0x000000, 0x4A90E2, 0x808080, 0x4A90E2, 0x909090)),
    ("Dark Blue", palette(0x1A1A2E, 0xE0E0E0, 0xFFFFFF, 0x5390D9, 0x666666, 0x5390D9, 0x333333)),
    ("Dark", palette(0x1C1C1C, 0xFFFFFF, 0xFFFFFF, 0xFFFFFF, 0x777777, 0xFFFFFF, 0x444444)),
    ("Matrix Green", palette(0x0D0D0D, 0x00FF41, 0x00FF41, 0x00FF41, 0x004400, 0x00FF41, 0x002200)),
    ("Retro Amber", palette(0x1A0F00, 0xFFAA00, 0xFFAA00, 0xFFAA00, 0x664400, 0xFFAA00, 0x442200)),
    ("Purple Haze", palette(0x1A0A2E, 0xE0C0FF, 0xE0C0FF, 0xAA66FF, 0x6633AA, 0xAA66FF, 0x331155)),
    ("Light", palette(0xFFFFFF, 0x000000, 0x000000, 0x007AFF, 0x888888, 0x007AFF, 0xDDDDDD)),
    ("Nord", palette(0x2E3440, 0xECEFF4, 0xECEFF4, 0x88C0D0, 0x4C566A, 0x88C0D0, 0x434C5E)),
    ("Solarized Dark", palette(0x002B36, 0x93A1A1, 0x839496, 0x2AA198, 0x586E75, 0x268BD2, 0x073642)),
    ("Cyberpunk", palette(0x0A0E27, 0x00FFFF, 0xFF00FF, 0x00FFFF, 0x4B0082, 0xFF00FF, 0x2A2F4A)),
    ("Coffee", palette(0x2C1810, 0xE8D4B8, 0xD4A574, 0xC1986B, 0x5C4033, 0xD2B48C, 0x4A3528)),
    ("Ocean", palette(0x001F3F, 0x7FDBFF, 0xB8E6F5, 0x00D4FF, 0x336B87, 0x00D4FF, 0x003D5C)),
    ("Forest", palette(0x0F2027, 0xC5E1A5, 0xA5D6A7, 0x76FF03, 0x4A6B3F, 0x8BC34A, 0x1B5E20)),
    ("Sunset", palette(0x1A0A0A, 0xFFD700, 0xFFA500, 0xFF4500, 0x8B4513, 0xFF8C00, 0x4A2A2A)),
    ("Neon", palette(0x000000, 0xFF10F0, 0x00FF00, 0x00FFFF, 0x444444, 0xFF10F0, 0x1A1A1A)),
    ("Midnight", palette(0x0C0C1E, 0xC8C8FF, 0xB0B0E8, 0x6E6EFF, 0x4A4A7E, 0x8080FF, 0x2A2A5E)),
    ("Gruvbox", palette(0x282828, 0xEBDBB2, 0xEBDBB2, 0xFABD2F, 0x7C6F64, 0x83A598, 0x3C3836)),
    ("Candy", palette(0xFFE5F4, 0x8B008B, 0xC71585, 0xFF1493, 0xBA55D3, 0xFF69B4, 0xFFC0E5)),
];

impl Palette {
    /// Looks a theme up by its exact name.
    #[must_use]
    pub fn named(name: &str) -> Option<Self> {
        THEMES.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
    }

    /// The palette for an optional theme name; unknown names get the default.
    #[must_use]
    pub fn for_theme(name: Option<&str>) -> Self {
        name.and_then(Self::named).unwrap_or_else(Self::classic)
    }

    #[must_use]
    pub const fn classic() -> Self {
        THEMES[0].1
    }

    /// Every theme name, default first.
    pub fn names() -> impl Iterator<Item = &'static str> {
        THEMES.iter().map(|(n, _)| *n)
    }
}

#[derive(Deserialize)]
struct HostSettings {
    #[serde(default)]
    theme: Option<String>,
}

/// Reads the theme name from the host settings file.
///
/// Any problem reading or parsing the file yields `None`; the screen then
/// uses the default palette.
#[must_use]
pub fn load_theme_name(settings_path: &Path) -> Option<String> {
    let content = fs::read_to_string(settings_path)
        .map_err(|e| debug!("No host settings at {}: {}", settings_path.display(), e))
        .ok()?;
    serde_json::from_str::<HostSettings>(&content)
        .map_err(|e| debug!("Unreadable host settings: {}", e))
        .ok()?
        .theme
        .filter(|t| !t.is_empty())
}
