//! Neon theme for the stats display
//!
//! Color palette plus the mapping from semantic tones to terminal styles.

use crossterm::style::{Attribute, Color, ContentStyle, StyledContent, Stylize};

/// Neon color palette
pub struct Theme;

impl Theme {
    // ═══════════════════════════════════════════════════════════════════════
    // CORE PALETTE
    // ═══════════════════════════════════════════════════════════════════════

    /// Primary: #00fff2 (cyan neon)
    pub const PRIMARY: Color = Color::Rgb { r: 0x00, g: 0xff, b: 0xf2 };

    /// Secondary: #ff00ff (magenta)
    pub const SECONDARY: Color = Color::Rgb { r: 0xff, g: 0x00, b: 0xff };

    /// Accent: #ffff00 (yellow)
    pub const ACCENT: Color = Color::Rgb { r: 0xff, g: 0xff, b: 0x00 };

    /// Text: #e0e0e0 (soft white)
    pub const TEXT: Color = Color::Rgb { r: 0xe0, g: 0xe0, b: 0xe0 };

    /// Dim: #404050 (muted)
    pub const DIM: Color = Color::Rgb { r: 0x40, g: 0x40, b: 0x50 };

    /// Success: #00ff00 (green)
    pub const SUCCESS: Color = Color::Rgb { r: 0x00, g: 0xff, b: 0x00 };

    /// Warning: #ffaa00 (orange)
    pub const WARNING: Color = Color::Rgb { r: 0xff, g: 0xaa, b: 0x00 };

    /// Error: #ff0040 (red)
    pub const ERROR: Color = Color::Rgb { r: 0xff, g: 0x00, b: 0x40 };

    // ═══════════════════════════════════════════════════════════════════════
    // STYLE HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Terminal style for a tone
    pub fn style(tone: Tone) -> ContentStyle {
        let style = ContentStyle::new();
        match tone {
            Tone::Plain => style,
            Tone::Label => style.with(Self::SUCCESS),
            Tone::Value => style.with(Self::TEXT).attribute(Attribute::Bold),
            Tone::Address => style.with(Self::SECONDARY),
            Tone::Download => style.with(Self::PRIMARY),
            Tone::Upload => style.with(Self::ERROR),
            Tone::Muted => style.with(Self::DIM),
            Tone::Notice => style.with(Self::ACCENT),
            Tone::Warning => style.with(Self::WARNING).attribute(Attribute::Bold),
        }
    }

    /// Apply a tone to text
    pub fn paint(text: &str, tone: Tone) -> StyledContent<&str> {
        Self::style(tone).apply(text)
    }
}

/// Semantic role of a piece of text on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Plain,
    /// Field labels ("Speed: ")
    Label,
    /// Field values
    Value,
    /// Peer addresses
    Address,
    /// Download speed column
    Download,
    /// Upload speed column
    Upload,
    /// Verbose peer columns
    Muted,
    /// One-off status messages
    Notice,
    /// Error prefix
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_tone_has_no_color() {
        let style = Theme::style(Tone::Plain);
        assert_eq!(style.foreground_color, None);
        assert!(style.attributes.is_empty());
    }

    #[test]
    fn test_value_is_bold() {
        let style = Theme::style(Tone::Value);
        assert!(style.attributes.has(Attribute::Bold));
        assert_eq!(style.foreground_color, Some(Theme::TEXT));
    }

    #[test]
    fn test_speed_columns_differ() {
        assert_ne!(
            Theme::style(Tone::Download).foreground_color,
            Theme::style(Tone::Upload).foreground_color
        );
    }
}
