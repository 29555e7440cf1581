//! Viewport presets the funnel is verified under.

use serde::Serialize;

/// Named viewport preset applied to the primary page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViewportPreset {
    /// 1280x720 desktop window
    Desktop,
    /// 375x812 phone (iPhone X class)
    Mobile,
}

impl ViewportPreset {
    /// Both presets in the order a run visits them
    pub const ALL: [Self; 2] = [Self::Desktop, Self::Mobile];

    /// Width in CSS pixels
    #[must_use]
    pub const fn width(self) -> u32 {
        match self {
            Self::Desktop => 1280,
            Self::Mobile => 375,
        }
    }

    /// Height in CSS pixels
    #[must_use]
    pub const fn height(self) -> u32 {
        match self {
            Self::Desktop => 720,
            Self::Mobile => 812,
        }
    }

    /// Whether the engine should emulate a mobile device
    #[must_use]
    pub const fn is_mobile(self) -> bool {
        matches!(self, Self::Mobile)
    }

    /// Lowercase name used in reports and file names
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

impl std::fmt::Display for ViewportPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}x{})", self.name(), self.width(), self.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_dimensions() {
        assert_eq!(
            (ViewportPreset::Desktop.width(), ViewportPreset::Desktop.height()),
            (1280, 720)
        );
        assert_eq!(
            (ViewportPreset::Mobile.width(), ViewportPreset::Mobile.height()),
            (375, 812)
        );
        assert!(ViewportPreset::Mobile.is_mobile());
        assert!(!ViewportPreset::Desktop.is_mobile());
    }

    #[test]
    fn test_run_order_is_desktop_then_mobile() {
        assert_eq!(
            ViewportPreset::ALL,
            [ViewportPreset::Desktop, ViewportPreset::Mobile]
        );
        assert_eq!(ViewportPreset::Mobile.to_string(), "mobile (375x812)");
    }
}
