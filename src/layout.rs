use crate::config::OverlayConfig;

pub const TOKEN_CLASSNAME: &str = "clockToken";
pub const ABILITY_CLASSNAME: &str = "ability";

/// Width the configured radius is calibrated against; smaller player windows
/// scale the circle down proportionally.
const REFERENCE_WIDTH: f64 = 1920.0;

/// Parameters handed to the external circular layout library. Everything the
/// renderer needs is derived here from the synchronized config; the
/// trigonometric placement itself stays outside this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutParams {
    pub slots: i32,
    pub radius: i32,
    pub token_class: String,
    pub center_left: String,
    pub center_top: String,
}

impl LayoutParams {
    pub fn derive(config: &OverlayConfig) -> Self {
        Self {
            slots: config.players,
            radius: config.radius,
            token_class: format!("{TOKEN_CLASSNAME} {TOKEN_CLASSNAME}-{}", config.token_size),
            center_left: format!("{}%", config.x),
            center_top: format!("{}%", config.y),
        }
    }

    /// Radius in device pixels for the given player window, falling back to
    /// the configured value when no resolution has been observed yet.
    pub fn scaled_radius(&self, resolution: Option<DisplayResolution>) -> f64 {
        match resolution {
            Some(resolution) => f64::from(self.radius) * resolution.scale(),
            None => f64::from(self.radius),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayResolution {
    pub width: u32,
    pub height: u32,
}

impl DisplayResolution {
    pub fn scale(&self) -> f64 {
        f64::from(self.width) / REFERENCE_WIDTH
    }
}

/// Parses the host context's `"845x480"`-style resolution string. Anything
/// that does not look like `WxH` yields `None` and the previous resolution is
/// kept.
pub fn parse_display_resolution(raw: &str) -> Option<DisplayResolution> {
    let (width, height) = raw.trim().split_once('x')?;
    let width = width.parse::<u32>().ok()?;
    let height = height.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(DisplayResolution { width, height })
}

#[cfg(test)]
mod tests {
    use super::{parse_display_resolution, DisplayResolution, LayoutParams};
    use crate::config::OverlayConfig;

    #[test]
    fn derives_params_from_config() {
        let params = LayoutParams::derive(&OverlayConfig::default());
        assert_eq!(params.slots, 12);
        assert_eq!(params.radius, 210);
        assert_eq!(params.token_class, "clockToken clockToken-10");
        assert_eq!(params.center_left, "50%");
        assert_eq!(params.center_top, "50%");
    }

    #[test]
    fn parses_resolution_strings() {
        assert_eq!(
            parse_display_resolution("845x480"),
            Some(DisplayResolution {
                width: 845,
                height: 480
            })
        );
        assert!(parse_display_resolution("845 x 480").is_none());
        assert!(parse_display_resolution("0x480").is_none());
        assert!(parse_display_resolution("garbage").is_none());
    }

    #[test]
    fn scales_radius_to_player_window() {
        let params = LayoutParams::derive(&OverlayConfig::default());
        let small = parse_display_resolution("845x480");
        let scaled = params.scaled_radius(small);
        assert!((scaled - 210.0 * 845.0 / 1920.0).abs() < f64::EPSILON);
        assert!((params.scaled_radius(None) - 210.0).abs() < f64::EPSILON);
    }
}
