use serde::{Deserialize, Serialize};
use std::fmt;

/// 8-bit RGB triple as written to three consecutive DMX slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Hue in degrees `[0, 360)`, saturation and value in percent `[0, 100]`.
///
/// Components are kept as floats so fades can move in sub-unit steps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Hsv {
    pub hue: f64,
    pub sat: f64,
    pub val: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_hsv(self) -> Hsv {
        let r = self.r as f64 / 255.0;
        let g = self.g as f64 / 255.0;
        let b = self.b as f64 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let val = max;
        if max == min {
            return Hsv::new(0.0, 0.0, val * 100.0);
        }

        let delta = max - min;
        let sat = delta / max;
        let rc = (max - r) / delta;
        let gc = (max - g) / delta;
        let bc = (max - b) / delta;
        let sector = if r == max {
            bc - gc
        } else if g == max {
            2.0 + rc - bc
        } else {
            4.0 + gc - rc
        };

        Hsv::new(sector * 60.0, sat * 100.0, val * 100.0)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

impl Hsv {
    pub const BLACK: Hsv = Hsv {
        hue: 0.0,
        sat: 0.0,
        val: 0.0,
    };

    /// Builds a color, wrapping the hue into `[0, 360)` and clamping
    /// saturation and value into `[0, 100]`.
    pub fn new(hue: f64, sat: f64, val: f64) -> Self {
        let hue = hue.rem_euclid(360.0);
        Self {
            hue: if hue >= 360.0 { 0.0 } else { hue },
            sat: sat.clamp(0.0, 100.0),
            val: val.clamp(0.0, 100.0),
        }
    }

    /// Same hue and saturation at `factor` times the value.
    pub fn dimmed(self, factor: f64) -> Self {
        Self::new(self.hue, self.sat, self.val * factor)
    }

    /// Point halfway between two colors, component-wise.
    pub fn midpoint(self, other: Hsv) -> Self {
        Self::new(
            (self.hue + other.hue) / 2.0,
            (self.sat + other.sat) / 2.0,
            (self.val + other.val) / 2.0,
        )
    }

    pub fn to_rgb(self) -> Rgb {
        let h = self.hue.rem_euclid(360.0) / 360.0;
        let s = (self.sat / 100.0).clamp(0.0, 1.0);
        let v = (self.val / 100.0).clamp(0.0, 1.0);

        let (r, g, b) = if s == 0.0 {
            (v, v, v)
        } else {
            let sector = (h * 6.0).floor();
            let f = h * 6.0 - sector;
            let p = v * (1.0 - s);
            let q = v * (1.0 - s * f);
            let t = v * (1.0 - s * (1.0 - f));
            match sector as i64 % 6 {
                0 => (v, t, p),
                1 => (q, v, p),
                2 => (p, v, t),
                3 => (p, q, v),
                4 => (t, p, v),
                _ => (v, p, q),
            }
        };

        Rgb::new(to_byte(r), to_byte(g), to_byte(b))
    }
}

fn to_byte(unit: f64) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}

impl From<Rgb> for Hsv {
    fn from(rgb: Rgb) -> Self {
        rgb.to_hsv()
    }
}

impl From<Hsv> for Rgb {
    fn from(hsv: Hsv) -> Self {
        hsv.to_rgb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_round_trip(rgb: Rgb) {
        let back = rgb.to_hsv().to_rgb();
        let close = |a: u8, b: u8| (a as i16 - b as i16).abs() <= 1;
        assert!(
            close(rgb.r, back.r) && close(rgb.g, back.g) && close(rgb.b, back.b),
            "{rgb} came back as {back}"
        );
    }

    #[test]
    fn primary_colors_convert_exactly() {
        assert_eq!(Rgb::new(255, 0, 0).to_hsv(), Hsv::new(0.0, 100.0, 100.0));
        assert_eq!(Rgb::new(0, 255, 0).to_hsv(), Hsv::new(120.0, 100.0, 100.0));
        assert_eq!(Rgb::new(0, 0, 255).to_hsv(), Hsv::new(240.0, 100.0, 100.0));
        assert_eq!(Hsv::new(60.0, 100.0, 100.0).to_rgb(), Rgb::new(255, 255, 0));
        assert_eq!(Hsv::BLACK.to_rgb(), Rgb::BLACK);
        assert_eq!(Hsv::new(0.0, 0.0, 100.0).to_rgb(), Rgb::new(255, 255, 255));
    }

    #[test]
    fn round_trips_boundaries() {
        let edges = [0u8, 1, 127, 128, 254, 255];
        for &r in &edges {
            for &g in &edges {
                for &b in &edges {
                    assert_round_trip(Rgb::new(r, g, b));
                }
            }
        }
    }

    #[test]
    fn round_trips_coarse_grid() {
        for r in (0..=255u8).step_by(5) {
            for g in (0..=255u8).step_by(5) {
                for b in (0..=255u8).step_by(5) {
                    assert_round_trip(Rgb::new(r, g, b));
                }
            }
        }
    }

    #[test]
    fn round_trips_random_colors() {
        let mut rng = StdRng::seed_from_u64(0x5EED_C010);
        for _ in 0..100_000 {
            let mut channel = || rng.gen_range(0..=255u8);
            assert_round_trip(Rgb::new(channel(), channel(), channel()));
        }
    }

    #[test]
    fn hue_stays_in_range() {
        for rgb in [Rgb::new(255, 0, 1), Rgb::new(200, 10, 199), Rgb::new(1, 0, 0)] {
            let hsv = rgb.to_hsv();
            assert!((0.0..360.0).contains(&hsv.hue), "{hsv:?}");
        }
        assert_eq!(Hsv::new(360.0, 50.0, 50.0).hue, 0.0);
        assert_eq!(Hsv::new(-30.0, 150.0, -1.0), Hsv::new(330.0, 100.0, 0.0));
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(Rgb::from_hex("#7e288c"), Some(Rgb::new(0x7e, 0x28, 0x8c)));
        assert_eq!(Rgb::from_hex("ffb51d"), Some(Rgb::new(0xff, 0xb5, 0x1d)));
        assert_eq!(Rgb::from_hex("#12345"), None);
        assert_eq!(Rgb::from_hex("#zz0000"), None);
        assert_eq!(Rgb::new(14, 245, 26).to_hex(), "#0ef51a");
    }
}
