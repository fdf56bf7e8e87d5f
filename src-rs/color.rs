//! Color binning: ordered predicate/color pairs, first match wins.

use std::fmt;

use image::Rgba;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HeatmapError, Result};

/// Canonical RGBA8 color. Hex strings and packed integers both land here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const WHITE: Color = Color([255, 255, 255, 255]);
    pub const BLACK: Color = Color([0, 0, 0, 255]);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    /// Packed `0xRRGGBB`, as JS configs write `0xff0000`.
    pub fn from_packed(value: u32) -> Self {
        Self([
            ((value >> 16) & 0xff) as u8,
            ((value >> 8) & 0xff) as u8,
            (value & 0xff) as u8,
            255,
        ])
    }

    pub fn with_alpha(self, alpha: u8) -> Self {
        let [r, g, b, _] = self.0;
        Self([r, g, b, alpha])
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }

    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.0;
        if a == 255 {
            format!("#{r:02x}{g:02x}{b:02x}")
        } else {
            format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }

    pub fn luma(self) -> f64 {
        let [r, g, b, _] = self.0;
        (0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b)) / 255.0
    }

    /// Black or white, whichever reads better on top of `self`.
    pub fn contrasting(self) -> Color {
        if self.luma() > 0.6 {
            Color([0, 0, 0, 220])
        } else {
            Color([255, 255, 255, 220])
        }
    }

    /// Parse a color from config JSON. Accepts `#rgb`, `#rrggbb`, `#rrggbbaa`,
    /// `0xrrggbb`, `rgba(r,g,b,a)` strings and packed integers.
    pub fn parse_value(value: &Value) -> Result<Color> {
        match value {
            Value::Number(n) => {
                let packed = n
                    .as_u64()
                    .filter(|v| *v <= 0xff_ffff)
                    .ok_or_else(|| {
                        HeatmapError::invalid_color_spec(format!(
                            "packed color must be an integer in 0..=0xffffff, got {n}"
                        ))
                    })?;
                Ok(Color::from_packed(packed as u32))
            }
            Value::String(s) => Color::parse_str(s),
            other => Err(HeatmapError::invalid_color_spec(format!(
                "color must be a string or integer, got {other}"
            ))),
        }
    }

    pub fn parse_str(raw: &str) -> Result<Color> {
        let s = raw.trim();
        let bad = || HeatmapError::invalid_color_spec(format!("unrecognized color '{raw}'"));

        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex_digits(hex).ok_or_else(bad);
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let packed = u32::from_str_radix(hex, 16).map_err(|_| bad())?;
            if packed > 0xff_ffff {
                return Err(bad());
            }
            return Ok(Color::from_packed(packed));
        }

        let lower = s.to_ascii_lowercase();
        if lower.starts_with("rgba(") && lower.ends_with(')') {
            let body = &lower[5..lower.len() - 1];
            let parts: Vec<&str> = body.split(',').map(str::trim).collect();
            if parts.len() != 4 {
                return Err(bad());
            }
            let channel = |p: &str| -> Option<u8> {
                p.parse::<f64>()
                    .ok()
                    .map(|v| v.round().clamp(0.0, 255.0) as u8)
            };
            let r = channel(parts[0]).ok_or_else(bad)?;
            let g = channel(parts[1]).ok_or_else(bad)?;
            let b = channel(parts[2]).ok_or_else(bad)?;
            let alpha_value = parts[3].parse::<f64>().map_err(|_| bad())?;
            let a = if alpha_value <= 1.0 {
                (alpha_value * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                alpha_value.round().clamp(0.0, 255.0) as u8
            };
            return Ok(Color([r, g, b, a]));
        }

        Err(bad())
    }
}

fn parse_hex_digits(hex: &str) -> Option<Color> {
    if !hex.is_ascii() {
        return None;
    }
    let byte = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 4];
            for (i, ch) in hex.chars().enumerate() {
                let v = ch.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            out[3] = 255;
            Some(Color(out))
        }
        6 => Some(Color([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255])),
        8 => Some(Color([
            byte(&hex[0..2])?,
            byte(&hex[2..4])?,
            byte(&hex[4..6])?,
            byte(&hex[6..8])?,
        ])),
        _ => None,
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Color::parse_value(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A comparison against one threshold, written `=0`, `>=4`, `<2.5`, ...
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub op: CompareOp,
    pub threshold: f64,
}

impl Predicate {
    pub fn parse(raw: &str) -> Result<Predicate> {
        let s = raw.trim();
        // Two-character operators first so `>=` is not read as `>`.
        let table = [
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            ("!=", CompareOp::Ne),
            ("==", CompareOp::Eq),
            ("=", CompareOp::Eq),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
        ];
        let (op, rest) = table
            .iter()
            .find_map(|(prefix, op)| s.strip_prefix(prefix).map(|rest| (*op, rest)))
            .ok_or_else(|| {
                HeatmapError::invalid_color_spec(format!(
                    "bin '{raw}' must start with one of = == != < <= > >="
                ))
            })?;
        let threshold = rest.trim().parse::<f64>().map_err(|_| {
            HeatmapError::invalid_color_spec(format!("bin '{raw}' has a non-numeric threshold"))
        })?;
        if !threshold.is_finite() {
            return Err(HeatmapError::invalid_color_spec(format!(
                "bin '{raw}' threshold must be finite"
            )));
        }
        Ok(Predicate { op, threshold })
    }

    pub fn matches(&self, value: f64) -> bool {
        let t = self.threshold;
        match self.op {
            CompareOp::Eq => value == t,
            CompareOp::Ne => value != t,
            CompareOp::Lt => value < t,
            CompareOp::Le => value <= t,
            CompareOp::Gt => value > t,
            CompareOp::Ge => value >= t,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.threshold)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub predicate: Predicate,
    pub color: Color,
}

/// Color configuration as written in view config JSON:
/// `{"bins": ["=0", ">=4"], "colors": ["#ffffff", 16711680], "default": "#cccccc"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColorConfig {
    #[serde(default)]
    pub bins: Vec<String>,
    #[serde(default)]
    pub colors: Vec<Value>,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Ordered bins plus an optional catch-all color.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSpec {
    bins: Vec<Bin>,
    default: Option<Color>,
}

impl ColorSpec {
    pub fn new(bins: Vec<Bin>, default: Option<Color>) -> Result<Self> {
        if bins.is_empty() && default.is_none() {
            return Err(HeatmapError::invalid_color_spec(
                "at least one bin or a default color is required",
            ));
        }
        Ok(Self { bins, default })
    }

    pub fn from_config(config: &ColorConfig) -> Result<Self> {
        if config.bins.len() != config.colors.len() {
            return Err(HeatmapError::invalid_color_spec(format!(
                "{} bins but {} colors",
                config.bins.len(),
                config.colors.len()
            )));
        }
        let bins = config
            .bins
            .iter()
            .zip(&config.colors)
            .map(|(bin, color)| {
                Ok(Bin {
                    predicate: Predicate::parse(bin)?,
                    color: Color::parse_value(color)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let default = config.default.as_ref().map(Color::parse_value).transpose()?;
        Self::new(bins, default)
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn default_color(&self) -> Option<Color> {
        self.default
    }

    /// Index of the first bin whose predicate matches `value`.
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        self.bins.iter().position(|bin| bin.predicate.matches(value))
    }

    pub fn color_for(&self, value: f64) -> Result<Color> {
        match self.bin_index(value) {
            Some(idx) => Ok(self.bins[idx].color),
            None => self.default.ok_or(HeatmapError::NoMatchingBin { value }),
        }
    }

    /// Whether the union of predicates covers every real number. Coverage is
    /// constant between consecutive thresholds, so probing each threshold and
    /// one point inside every gap is exact.
    pub fn covers_all_reals(&self) -> bool {
        if self.default.is_some() {
            return true;
        }
        let mut thresholds: Vec<f64> = self.bins.iter().map(|b| b.predicate.threshold).collect();
        if thresholds.is_empty() {
            return false;
        }
        thresholds.sort_by(|a, b| a.total_cmp(b));
        thresholds.dedup();

        let mut samples = Vec::with_capacity(thresholds.len() * 2 + 1);
        samples.push(thresholds[0] - 1.0);
        for pair in thresholds.windows(2) {
            samples.push(pair[0]);
            samples.push(pair[0] + (pair[1] - pair[0]) / 2.0);
        }
        let last = thresholds[thresholds.len() - 1];
        samples.push(last);
        samples.push(last + 1.0);

        samples.iter().all(|v| self.bin_index(*v).is_some())
    }

    /// Reject a value domain that some cell would fail to color. Runs at
    /// construction and update time so drawing never hits `NoMatchingBin`.
    /// Covering every real says nothing about NaN, so NaN cells are always
    /// checked.
    pub fn validate_values<'a, I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        if self.default.is_some() {
            return Ok(());
        }
        let covered = self.covers_all_reals();
        for value in values {
            if covered && !value.is_nan() {
                continue;
            }
            if self.bin_index(*value).is_none() {
                return Err(HeatmapError::NoMatchingBin { value: *value });
            }
        }
        Ok(())
    }

    /// `(label, color)` pairs for the legend, default last.
    pub fn legend_entries(&self) -> Vec<(String, Color)> {
        let mut out: Vec<(String, Color)> = self
            .bins
            .iter()
            .map(|b| (b.predicate.to_string(), b.color))
            .collect();
        if let Some(default) = self.default {
            out.push(("other".to_string(), default));
        }
        out
    }
}
