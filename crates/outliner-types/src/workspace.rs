//! Workspaces: independent partition labels inside a tenant database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::WorkspaceId;
use crate::validate::InvalidField;

/// Name of the workspace created with every tenant database.
pub const DEFAULT_WORKSPACE_NAME: &str = "Default";

/// Color of the workspace created with every tenant database.
pub const DEFAULT_WORKSPACE_COLOR: Color = Color([0x42, 0x85, 0xF4]);

/// An RGB color, written as `#RRGGBB`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 3]);

impl Color {
    /// Parse `#RRGGBB` (the `#` is optional, hex digits in either case).
    pub fn parse(s: &str) -> Result<Self, InvalidField> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidField::new(
                "color",
                format!("'{s}' is not a #RRGGBB hex color"),
            ));
        }
        let mut rgb = [0u8; 3];
        for (i, chunk) in rgb.iter_mut().enumerate() {
            *chunk = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| InvalidField::new("color", e.to_string()))?;
        }
        Ok(Self(rgb))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02X}{g:02X}{b:02X}")
    }
}

impl FromStr for Color {
    type Err = InvalidField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A workspace row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub color: Color,
}
