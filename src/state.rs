//! Garment editing state: base colour, optional pattern, and the ordered
//! text/graphic layer lists.
//!
//! The state is an immutable snapshot: every setter consumes the old value
//! and returns a new one, so a mutation is always an atomic whole-state
//! replacement.  The owning session stores the snapshot in a
//! [`GarmentSession`](crate::async_compose::GarmentSession) component; each
//! replacement starts exactly one composition cycle.
//!
//! List order is z-order.  Later entries paint over earlier ones, and all
//! graphic layers paint over all text layers — see
//! [`Compositor::compose`](crate::compose::Compositor::compose).

use serde::{Deserialize, Serialize};

use crate::{assets::AssetRef, region::Placement};

/// Error returned when a layer violates its construction invariants.
#[derive(Debug, PartialEq)]
pub enum LayerError {
    /// A text layer's font size must be strictly positive.
    InvalidFontSize { font_size_px: f32 },
    /// A graphic layer's destination size must be strictly positive on both
    /// axes.
    InvalidGraphicSize { width_px: f32, height_px: f32 },
    /// A colour string was not of the form `#rrggbb`.
    InvalidColor { input: String },
}

impl std::fmt::Display for LayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerError::InvalidFontSize { font_size_px } => {
                write!(f, "text font size must be > 0 (got {font_size_px})")
            }
            LayerError::InvalidGraphicSize {
                width_px,
                height_px,
            } => write!(
                f,
                "graphic size must be > 0 on both axes (got {width_px}×{height_px})"
            ),
            LayerError::InvalidColor { input } => {
                write!(f, "colour must be of the form #rrggbb (got {input:?})")
            }
        }
    }
}

impl std::error::Error for LayerError {}

/// An 8-bit sRGB colour.  Persisted as a `#rrggbb` hex string, which is the
/// form the storage payload uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const WHITE: Rgb8 = Rgb8 {
        r: 255,
        g: 255,
        b: 255,
    };
    pub const BLACK: Rgb8 = Rgb8 { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a `#rrggbb` hex string.
    pub fn from_hex(s: &str) -> Result<Self, LayerError> {
        let invalid = || LayerError::InvalidColor {
            input: s.to_string(),
        };
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let parse = |range| u8::from_str_radix(&hex[range], 16).map_err(|_| invalid());
        Ok(Self {
            r: parse(0..2)?,
            g: parse(2..4)?,
            b: parse(4..6)?,
        })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Opaque layer identifier.  The editing session mints these; the
/// persistence payload stores them verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// A layer's displacement from its panel centre, in surface pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f32,
    pub dy: f32,
}

impl Offset {
    pub const ZERO: Offset = Offset { dx: 0.0, dy: 0.0 };

    pub const fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }
}

/// A free-form text label on one of the torso panels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextLayer {
    pub id: LayerId,
    pub content: String,
    pub font_size_px: f32,
    pub color: Rgb8,
    pub placement: Placement,
    pub offset: Offset,
}

impl TextLayer {
    /// Build a text layer, rejecting a non-positive font size.
    pub fn new(
        id: LayerId,
        content: impl Into<String>,
        font_size_px: f32,
        color: Rgb8,
        placement: Placement,
        offset: Offset,
    ) -> Result<Self, LayerError> {
        if !(font_size_px > 0.0) {
            return Err(LayerError::InvalidFontSize { font_size_px });
        }
        Ok(Self {
            id,
            content: content.into(),
            font_size_px,
            color,
            placement,
            offset,
        })
    }
}

/// A raster graphic on one of the torso panels, drawn at an explicit size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphicLayer {
    pub id: LayerId,
    pub source: AssetRef,
    pub width_px: f32,
    pub height_px: f32,
    pub placement: Placement,
    pub offset: Offset,
}

impl GraphicLayer {
    /// Build a graphic layer, rejecting a non-positive destination size.
    pub fn new(
        id: LayerId,
        source: AssetRef,
        width_px: f32,
        height_px: f32,
        placement: Placement,
        offset: Offset,
    ) -> Result<Self, LayerError> {
        if !(width_px > 0.0) || !(height_px > 0.0) {
            return Err(LayerError::InvalidGraphicSize {
                width_px,
                height_px,
            });
        }
        Ok(Self {
            id,
            source,
            width_px,
            height_px,
            placement,
            offset,
        })
    }
}

/// Locator of a tileable pattern asset (raster or SVG).
///
/// Resolution failure is non-fatal: the compositor silently falls back to
/// the plain base fill.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternRef(pub AssetRef);

/// One editing session's complete garment customization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GarmentState {
    pub base_color: Rgb8,
    pub pattern: Option<PatternRef>,
    pub text_layers: Vec<TextLayer>,
    pub graphic_layers: Vec<GraphicLayer>,
}

impl Default for GarmentState {
    fn default() -> Self {
        Self {
            base_color: Rgb8::WHITE,
            pattern: None,
            text_layers: Vec::new(),
            graphic_layers: Vec::new(),
        }
    }
}

impl GarmentState {
    /// Replace the base colour.
    pub fn with_base_color(mut self, color: Rgb8) -> Self {
        self.base_color = color;
        self
    }

    /// Set or clear the tileable pattern.
    pub fn with_pattern(mut self, pattern: Option<PatternRef>) -> Self {
        self.pattern = pattern;
        self
    }

    /// Append a text layer (it becomes the topmost text).
    pub fn with_text_added(mut self, layer: TextLayer) -> Self {
        self.text_layers.push(layer);
        self
    }

    /// Replace the text layer with the same id, keeping its list position.
    /// Unknown ids leave the state unchanged.
    pub fn with_text_updated(mut self, layer: TextLayer) -> Self {
        if let Some(slot) = self.text_layers.iter_mut().find(|t| t.id == layer.id) {
            *slot = layer;
        }
        self
    }

    /// Remove the text layer with the given id, if present.
    pub fn with_text_removed(mut self, id: &LayerId) -> Self {
        self.text_layers.retain(|t| &t.id != id);
        self
    }

    /// Append a graphic layer (it becomes the topmost layer overall).
    pub fn with_graphic_added(mut self, layer: GraphicLayer) -> Self {
        self.graphic_layers.push(layer);
        self
    }

    /// Replace the graphic layer with the same id, keeping its list position.
    /// Unknown ids leave the state unchanged.
    pub fn with_graphic_updated(mut self, layer: GraphicLayer) -> Self {
        if let Some(slot) = self.graphic_layers.iter_mut().find(|g| g.id == layer.id) {
            *slot = layer;
        }
        self
    }

    /// Remove the graphic layer with the given id, if present.
    pub fn with_graphic_removed(mut self, id: &LayerId) -> Self {
        self.graphic_layers.retain(|g| &g.id != id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(id: &str, content: &str) -> TextLayer {
        TextLayer::new(
            LayerId::new(id),
            content,
            40.0,
            Rgb8::BLACK,
            Placement::Front,
            Offset::ZERO,
        )
        .unwrap()
    }

    #[test]
    fn hex_colors_round_trip() {
        let c = Rgb8::from_hex("#1a2b3c").unwrap();
        assert_eq!(c, Rgb8::new(0x1a, 0x2b, 0x3c));
        assert_eq!(c.to_hex(), "#1a2b3c");
        assert!(Rgb8::from_hex("1a2b3c").is_err());
        assert!(Rgb8::from_hex("#12345").is_err());
        assert!(Rgb8::from_hex("#12345g").is_err());
    }

    #[test]
    fn invariants_are_enforced_at_construction() {
        let bad_text = TextLayer::new(
            LayerId::new("t"),
            "HI",
            0.0,
            Rgb8::BLACK,
            Placement::Front,
            Offset::ZERO,
        );
        assert_eq!(
            bad_text.unwrap_err(),
            LayerError::InvalidFontSize { font_size_px: 0.0 }
        );

        let bad_graphic = GraphicLayer::new(
            LayerId::new("g"),
            AssetRef::Url("https://example.test/a.png".into()),
            64.0,
            -1.0,
            Placement::Back,
            Offset::ZERO,
        );
        assert!(bad_graphic.is_err());
    }

    #[test]
    fn setters_preserve_list_order() {
        let state = GarmentState::default()
            .with_text_added(text("a", "first"))
            .with_text_added(text("b", "second"))
            .with_text_added(text("c", "third"));

        let updated = state.clone().with_text_updated(text("b", "SECOND"));
        let order: Vec<&str> = updated.text_layers.iter().map(|t| t.id.0.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert_eq!(updated.text_layers[1].content, "SECOND");

        let removed = updated.with_text_removed(&LayerId::new("a"));
        let order: Vec<&str> = removed.text_layers.iter().map(|t| t.id.0.as_str()).collect();
        assert_eq!(order, ["b", "c"]);
    }

    #[test]
    fn unknown_id_update_is_a_no_op() {
        let state = GarmentState::default().with_text_added(text("a", "first"));
        let same = state.clone().with_text_updated(text("zzz", "ghost"));
        assert_eq!(state, same);
    }

    /// The persistence payload carries the state as structured data; it must
    /// survive a serialize/deserialize trip unchanged.
    #[test]
    fn state_round_trips_through_serde() {
        let state = GarmentState::default()
            .with_base_color(Rgb8::new(200, 10, 30))
            .with_pattern(Some(PatternRef(AssetRef::Url(
                "https://cdn.example.test/patterns/dots.svg".into(),
            ))))
            .with_text_added(text("t1", "HI"))
            .with_graphic_added(
                GraphicLayer::new(
                    LayerId::new("g1"),
                    AssetRef::Url("https://cdn.example.test/graphics/logo.png".into()),
                    120.0,
                    80.0,
                    Placement::Back,
                    Offset::new(10.0, 10.0),
                )
                .unwrap(),
            );

        let json = serde_json::to_string(&state).unwrap();
        let back: GarmentState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
