//! Remote asset resolution: opaque references to pattern and graphic images
//! resolved into decoded RGBA bitmaps.
//!
//! The fetch side is a trait seam ([`AssetFetcher`]) because the actual byte
//! store is an external collaborator (object storage behind a CDN).  The
//! default [`HttpFetcher`] does a blocking GET — composition cycles already
//! run on a private worker pool, so blocking there is fine and keeps the
//! loader free of any async runtime.  Tests and benches inject a
//! [`MemoryFetcher`] instead.
//!
//! Decoding handles both raster formats (via the `image` crate) and SVG
//! documents (rasterized at their intrinsic size via `usvg`/`resvg`).  SVG is
//! detected by content type when the fetcher provides one, falling back to a
//! document-prefix sniff.

use std::collections::HashMap;

use image::RgbaImage;

/// Error resolving a referenced bitmap.  Always recovered locally: the
/// pattern falls back to the plain base fill and a failed layer is skipped.
#[derive(Debug)]
pub enum AssetLoadError {
    /// The bytes could not be fetched from the store.
    Fetch { url: String, reason: String },
    /// The bytes were fetched but could not be decoded into a bitmap.
    Decode { reason: String },
}

impl std::fmt::Display for AssetLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetLoadError::Fetch { url, reason } => {
                write!(f, "failed to fetch {url}: {reason}")
            }
            AssetLoadError::Decode { reason } => {
                write!(f, "failed to decode asset bytes: {reason}")
            }
        }
    }
}

impl std::error::Error for AssetLoadError {}

/// Opaque locator of an image asset.
///
/// `Url` points into the remote store; `Inline` carries the encoded document
/// itself (the inline-SVG case — the moral equivalent of a data URI).
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AssetRef {
    Url(String),
    Inline(Vec<u8>),
}

impl AssetRef {
    /// Short human-readable form for log lines.
    pub fn describe(&self) -> String {
        match self {
            AssetRef::Url(url) => url.clone(),
            AssetRef::Inline(bytes) => format!("<inline asset, {} bytes>", bytes.len()),
        }
    }
}

/// Raw bytes plus the content type the store reported, if any.
#[derive(Clone, Debug)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Byte-fetch seam over the object storage / CDN collaborator.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetLoadError>;
}

/// Blocking HTTP fetcher over the remote store.
#[cfg(feature = "network")]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "network")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[cfg(feature = "network")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "network")]
impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetLoadError> {
        let err = |reason: String| AssetLoadError::Fetch {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(err(format!("HTTP status {}", response.status())));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|e| err(e.to_string()))?
            .to_vec();
        Ok(FetchedAsset {
            bytes,
            content_type,
        })
    }
}

/// In-memory fetcher keyed by URL.  Used by tests and benches; also handy
/// for applications that resolve their asset bytes out of band.
#[derive(Default)]
pub struct MemoryFetcher {
    entries: HashMap<String, FetchedAsset>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        url: impl Into<String>,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) {
        self.entries.insert(
            url.into(),
            FetchedAsset {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetLoadError> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| AssetLoadError::Fetch {
                url: url.to_string(),
                reason: "no such entry".to_string(),
            })
    }
}

/// Resolves an [`AssetRef`] into a decoded RGBA bitmap.
pub struct AssetLoader<'a> {
    fetcher: &'a dyn AssetFetcher,
}

impl<'a> AssetLoader<'a> {
    pub fn new(fetcher: &'a dyn AssetFetcher) -> Self {
        Self { fetcher }
    }

    /// Fetch and decode a referenced bitmap.
    ///
    /// Succeeds with an image of known, non-zero pixel dimensions or fails
    /// with [`AssetLoadError`]; there is no partial result.
    pub fn load_bitmap(&self, asset: &AssetRef) -> Result<RgbaImage, AssetLoadError> {
        let fetched = match asset {
            AssetRef::Url(url) => self.fetcher.fetch(url)?,
            AssetRef::Inline(bytes) => FetchedAsset {
                bytes: bytes.clone(),
                content_type: None,
            },
        };
        decode_bitmap(&fetched)
    }
}

/// Decode fetched bytes into a straight-alpha RGBA bitmap.
pub fn decode_bitmap(fetched: &FetchedAsset) -> Result<RgbaImage, AssetLoadError> {
    if looks_like_svg(fetched) {
        rasterize_svg(&fetched.bytes)
    } else {
        let decoded = image::load_from_memory(&fetched.bytes).map_err(|e| {
            AssetLoadError::Decode {
                reason: e.to_string(),
            }
        })?;
        Ok(decoded.to_rgba8())
    }
}

fn looks_like_svg(fetched: &FetchedAsset) -> bool {
    if let Some(ct) = &fetched.content_type {
        if ct.contains("svg") {
            return true;
        }
        // A concrete raster type wins over the prefix sniff below.
        if ct.starts_with("image/") {
            return false;
        }
    }
    let head = &fetched.bytes[..fetched.bytes.len().min(512)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start();
    trimmed.starts_with("<svg") || trimmed.starts_with("<?xml")
}

/// Rasterize an SVG document at its intrinsic size.
///
/// tiny-skia renders premultiplied alpha; the output is converted back to
/// straight alpha so it composites like every other decoded bitmap.
fn rasterize_svg(data: &[u8]) -> Result<RgbaImage, AssetLoadError> {
    let decode_err = |reason: String| AssetLoadError::Decode { reason };

    let options = usvg::Options::default();
    let tree = usvg::Tree::from_data(data, &options).map_err(|e| decode_err(e.to_string()))?;

    let size = tree.size();
    let width = size.width().ceil() as u32;
    let height = size.height().ceil() as u32;
    if width == 0 || height == 0 {
        return Err(decode_err(format!(
            "SVG has a degenerate intrinsic size ({}×{})",
            size.width(),
            size.height()
        )));
    }

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| decode_err(format!("cannot allocate {width}×{height} pixmap")))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    let pixels = unpremultiply(pixmap.take());
    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| decode_err("pixmap buffer size mismatch".to_string()))
}

/// Convert premultiplied RGBA back to straight alpha.
fn unpremultiply(mut pixels: Vec<u8>) -> Vec<u8> {
    for px in pixels.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a > 0 && a < 255 {
            px[0] = ((px[0] as u16 * 255) / a).min(255) as u8;
            px[1] = ((px[1] as u16 * 255) / a).min(255) as u8;
            px[2] = ((px[2] as u16 * 255) / a).min(255) as u8;
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 2×2 solid red SVG, small enough to assert exact pixels.
    const RED_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="2" height="2"><rect width="2" height="2" fill="#ff0000"/></svg>"##;

    fn png_bytes(image: &RgbaImage) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode test png");
        out.into_inner()
    }

    #[test]
    fn decodes_raster_bytes() {
        let source = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("https://cdn.test/a.png", png_bytes(&source), Some("image/png"));

        let loader = AssetLoader::new(&fetcher);
        let bitmap = loader
            .load_bitmap(&AssetRef::Url("https://cdn.test/a.png".into()))
            .unwrap();
        assert_eq!(bitmap.dimensions(), (3, 2));
        assert_eq!(bitmap.get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn decodes_svg_by_content_type_and_by_sniff() {
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert(
            "https://cdn.test/p.svg",
            RED_SVG.as_bytes().to_vec(),
            Some("image/svg+xml"),
        );
        let loader = AssetLoader::new(&fetcher);

        let by_type = loader
            .load_bitmap(&AssetRef::Url("https://cdn.test/p.svg".into()))
            .unwrap();
        assert_eq!(by_type.dimensions(), (2, 2));
        assert_eq!(by_type.get_pixel(1, 1).0, [255, 0, 0, 255]);

        // The inline path has no content type; the prefix sniff must kick in.
        let by_sniff = loader
            .load_bitmap(&AssetRef::Inline(RED_SVG.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(by_sniff.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn missing_and_undecodable_assets_fail_cleanly() {
        let fetcher = MemoryFetcher::new();
        let loader = AssetLoader::new(&fetcher);

        let missing = loader.load_bitmap(&AssetRef::Url("https://cdn.test/nope.png".into()));
        assert!(matches!(missing, Err(AssetLoadError::Fetch { .. })));

        let garbage = loader.load_bitmap(&AssetRef::Inline(vec![0xde, 0xad, 0xbe, 0xef]));
        assert!(matches!(garbage, Err(AssetLoadError::Decode { .. })));
    }
}
