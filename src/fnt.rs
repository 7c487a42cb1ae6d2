//! BMFont text descriptor importer.
//!
//! Reads the `info`/`common`/`page`/`chars`/`char` instruction lines of a
//! `.fnt` file, decodes the page bitmaps referenced next to it, and copies
//! every glyph rectangle out of its page into a linear arena in store
//! pixel order. The result feeds a store through [`Font::load_import`].

use std::error::Error;
use std::fs;
use std::path::Path;

use image::ImageReader;
use log::{debug, warn};

use crate::color::Color;
use crate::font::{FLAG_BIT32, Glyph, Header, Importer};

/// One `char` instruction: a glyph plus its rectangle inside a page.
#[derive(Clone, Copy, Debug, Default)]
struct FntChar {
    glyph: Glyph,
    x: u32,
    y: u32,
    page: usize,
}

#[derive(Debug, Default)]
struct FntInfo {
    /// BMFont order: up, right, down, left.
    padding: [i64; 4],
    line_height: i64,
    count: i64,
    pages: i64,
}

/// A decoded page bitmap in raw row-major bytes.
struct PageImage {
    data: Vec<u8>,
    w: u32,
    h: u32,
}

/// Splits an instruction line into `key=value` pairs, stripping optional
/// double quotes. Quoted values must not contain spaces.
fn pairs(line: &str) -> impl Iterator<Item = (&str, &str)> {
    line.split_whitespace()
        .filter_map(|tok| tok.split_once('='))
        .map(|(k, v)| (k, v.trim_matches('"')))
}

fn value_int(line: &str, name: &str) -> i64 {
    for (k, v) in pairs(line) {
        if k == name {
            return v.parse().unwrap_or(0);
        }
    }
    0
}

fn value_str<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    pairs(line).find(|(k, _)| *k == name).map(|(_, v)| v)
}

fn value_array(line: &str, name: &str, out: &mut [i64]) {
    let Some(v) = value_str(line, name) else {
        return;
    };
    for (slot, part) in out.iter_mut().zip(v.split(',')) {
        *slot = part.trim().parse().unwrap_or(0);
    }
}

/// Copies the rectangle of one glyph out of a page into `out`, reordering
/// bytes into the store layout: A,R,G,B for 32-bit stores, R,G,B for
/// 24-bit ones (page pixels arrive as R,G,B,A and R,G,B respectively).
fn copy_rect(page: &PageImage, c: &FntChar, bit32: bool, out: &mut Vec<u8>) {
    let bpp = if bit32 { 4 } else { 3 };
    out.clear();
    out.reserve(c.glyph.width as usize * c.glyph.height as usize * bpp);
    for y in c.y..c.y + u32::from(c.glyph.height) {
        for x in c.x..c.x + u32::from(c.glyph.width) {
            let pos = ((y * page.w + x) as usize) * bpp;
            let px = &page.data[pos..pos + bpp];
            if bit32 {
                out.extend_from_slice(&[px[3], px[0], px[1], px[2]]);
            } else {
                out.extend_from_slice(px);
            }
        }
    }
}

/// Importer for BMFont `.fnt` descriptors and their page bitmaps.
#[derive(Debug, Default)]
pub struct FntImporter {
    header: Header,
    chars: Vec<Glyph>,
    arena: Vec<u8>,
}

impl Importer for FntImporter {
    fn header(&self) -> &Header {
        &self.header
    }

    fn glyphs(&self) -> &[Glyph] {
        &self.chars
    }

    fn arena(&self) -> &[u8] {
        &self.arena
    }
}

impl FntImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a descriptor and its pages.
    ///
    /// `transparent` is recorded in the header for downstream renderers;
    /// nothing is keyed out here. With `bit32` the pages are decoded with
    /// their alpha channel and the arena is stored 4 bytes per pixel,
    /// otherwise 3.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        transparent: Color,
        bit32: bool,
    ) -> Result<(), Box<dyn Error>> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;

        self.chars.clear();
        self.arena.clear();

        let mut info = FntInfo::default();
        let mut chars: Vec<FntChar> = Vec::new();
        let mut page_files: Vec<String> = Vec::new();

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("info ") {
                value_array(rest, "padding", &mut info.padding);
            } else if let Some(rest) = line.strip_prefix("common ") {
                info.line_height = value_int(rest, "lineHeight");
                info.pages = value_int(rest, "pages");
            } else if let Some(rest) = line.strip_prefix("page ") {
                page_files.push(value_str(rest, "file").unwrap_or_default().to_string());
            } else if let Some(rest) = line.strip_prefix("chars ") {
                info.count = value_int(rest, "count");
            } else if let Some(rest) = line.strip_prefix("char ") {
                chars.push(FntChar {
                    glyph: Glyph {
                        code: value_int(rest, "id") as u32,
                        pos: 0,
                        width: value_int(rest, "width") as u8,
                        height: value_int(rest, "height") as u8,
                        xadvance: value_int(rest, "xadvance") as u8,
                        xoffset: value_int(rest, "xoffset") as i8,
                        yoffset: value_int(rest, "yoffset") as i8,
                    },
                    x: value_int(rest, "x") as u32,
                    y: value_int(rest, "y") as u32,
                    page: value_int(rest, "page") as usize,
                });
            }
        }

        self.header = Header {
            count: info.count as u16,
            line_height: info.line_height as u8,
            transparent,
            flag: if bit32 { FLAG_BIT32 } else { 0 },
            // BMFont declares up,right,down,left; the header wants
            // left,top,right,bottom.
            padding: [
                info.padding[3] as u8,
                info.padding[0] as u8,
                info.padding[1] as u8,
                info.padding[2] as u8,
            ],
            ..Header::default()
        };

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut pages: Vec<PageImage> = Vec::with_capacity(page_files.len());
        for file in &page_files {
            let page_path = dir.join(file);
            let decoded = ImageReader::open(&page_path)
                .and_then(|r| {
                    r.decode()
                        .map_err(|e| std::io::Error::other(e.to_string()))
                })
                .map_err(|e| {
                    warn!("failed to load page '{file}': {e}");
                    e
                })?;
            let page = if bit32 {
                let rgba = decoded.to_rgba8();
                PageImage {
                    w: rgba.width(),
                    h: rgba.height(),
                    data: rgba.into_raw(),
                }
            } else {
                let rgb = decoded.to_rgb8();
                PageImage {
                    w: rgb.width(),
                    h: rgb.height(),
                    data: rgb.into_raw(),
                }
            };
            debug!("page '{}' decoded at {}x{}", file, page.w, page.h);
            pages.push(page);
        }

        if info.pages as usize != pages.len() {
            warn!(
                "page count mismatch: {} loaded, {} declared",
                pages.len(),
                info.pages
            );
            return Err("page count mismatch".into());
        }

        let mut offset = 0u32;
        let mut buf = Vec::new();
        for c in &mut chars {
            let Some(page) = pages.get(c.page) else {
                warn!("glyph U+{:04X} names missing page {}", c.glyph.code, c.page);
                return Err("glyph page out of range".into());
            };
            if c.x + u32::from(c.glyph.width) > page.w
                || c.y + u32::from(c.glyph.height) > page.h
            {
                warn!("glyph U+{:04X} rectangle leaves its page", c.glyph.code);
                return Err("glyph rectangle outside page".into());
            }
            copy_rect(page, c, bit32, &mut buf);
            c.glyph.pos = offset;
            self.arena.extend_from_slice(&buf);
            self.chars.push(c.glyph);
            offset += buf.len() as u32;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color;
    use crate::font::Font;
    use crate::pixel::PixelFormat;
    use image::{Rgba, RgbaImage};
    use std::fmt::Write as _;

    /// Page pixel at (x, y) is (r=x, g=y, b=x+y, a=200).
    fn write_page(path: &Path, w: u32, h: u32) {
        let img = RgbaImage::from_fn(w, h, |x, y| {
            Rgba([x as u8, y as u8, (x + y) as u8, 200])
        });
        img.save(path).unwrap();
    }

    fn write_descriptor(path: &Path, pages: u32, chars: &[(u32, u32, u32, u32, u32)]) {
        let mut text = String::new();
        writeln!(
            text,
            "info face=\"test\" size=16 padding=1,2,3,4 spacing=1,1"
        )
        .unwrap();
        writeln!(
            text,
            "common lineHeight=16 base=13 scaleW=32 scaleH=32 pages={pages}"
        )
        .unwrap();
        writeln!(text, "page id=0 file=\"page0.png\"").unwrap();
        writeln!(text, "chars count={}", chars.len()).unwrap();
        for (id, x, y, w, h) in chars {
            writeln!(
                text,
                "char id={id} x={x} y={y} width={w} height={h} xoffset=1 yoffset=-2 xadvance={w} page=0 chnl=15"
            )
            .unwrap();
        }
        fs::write(path, text).unwrap();
    }

    #[test]
    fn key_value_parsing_handles_quotes_and_arrays() {
        let line = "face=\"Fira Code\" size=16 padding=1,2,3,4";
        assert_eq!(value_str(line, "face"), Some("Fira"));
        assert_eq!(value_int(line, "size"), 16);
        assert_eq!(value_int(line, "missing"), 0);
        let mut padding = [0i64; 4];
        value_array(line, "padding", &mut padding);
        assert_eq!(padding, [1, 2, 3, 4]);
    }

    #[test]
    fn imports_argb_pages_in_store_order() {
        let dir = tempfile::tempdir().unwrap();
        write_page(&dir.path().join("page0.png"), 32, 32);
        let fnt = dir.path().join("test.fnt");
        write_descriptor(&fnt, 1, &[('A' as u32, 2, 3, 2, 2), ('B' as u32, 10, 4, 3, 1)]);

        let mut importer = FntImporter::new();
        importer.load(&fnt, 0, true).unwrap();

        let header = Importer::header(&importer);
        assert_eq!(header.flag & FLAG_BIT32, FLAG_BIT32);
        assert_eq!(header.line_height, 16);
        assert_eq!(header.count, 2);
        // up,right,down,left becomes left,top,right,bottom.
        assert_eq!(header.padding, [4, 1, 2, 3]);

        let glyphs = importer.glyphs();
        assert_eq!(glyphs[0].pos, 0);
        assert_eq!(glyphs[1].pos, 16);
        assert_eq!(importer.arena().len(), 16 + 12);

        // First pixel of 'A' sits at page (2, 3): stored as A,R,G,B.
        assert_eq!(&importer.arena()[..4], &[200, 2, 3, 5]);

        let mut font = Font::new();
        assert!(font.load_import(&importer));
        assert_eq!(font.header().format(), PixelFormat::Argb32);
        let a = font.glyph('A' as u32);
        assert_eq!((a.xoffset, a.yoffset), (1, -2));
        assert_eq!(font.color_at(a, 0, 0), color::argb(200, 2, 3, 5));
        assert_eq!(font.color_at(a, 1, 1), color::argb(200, 3, 4, 7));
    }

    #[test]
    fn imports_rgb_pages_with_transparent_key() {
        let dir = tempfile::tempdir().unwrap();
        write_page(&dir.path().join("page0.png"), 32, 32);
        let fnt = dir.path().join("test.fnt");
        write_descriptor(&fnt, 1, &[('A' as u32, 5, 6, 2, 2)]);

        let key = color::rgb(255, 0, 255);
        let mut importer = FntImporter::new();
        importer.load(&fnt, key, false).unwrap();

        let header = Importer::header(&importer);
        assert_eq!(header.flag & FLAG_BIT32, 0);
        assert_eq!(header.transparent, key);
        assert_eq!(importer.arena().len(), 12);
        assert_eq!(&importer.arena()[..3], &[5, 6, 11]);

        let mut font = Font::new();
        assert!(font.load_import(&importer));
        let a = font.glyph('A' as u32);
        assert_eq!(font.color_at(a, 0, 0), color::rgb(5, 6, 11));
    }

    #[test]
    fn rejects_declared_page_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_page(&dir.path().join("page0.png"), 16, 16);
        let fnt = dir.path().join("test.fnt");
        write_descriptor(&fnt, 2, &[('A' as u32, 0, 0, 2, 2)]);

        let mut importer = FntImporter::new();
        assert!(importer.load(&fnt, 0, false).is_err());
    }

    #[test]
    fn rejects_missing_page_image() {
        let dir = tempfile::tempdir().unwrap();
        let fnt = dir.path().join("test.fnt");
        write_descriptor(&fnt, 1, &[('A' as u32, 0, 0, 2, 2)]);

        let mut importer = FntImporter::new();
        assert!(importer.load(&fnt, 0, false).is_err());
    }

    #[test]
    fn rejects_rectangle_outside_page() {
        let dir = tempfile::tempdir().unwrap();
        write_page(&dir.path().join("page0.png"), 8, 8);
        let fnt = dir.path().join("test.fnt");
        write_descriptor(&fnt, 1, &[('A' as u32, 7, 7, 4, 4)]);

        let mut importer = FntImporter::new();
        assert!(importer.load(&fnt, 0, true).is_err());
    }

    #[test]
    fn imported_store_survives_container_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_page(&dir.path().join("page0.png"), 32, 32);
        let fnt = dir.path().join("test.fnt");
        write_descriptor(&fnt, 1, &[('A' as u32, 2, 3, 4, 4), ('B' as u32, 8, 8, 2, 6)]);

        let mut importer = FntImporter::new();
        importer.load(&fnt, 0, true).unwrap();
        let mut font = Font::new();
        assert!(font.load_import(&importer));

        let ckf = dir.path().join("test.ckf");
        font.save(&ckf, true).unwrap();
        let mut loaded = Font::new();
        loaded.open(&ckf).unwrap();
        assert_eq!(loaded.chars(), font.chars());
        assert_eq!(loaded.arena(), font.arena());
        assert_eq!(loaded.header(), font.header());
    }
}
