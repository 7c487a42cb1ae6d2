//! Bitmap glyph store.
//!
//! A [`Font`] owns three things: a header, an ordered glyph table, and a
//! flat pixel arena holding every glyph image back to back. A codepoint
//! index caches `code -> table slot` and is rebuilt whenever the table is
//! reshuffled. Lookups never fail: control codepoints resolve to static
//! sentinels, a missing space resolves to a synthetic glyph derived from
//! the line height, and any other missing codepoint falls back to the
//! first glyph in the table.

use std::collections::HashMap;

use log::warn;

use crate::color::Color;
use crate::pixel::{PixelBuf, PixelFormat, PixelView};

/// Header flag bit: glyph images are stored as 32-bit A,R,G,B.
pub const FLAG_BIT32: u8 = 1;

/// Per-store metadata.
///
/// `flag` (and with it the pixel depth) and `padding` are fixed when the
/// store is created; [`Font::set_header`] carries them over from the old
/// header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Language tag, 4 opaque bytes.
    pub lang: [u8; 4],
    pub flag: u8,
    /// Number of glyphs, refreshed on insert and on save.
    pub count: u16,
    pub line_height: u8,
    /// Widest glyph in the table, refreshed on insert and on save.
    pub max_width: u8,
    /// Recommended horizontal spacing between glyphs.
    pub spacing_x: u8,
    /// Color key treated as transparent downstream; 24-bit stores only.
    pub transparent: Color,
    /// Inner padding of a rendered text box: left, top, right, bottom.
    pub padding: [u8; 4],
}

impl Header {
    #[inline(always)]
    pub const fn format(&self) -> PixelFormat {
        PixelFormat::from_flag(self.flag)
    }

    #[inline(always)]
    pub const fn bpp(&self) -> usize {
        self.format().bpp()
    }
}

/// One glyph: metrics plus the location of its image in the arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Glyph {
    /// Unicode codepoint.
    pub code: u32,
    /// Byte offset of the image inside the arena.
    pub pos: u32,
    /// Image width in pixels, intra-glyph padding included.
    pub width: u8,
    /// Image height in pixels, intra-glyph padding included.
    pub height: u8,
    /// Horizontal pen step, exclusive of inter-glyph spacing.
    pub xadvance: u8,
    pub xoffset: i8,
    pub yoffset: i8,
}

impl Glyph {
    pub(crate) const fn sentinel(code: u32) -> Self {
        Self {
            code,
            pos: 0,
            width: 0,
            height: 0,
            xadvance: 0,
            xoffset: 0,
            yoffset: 0,
        }
    }

    /// Size of this glyph's arena slice for a given pixel depth.
    #[inline(always)]
    pub(crate) const fn data_len(&self, bpp: usize) -> usize {
        self.width as usize * self.height as usize * bpp
    }
}

static GLYPH_NUL: Glyph = Glyph::sentinel(0);
static GLYPH_NEWLINE: Glyph = Glyph::sentinel('\n' as u32);
static GLYPH_TAB: Glyph = Glyph::sentinel('\t' as u32);

/// Checks that the glyph slices tile the arena exactly: every slice in
/// range and the slice sizes summing to the arena length.
pub(crate) fn arena_well_formed(chars: &[Glyph], arena_len: usize, bpp: usize) -> bool {
    let mut total = 0usize;
    for it in chars {
        let block = it.data_len(bpp);
        total += block;
        if it.pos as usize + block > arena_len {
            return false;
        }
    }
    total == arena_len
}

/// A source of the three raw ingredients a store is built from.
///
/// Importers for foreign font descriptions produce these; the store adopts
/// them through [`Font::load_import`].
pub trait Importer {
    fn header(&self) -> &Header;
    fn glyphs(&self) -> &[Glyph];
    fn arena(&self) -> &[u8];
}

/// Bitmap glyph store.
#[derive(Clone, Debug, Default)]
pub struct Font {
    pub(crate) header: Header,
    pub(crate) chars: Vec<Glyph>,
    pub(crate) arena: Vec<u8>,
    pub(crate) index: HashMap<u32, usize>,
    pub(crate) space: Glyph,
}

impl Font {
    /// Empty 24-bit store.
    pub fn new() -> Self {
        Self::with_format(PixelFormat::Rgb24)
    }

    /// Empty store with the pixel depth fixed up front.
    pub fn with_format(format: PixelFormat) -> Self {
        let mut font = Self {
            space: Glyph::sentinel(' ' as u32),
            ..Self::default()
        };
        if format == PixelFormat::Argb32 {
            font.header.flag |= FLAG_BIT32;
        }
        font
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Replaces the header, keeping the pixel-depth flag and padding of the
    /// old one and refreshing the synthetic space metrics.
    pub fn set_header(&mut self, header: Header) {
        let flag = self.header.flag & FLAG_BIT32;
        let padding = self.header.padding;
        self.header = header;
        self.header.flag = (self.header.flag & !FLAG_BIT32) | flag;
        self.header.padding = padding;
        self.refresh_space();
    }

    /// Glyph table in insertion order.
    pub fn chars(&self) -> &[Glyph] {
        &self.chars
    }

    /// Concatenated glyph image bytes.
    pub fn arena(&self) -> &[u8] {
        &self.arena
    }

    /// A store is valid once it holds at least one glyph.
    pub fn is_valid(&self) -> bool {
        !self.chars.is_empty()
    }

    /// Resolves a codepoint to a glyph. Never fails: `\0` and `\r` (and
    /// every lookup on an empty store) yield the zero glyph, `\n` and `\t`
    /// yield their sentinels, a missing space yields the synthetic space,
    /// and any other missing codepoint yields the first table entry.
    pub fn glyph(&self, code: u32) -> &Glyph {
        if self.chars.is_empty() || code == 0 || code == '\r' as u32 {
            return &GLYPH_NUL;
        }
        if code == '\n' as u32 {
            return &GLYPH_NEWLINE;
        }
        if code == '\t' as u32 {
            return &GLYPH_TAB;
        }
        match self.index.get(&code) {
            Some(&i) => &self.chars[i],
            None if code == ' ' as u32 => &self.space,
            None => &self.chars[0],
        }
    }

    /// Resolves every scalar of a string independently.
    pub fn glyphs(&self, text: &str) -> Vec<&Glyph> {
        text.chars().map(|c| self.glyph(c as u32)).collect()
    }

    /// Resolves raw UTF-16 code units independently, without pairing
    /// surrogates.
    pub fn glyphs_utf16(&self, units: &[u16]) -> Vec<&Glyph> {
        units.iter().map(|&u| self.glyph(u32::from(u))).collect()
    }

    /// Resolves raw 32-bit code units independently.
    pub fn glyphs_codes(&self, units: &[u32]) -> Vec<&Glyph> {
        units.iter().map(|&u| self.glyph(u)).collect()
    }

    /// Reads one pixel of a glyph straight out of the arena; 0 when out of
    /// range.
    pub fn color_at(&self, glyph: &Glyph, x: u16, y: u16) -> Color {
        let format = self.header.format();
        let i = glyph.pos as usize + format.offset(x, y, u16::from(glyph.width));
        match self.arena.get(i..i + format.bpp()) {
            Some(p) => format.read(p),
            None => 0,
        }
    }

    /// Borrows a glyph's image. Returns an invalid view when the glyph is
    /// not in the table or its slice falls outside the arena.
    pub fn glyph_data(&self, glyph: &Glyph) -> PixelView<'_> {
        if !self.index.contains_key(&glyph.code) {
            return PixelView::invalid();
        }
        let upper = glyph.pos as usize + glyph.data_len(self.header.bpp());
        if upper > self.arena.len() {
            return PixelView::invalid();
        }
        PixelView::new(
            &self.arena[glyph.pos as usize..upper],
            glyph.width,
            glyph.height,
            self.header.format(),
        )
    }

    /// Copies a glyph's image into an owned buffer.
    pub fn glyph_data_owned(&self, glyph: &Glyph) -> Option<PixelBuf> {
        let view = self.glyph_data(glyph);
        if !view.is_valid() {
            return None;
        }
        Some(view.to_owned())
    }

    /// Appends a glyph and its image bytes. An existing glyph with the same
    /// codepoint is removed first. Rejects empty dimensions and a byte
    /// count that disagrees with `width*height*bpp`.
    pub fn insert(&mut self, glyph: Glyph, data: &[u8]) -> bool {
        if glyph.width < 1 || glyph.height < 1 {
            warn!("insert rejected: empty size for U+{:04X}", glyph.code);
            return false;
        }
        if data.len() != glyph.data_len(self.header.bpp()) {
            warn!(
                "insert rejected: U+{:04X} has {} data bytes, expected {}",
                glyph.code,
                data.len(),
                glyph.data_len(self.header.bpp())
            );
            return false;
        }

        self.remove(glyph.code);

        let mut glyph = glyph;
        glyph.pos = self.arena.len() as u32;
        self.arena.extend_from_slice(data);
        self.index.insert(glyph.code, self.chars.len());
        self.chars.push(glyph);

        self.header.max_width = self.header.max_width.max(glyph.width);
        self.header.count = self.chars.len() as u16;
        true
    }

    /// Removes a glyph, splicing its slice out of the arena and shifting
    /// the offset of every glyph stored after it.
    pub fn remove(&mut self, code: u32) {
        let Some(&idx) = self.index.get(&code) else {
            return;
        };
        let glyph = self.chars[idx];
        let pos = glyph.pos as usize;
        let size = glyph.data_len(self.header.bpp());

        self.arena.drain(pos..pos + size);
        self.chars.remove(idx);
        for it in &mut self.chars {
            if it.pos as usize > pos {
                it.pos -= size as u32;
            }
        }
        self.rebuild_index();
    }

    /// Drops every glyph and zeroes the header.
    pub fn clear(&mut self) {
        self.header = Header::default();
        self.index.clear();
        self.chars.clear();
        self.arena.clear();
    }

    /// Adopts the header, glyph table and arena produced by an importer.
    /// On a malformed arena the glyphs are dropped again and the call
    /// reports failure.
    pub fn load_import(&mut self, source: &dyn Importer) -> bool {
        self.chars = source.glyphs().to_vec();
        self.arena = source.arena().to_vec();
        self.index.clear();

        self.header = *source.header();
        self.header.max_width = self.chars.iter().map(|c| c.width).max().unwrap_or(0);

        if !arena_well_formed(&self.chars, self.arena.len(), self.header.bpp()) {
            warn!("font validation failed");
            self.chars.clear();
            self.arena.clear();
            return false;
        }
        self.rebuild_index();
        self.refresh_space();
        true
    }

    pub(crate) fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, it) in self.chars.iter().enumerate() {
            self.index.insert(it.code, i);
        }
    }

    /// The synthetic space is half a line tall and wide, never narrower
    /// than 2 pixels, and advances by its own width.
    pub(crate) fn refresh_space(&mut self) {
        self.space.code = ' ' as u32;
        self.space.width = (self.header.line_height / 2).max(2);
        self.space.height = self.header.line_height;
        self.space.xadvance = self.space.width;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn solid_bytes(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    pub(crate) fn glyph(code: u32, w: u8, h: u8, xadvance: u8) -> Glyph {
        Glyph {
            code,
            pos: 0,
            width: w,
            height: h,
            xadvance,
            xoffset: 0,
            yoffset: 0,
        }
    }

    struct StubImport {
        header: Header,
        chars: Vec<Glyph>,
        arena: Vec<u8>,
    }

    impl Importer for StubImport {
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

    #[test]
    fn empty_store_resolves_everything_to_nul() {
        let font = Font::new();
        assert!(!font.is_valid());
        assert_eq!(font.glyph('A' as u32).code, 0);
        assert_eq!(font.glyph('\n' as u32).code, 0);
        assert_eq!(font.glyph(' ' as u32).code, 0);
    }

    #[test]
    fn lookup_sentinels_and_fallbacks() {
        let mut font = Font::new();
        let mut header = *font.header();
        header.line_height = 16;
        font.set_header(header);
        assert!(font.insert(glyph('A' as u32, 1, 1, 9), &solid_bytes(3, 0)));

        assert_eq!(font.glyph('\n' as u32).code, '\n' as u32);
        assert_eq!(font.glyph('\t' as u32).code, '\t' as u32);
        assert_eq!(font.glyph('\r' as u32).code, 0);
        assert_eq!(font.glyph(0).code, 0);

        // Missing space: synthetic glyph sized from the line height.
        let sp = font.glyph(' ' as u32);
        assert_eq!(sp.code, ' ' as u32);
        assert_eq!(sp.width, 8);
        assert_eq!(sp.height, 16);
        assert_eq!(sp.xadvance, 8);

        // Any other missing codepoint falls back to the first glyph.
        assert_eq!(font.glyph('Z' as u32).code, 'A' as u32);
    }

    #[test]
    fn string_lookups_resolve_each_unit_independently() {
        let mut font = Font::new();
        assert!(font.insert(glyph('A' as u32, 1, 1, 1), &solid_bytes(3, 0)));
        assert!(font.insert(glyph('B' as u32, 1, 1, 1), &solid_bytes(3, 1)));

        let from_str: Vec<u32> = font.glyphs("AB\n").iter().map(|g| g.code).collect();
        let from_utf16: Vec<u32> = font
            .glyphs_utf16(&[0x41, 0x42, 0x0A])
            .iter()
            .map(|g| g.code)
            .collect();
        let from_codes: Vec<u32> = font
            .glyphs_codes(&[0x41, 0x42, 0x0A])
            .iter()
            .map(|g| g.code)
            .collect();
        assert_eq!(from_str, ['A' as u32, 'B' as u32, '\n' as u32]);
        assert_eq!(from_utf16, from_str);
        assert_eq!(from_codes, from_str);
    }

    #[test]
    fn synthetic_space_floors_at_two_pixels() {
        let mut font = Font::new();
        let mut header = *font.header();
        header.line_height = 3;
        font.set_header(header);
        assert_eq!(font.space.width, 2);
        assert_eq!(font.space.xadvance, 2);
    }

    #[test]
    fn set_header_keeps_depth_and_padding() {
        let mut source = Font::with_format(PixelFormat::Argb32);
        let incoming = Header {
            lang: *b"enUS",
            flag: 0,
            line_height: 20,
            spacing_x: 2,
            padding: [9, 9, 9, 9],
            ..Header::default()
        };
        source.set_header(incoming);
        assert_eq!(source.header().flag & FLAG_BIT32, FLAG_BIT32);
        assert_eq!(source.header().padding, [0, 0, 0, 0]);
        assert_eq!(source.header().line_height, 20);
        assert_eq!(source.header().spacing_x, 2);

        // The other direction: a 24-bit store cannot gain the depth bit.
        let mut flat = Font::new();
        let mut deep = incoming;
        deep.flag = FLAG_BIT32;
        flat.set_header(deep);
        assert_eq!(flat.header().flag & FLAG_BIT32, 0);
    }

    #[test]
    fn insert_validates_size_and_data_length() {
        let mut font = Font::new();
        assert!(!font.insert(glyph('A' as u32, 0, 4, 1), &[]));
        assert!(!font.insert(glyph('A' as u32, 2, 2, 1), &solid_bytes(5, 0)));
        assert!(font.chars().is_empty());
        assert!(font.arena().is_empty());

        assert!(font.insert(glyph('A' as u32, 2, 2, 1), &solid_bytes(12, 0)));
        assert_eq!(font.header().count, 1);
        assert_eq!(font.header().max_width, 2);
        assert_eq!(font.arena().len(), 12);
    }

    #[test]
    fn insert_same_code_twice_replaces_in_place() {
        let mut font = Font::new();
        let data = solid_bytes(12, 7);
        assert!(font.insert(glyph('A' as u32, 2, 2, 1), &data));
        assert!(font.insert(glyph('A' as u32, 2, 2, 1), &data));

        assert_eq!(font.chars().len(), 1);
        assert_eq!(font.arena().len(), 12);
        assert_eq!(font.header().count, 1);
        assert_eq!(font.chars()[0].pos, 0);
        assert_eq!(font.arena(), data.as_slice());
    }

    #[test]
    fn remove_middle_glyph_shifts_following_offsets() {
        let mut font = Font::with_format(PixelFormat::Argb32);
        assert!(font.insert(glyph('a' as u32, 4, 4, 4), &solid_bytes(64, 1)));
        assert!(font.insert(glyph('b' as u32, 8, 8, 8), &solid_bytes(256, 2)));
        assert!(font.insert(glyph('c' as u32, 16, 16, 16), &solid_bytes(1024, 3)));
        let positions: Vec<u32> = font.chars().iter().map(|c| c.pos).collect();
        assert_eq!(positions, [0, 64, 320]);
        let before = font.arena().len();

        font.remove('b' as u32);

        assert_eq!(font.chars().len(), 2);
        assert_eq!(font.arena().len(), before - 256);
        assert_eq!(font.glyph('a' as u32).pos, 0);
        assert_eq!(font.glyph('c' as u32).pos, 64);
        // Only the offset moved.
        let c = font.glyph('c' as u32);
        assert_eq!((c.width, c.height, c.xadvance), (16, 16, 16));
        assert!(arena_well_formed(
            font.chars(),
            font.arena().len(),
            font.header().bpp()
        ));
    }

    #[test]
    fn index_tracks_every_table_slot() {
        let mut font = Font::new();
        for (i, code) in ['x', 'y', 'z'].iter().enumerate() {
            assert!(font.insert(
                glyph(*code as u32, 1, 1, 1),
                &solid_bytes(3, i as u8)
            ));
        }
        font.remove('y' as u32);
        for (i, it) in font.chars().iter().enumerate() {
            assert_eq!(font.index[&it.code], i);
        }
        assert_eq!(font.index.len(), font.chars().len());
    }

    #[test]
    fn glyph_data_views_the_right_slice() {
        let mut font = Font::new();
        let a = solid_bytes(3, 10);
        let b = solid_bytes(12, 50);
        assert!(font.insert(glyph('a' as u32, 1, 1, 1), &a));
        assert!(font.insert(glyph('b' as u32, 2, 2, 2), &b));

        let view = font.glyph_data(font.glyph('b' as u32));
        assert!(view.is_valid());
        assert_eq!(view.bytes(), b.as_slice());

        // A glyph the table does not know about has no data.
        let stranger = glyph('q' as u32, 1, 1, 1);
        assert!(!font.glyph_data(&stranger).is_valid());
        assert!(font.glyph_data_owned(&stranger).is_none());

        let owned = font.glyph_data_owned(font.glyph('a' as u32)).unwrap();
        assert_eq!(owned.bytes(), a.as_slice());
    }

    #[test]
    fn load_import_adopts_and_validates() {
        let header = Header {
            line_height: 12,
            padding: [1, 2, 3, 4],
            count: 2,
            ..Header::default()
        };
        let chars = vec![
            Glyph {
                pos: 0,
                ..glyph('a' as u32, 2, 2, 2)
            },
            Glyph {
                pos: 12,
                ..glyph('b' as u32, 1, 1, 1)
            },
        ];
        let good = StubImport {
            header,
            chars: chars.clone(),
            arena: solid_bytes(15, 0),
        };

        let mut font = Font::new();
        assert!(font.load_import(&good));
        assert!(font.is_valid());
        assert_eq!(font.header().max_width, 2);
        assert_eq!(font.header().padding, [1, 2, 3, 4]);
        assert_eq!(font.glyph('b' as u32).pos, 12);
        assert_eq!(font.space.width, 6);

        // Arena one byte short: the store rejects and empties itself.
        let bad = StubImport {
            header,
            chars,
            arena: solid_bytes(14, 0),
        };
        assert!(!font.load_import(&bad));
        assert!(!font.is_valid());
        assert!(font.arena().is_empty());
    }

    #[test]
    fn clear_resets_header_and_tables() {
        let mut font = Font::new();
        assert!(font.insert(glyph('a' as u32, 1, 1, 1), &solid_bytes(3, 0)));
        font.clear();
        assert_eq!(*font.header(), Header::default());
        assert!(font.chars().is_empty());
        assert!(font.arena().is_empty());
        assert!(!font.is_valid());
    }
}
