//! Glyph atlas packing.
//!
//! The packer walks a store's glyph table in reverse order and places each
//! image on a fixed-size page using a skyline of horizontal segments: one
//! list describes the upper envelope left by the previous row, one is
//! being built for the current row. Pages are allocated through a host
//! sink, which also blits the glyph bytes; the atlas only keeps the
//! handles.

use std::collections::HashMap;

use crate::font::{Font, Glyph};
use crate::pixel::PixelView;

/// A placed glyph: the base record plus its page and pixel position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AtlasGlyph {
    pub glyph: Glyph,
    pub page: u8,
    pub x: u32,
    pub y: u32,
}

impl AtlasGlyph {
    const fn sentinel(code: u32) -> Self {
        Self {
            glyph: Glyph::sentinel(code),
            page: 0,
            x: 0,
            y: 0,
        }
    }
}

static ATLAS_NUL: AtlasGlyph = AtlasGlyph::sentinel(0);
static ATLAS_NEWLINE: AtlasGlyph = AtlasGlyph::sentinel('\n' as u32);
static ATLAS_TAB: AtlasGlyph = AtlasGlyph::sentinel('\t' as u32);

/// Packed glyph table plus the opaque page handles it was packed onto.
///
/// Lookup mirrors the font store, minus the synthetic space: a codepoint
/// with no entry resolves to the first packed glyph.
#[derive(Clone, Debug)]
pub struct FontAtlas<P> {
    chars: Vec<AtlasGlyph>,
    pages: Vec<P>,
    index: HashMap<u32, usize>,
}

impl<P> Default for FontAtlas<P> {
    fn default() -> Self {
        Self {
            chars: Vec::new(),
            pages: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<P> FontAtlas<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn glyph(&self, code: u32) -> &AtlasGlyph {
        if self.chars.is_empty() || code == 0 || code == '\r' as u32 {
            return &ATLAS_NUL;
        }
        if code == '\n' as u32 {
            return &ATLAS_NEWLINE;
        }
        if code == '\t' as u32 {
            return &ATLAS_TAB;
        }
        match self.index.get(&code) {
            Some(&i) => &self.chars[i],
            None => &self.chars[0],
        }
    }

    pub fn glyphs(&self, text: &str) -> Vec<&AtlasGlyph> {
        text.chars().map(|c| self.glyph(c as u32)).collect()
    }

    pub fn glyphs_utf16(&self, units: &[u16]) -> Vec<&AtlasGlyph> {
        units.iter().map(|&u| self.glyph(u32::from(u))).collect()
    }

    pub fn glyphs_codes(&self, units: &[u32]) -> Vec<&AtlasGlyph> {
        units.iter().map(|&u| self.glyph(u)).collect()
    }

    /// Packed glyphs in placement order.
    pub fn chars(&self) -> &[AtlasGlyph] {
        &self.chars
    }

    pub fn pages(&self) -> &[P] {
        &self.pages
    }

    /// Drops every glyph and page handle.
    pub fn clear(&mut self) {
        self.index.clear();
        self.chars.clear();
        self.pages.clear();
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, it) in self.chars.iter().enumerate() {
            self.index.insert(it.glyph.code, i);
        }
    }
}

/// Host side of the packer: allocates pages and writes glyph bytes onto
/// them.
pub trait PageSink<P> {
    /// Allocates one page of the builder's configured dimensions.
    fn new_page(&mut self) -> P;

    /// Blits a glyph's pixels onto a page at `(chr.x, chr.y)`.
    fn write_glyph(&mut self, font: &Font, chr: &AtlasGlyph, data: PixelView<'_>, page: &mut P);
}

/// Sink that allocates nothing; used to dry-run the packer for size
/// estimates.
struct NullSink;

impl PageSink<()> for NullSink {
    fn new_page(&mut self) {}

    fn write_glyph(&mut self, _font: &Font, _chr: &AtlasGlyph, _data: PixelView<'_>, _page: &mut ()) {}
}

/// One skyline segment: the envelope is at height `y` over `start..end`.
#[derive(Clone, Copy, Debug)]
struct Segment {
    start: u32,
    end: u32,
    y: u32,
}

/// Highest envelope over `start..end`, scanning from the segment that
/// contains `start` to the one that contains `end`.
fn find_y_offset(row: &[Segment], start: u32, end: u32) -> u32 {
    let (start, end) = if end < start { (end, start) } else { (start, end) };
    let mut oy = 0;
    let mut in_range = false;
    for seg in row {
        if start >= seg.start && start <= seg.end {
            in_range = true;
        }
        if in_range {
            oy = oy.max(seg.y);
        }
        if end >= seg.start && end <= seg.end {
            break;
        }
    }
    oy
}

const ESTIMATE_MAX_STEPS: u32 = 64;

/// Packs a store's glyphs into fixed-size pages.
pub struct AtlasBuilder {
    width: u32,
    height: u32,
    spacing: u32,
}

impl AtlasBuilder {
    /// Page dimensions and inter-glyph spacing; spacing is clamped to at
    /// least 1.
    pub fn new(width: u32, height: u32, spacing: u8) -> Self {
        Self {
            width,
            height,
            spacing: u32::from(spacing).max(1),
        }
    }

    /// Packs every glyph that fits a page, biggest-last stores first: the
    /// table is walked in reverse so a store built small-to-large opens
    /// each row with its largest glyphs. Returns false when nothing was
    /// placed.
    ///
    /// A glyph wider or taller than a page (spacing included on both
    /// sides) is skipped. When the last glyph alone overflows onto a new
    /// page, no page is allocated for it: the entry keeps the next page
    /// index but no blit happens.
    pub fn build<P>(
        &self,
        font: &Font,
        sink: &mut impl PageSink<P>,
        out: &mut FontAtlas<P>,
    ) -> bool {
        out.clear();
        let chars = font.chars();
        out.chars.reserve(chars.len());
        let sp = self.spacing;

        let mut page: u8 = 0;
        let mut left = sp;
        let mut yo_last = vec![Segment {
            start: 0,
            end: self.width,
            y: sp,
        }];
        let mut yo_cur: Vec<Segment> = Vec::new();

        let total = chars.len();
        let mut texture = Some(sink.new_page());
        for (k, c) in chars.iter().rev().enumerate() {
            if texture.is_none() {
                break;
            }
            if u32::from(c.width) + sp * 2 > self.width {
                continue;
            }
            if u32::from(c.height) + sp * 2 > self.height {
                continue;
            }

            let mut right = left + u32::from(c.width) + sp;
            if right > self.width {
                left = sp;
                right = left + u32::from(c.width) + sp;
                yo_last = std::mem::take(&mut yo_cur);
            }

            let mut top = find_y_offset(&yo_last, left, right);
            let mut bottom = top + u32::from(c.height) + sp;
            if bottom > self.height {
                if let Some(tex) = texture.take() {
                    out.pages.push(tex);
                }
                if k + 1 < total {
                    texture = Some(sink.new_page());
                }
                page = page.wrapping_add(1);
                yo_last = vec![Segment {
                    start: 0,
                    end: self.width,
                    y: sp,
                }];
                yo_cur.clear();
                top = sp;
                bottom = top + u32::from(c.height) + sp;
            }

            let chr = AtlasGlyph {
                glyph: *c,
                page,
                x: left,
                y: top,
            };
            if let Some(tex) = texture.as_mut() {
                sink.write_glyph(font, &chr, font.glyph_data(c), tex);
            }
            out.chars.push(chr);

            yo_cur.push(Segment {
                start: left,
                end: right,
                y: bottom,
            });
            left = right;
        }

        if !out.chars.is_empty()
            && let Some(tex) = texture.take()
        {
            out.pages.push(tex);
        }
        out.rebuild_index();
        !out.chars.is_empty()
    }

    /// Estimates the width of the smallest square page that packs the
    /// whole store: starts at the area lower bound and bisects with a
    /// halving increment seeded from the widest glyph. Bounded to a fixed
    /// number of packing passes; returns the current width when the bound
    /// is hit, 0 when nothing can be packed.
    pub fn estimate(font: &Font, spacing: u8) -> u32 {
        let sp = u64::from(spacing);
        let mut increment = u32::from(font.header().max_width);
        let area: u64 = font
            .chars()
            .iter()
            .map(|c| (u64::from(c.width) + sp) * (u64::from(c.height) + sp))
            .sum();
        let mut width = (area as f64).sqrt() as u32;
        if width < 1 {
            return 0;
        }

        let mut sink = NullSink;
        let mut atlas: FontAtlas<()> = FontAtlas::new();
        let mut last_n = 0usize;
        for _ in 0..ESTIMATE_MAX_STEPS {
            AtlasBuilder::new(width, width, spacing).build(font, &mut sink, &mut atlas);
            let n = atlas.pages().len();
            if n < 1 {
                return 0;
            }

            if last_n > 1 && n == 1 {
                if increment < 2 {
                    return width;
                }
                increment /= 2;
            } else if last_n == 1 && n != 1 && increment > 2 {
                increment /= 2;
            }

            if n > 1 {
                width += increment;
            } else {
                width = width.saturating_sub(increment);
            }
            last_n = n;
        }
        width
    }

    /// Estimates the power-of-two square size wasting the least area.
    ///
    /// Both bounds snap to their nearest power of two and every
    /// power-of-two width in between is packed; the one whose last page
    /// keeps the smallest free-area ratio wins. Returns 0 when no size
    /// packs anything.
    pub fn estimate_pow2(font: &Font, spacing: u8, min_width: u32, max_width: u32) -> u32 {
        let sp = u64::from(spacing);
        let mut min = nearest_pow2(min_width);
        let mut max = nearest_pow2(max_width);
        if min > max {
            std::mem::swap(&mut min, &mut max);
        }

        let mut sink = NullSink;
        let mut atlas: FontAtlas<()> = FontAtlas::new();
        let mut best_width = 0u32;
        let mut best_ratio = f64::INFINITY;

        let mut w = min;
        loop {
            if AtlasBuilder::new(w, w, spacing).build(font, &mut sink, &mut atlas)
                && !atlas.pages().is_empty()
            {
                let last = (atlas.pages().len() - 1) as u8;
                let used: u64 = atlas
                    .chars()
                    .iter()
                    .filter(|c| c.page == last)
                    .map(|c| {
                        (u64::from(c.glyph.width) + sp) * (u64::from(c.glyph.height) + sp)
                    })
                    .sum();
                let area = u64::from(w) * u64::from(w);
                let remaining = area as i64 - used as i64;
                let ratio = remaining as f64 / area as f64;
                if ratio < best_ratio {
                    best_ratio = ratio;
                    best_width = w;
                }
            }
            if w >= max {
                break;
            }
            w *= 2;
        }
        best_width
    }
}

/// Nearest power of two, ties rounding up.
fn nearest_pow2(v: u32) -> u32 {
    if v <= 1 {
        return 1;
    }
    if v > 1 << 31 {
        return 1 << 31;
    }
    let hi = v.next_power_of_two();
    let lo = hi >> 1;
    if v - lo < hi - v { lo } else { hi }
}
