//! Text measurement and line layout.
//!
//! The drawer walks a run of resolved glyphs, breaks it into lines inside
//! an optional bounding box, aligns the lines, and hands every visible
//! glyph to a host callback together with its pixel data. Whitespace
//! advances the pen but is never emitted: a space is worth one space
//! width, a tab two.
//!
//! Run indices are taken modulo the run length, so `Line` values computed
//! against one starting point keep working when re-emitted against
//! another.

use crate::font::{Font, Glyph};
use crate::pixel::PixelView;

pub const AL_LEFT: u8 = 1 << 1;
pub const AL_HCENTER: u8 = 1 << 2;
pub const AL_RIGHT: u8 = 1 << 3;
pub const AL_TOP: u8 = 1 << 4;
pub const AL_VCENTER: u8 = 1 << 5;
pub const AL_BOTTOM: u8 = 1 << 6;

/// Measured text box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    #[inline(always)]
    pub fn adjust(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.x += x;
        self.y += y;
        self.w += w;
        self.h += h;
    }
}

/// One laid-out line: a half-open index range into the run plus its draw
/// offset and final width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Line {
    pub left: i32,
    pub right: i32,
    pub ox: i32,
    pub oy: i32,
    pub width: i32,
}

impl Default for Line {
    #[inline(always)]
    fn default() -> Self {
        Self {
            left: -1,
            right: -1,
            ox: 0,
            oy: 0,
            width: 0,
        }
    }
}

/// Layout options.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Combination of the `AL_*` bits.
    pub align: u8,
    /// Horizontal glyph spacing; negative means the header's recommended
    /// spacing.
    pub spacing_x: i32,
    /// Extra vertical spacing between lines.
    pub spacing_y: i32,
    /// When false, prefer breaking at the last space in the second half of
    /// the line instead of splitting a word.
    pub break_word: bool,
}

impl Default for Options {
    #[inline(always)]
    fn default() -> Self {
        Self {
            align: AL_LEFT | AL_BOTTOM,
            spacing_x: -1,
            spacing_y: 0,
            break_word: true,
        }
    }
}

/// Space units a glyph stands for: 1 for space, 2 for tab, else 0.
#[inline(always)]
fn whitespace(chr: &Glyph) -> i32 {
    if chr.code == ' ' as u32 {
        return 1;
    }
    if chr.code == '\t' as u32 {
        return 2;
    }
    0
}

/// Measures and emits glyph runs against a borrowed store.
pub struct Drawer<'f> {
    font: &'f Font,
}

impl<'f> Drawer<'f> {
    pub fn new(font: &'f Font) -> Self {
        Self { font }
    }

    pub fn font(&self) -> &Font {
        self.font
    }

    /// Measures a run inside a `w` by `h` box (negative means unbounded).
    ///
    /// Returns the aligned text box and, when `out_lines` is given,
    /// appends one [`Line`] per laid-out line with its index range and
    /// offsets filled in.
    pub fn measure(
        &self,
        run: &[&Glyph],
        w: i32,
        h: i32,
        opts: &Options,
        mut out_lines: Option<&mut Vec<Line>>,
    ) -> Rect {
        let size = run.len() as i32;
        if size < 1 {
            return Rect::default();
        }
        let header = self.font.header();
        let align = opts.align;
        let spc_x = if opts.spacing_x < 0 {
            i32::from(header.spacing_x)
        } else {
            opts.spacing_x
        };
        let spc_y = opts.spacing_y;
        let line_height = i32::from(header.line_height);
        let keep_words = !opts.break_word;
        let wsp = i32::from(self.font.glyph(' ' as u32).xadvance);
        let padding = header.padding;
        let at = |i: i32| run[i.rem_euclid(size) as usize];

        let mut text_width = 0;
        let mut text_height = 0;
        {
            let mut line_width = 0;
            let mut line = Line::default();
            // The pass at i == size forces the last line to flush.
            let mut i = 0;
            while i <= size {
                let c = at(i);
                if c.code == 0 {
                    i += 1;
                    continue;
                }
                if line.left < 0 {
                    line.left = i;
                }

                let sp = whitespace(c) * wsp;
                let cw = if sp == 0 { i32::from(c.xadvance) } else { sp };
                if (w >= 0 && line_width > 0 && line_width + cw > w)
                    || c.code == '\n' as u32
                    || i == size
                {
                    let mut skip = c.code == '\n' as u32 || sp != 0;
                    if !skip && keep_words && i < size {
                        // Breaking here would split a word. Rewind to the
                        // last space, but only if it sits in the second
                        // half of the line; otherwise accept the split.
                        let mut lw = line_width;
                        let mut idx = -1;
                        let left = line.left + (i - 1 - line.left) / 2;
                        let mut j = i - 1;
                        while j > left {
                            let it = at(j);
                            let spj = whitespace(it) * wsp;
                            if spj == 0 {
                                lw -= i32::from(c.xadvance) + spc_x;
                            } else {
                                lw -= spj;
                                idx = j;
                                if j - 1 > 0 && at(j - 1).code != ' ' as u32 {
                                    lw -= spc_x;
                                }
                                break;
                            }
                            j -= 1;
                        }
                        if idx == -1 {
                            line_width -= spc_x;
                        } else {
                            skip = true;
                            i = idx;
                            line_width = lw;
                        }
                    } else {
                        line_width -= spc_x;
                    }

                    line_width += i32::from(padding[0]) + i32::from(padding[1]);
                    line.right = i;
                    line.width = line_width;
                    if let Some(lines) = out_lines.as_deref_mut() {
                        lines.push(line);
                    }
                    line.left = i;

                    text_width = text_width.max(line_width);
                    text_height += line_height + spc_y;
                    line_width = 0;
                    if skip {
                        line.left = -1;
                        i += 1;
                        continue;
                    }
                }
                if sp == 0 {
                    line_width += cw + spc_x;
                } else {
                    line_width += sp;
                }
                i += 1;
            }

            text_height -= spc_y;
            text_height += i32::from(padding[1]) + i32::from(padding[3]);
        }

        let mut ox = 0;
        let mut oy = 0;
        if align & AL_RIGHT != 0 {
            ox -= if w > 0 { text_width - w } else { text_width };
        } else if align & AL_HCENTER != 0 {
            ox -= if w > 0 {
                (text_width - w) / 2
            } else {
                text_width / 2
            };
        }
        if align & AL_BOTTOM != 0 {
            oy -= if h > 0 { text_height - h } else { text_height };
        } else if align & AL_VCENTER != 0 {
            oy -= if h > 0 {
                (text_height - h) / 2
            } else {
                text_height / 2
            };
        }

        if let Some(lines) = out_lines {
            for (num, it) in lines.iter_mut().enumerate() {
                it.ox = if align & AL_RIGHT != 0 {
                    ox + (text_width - it.width)
                } else if align & AL_HCENTER != 0 {
                    ox + (text_width - it.width) / 2
                } else {
                    ox
                };
                it.oy = oy + (line_height + spc_y) * num as i32;
            }
        }

        Rect {
            x: ox,
            y: oy,
            w: text_width,
            h: text_height,
        }
    }

    /// Measures, then emits every visible glyph through `perchar` as
    /// `(x, y, glyph, pixel data)`. Spaces and tabs only move the pen.
    /// Returns the measured box translated to `(x, y)`.
    pub fn draw(
        &self,
        run: &[&Glyph],
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        opts: &Options,
        mut perchar: impl FnMut(i32, i32, &Glyph, PixelView<'_>),
    ) -> Rect {
        if run.is_empty() {
            return Rect::default();
        }
        let header = self.font.header();
        let padding = header.padding;
        let spc_x = if opts.spacing_x < 0 {
            i32::from(header.spacing_x)
        } else {
            opts.spacing_x
        };
        let wsp = i32::from(self.font.glyph(' ' as u32).xadvance);
        let ox = x + i32::from(padding[0]);
        let oy = y + i32::from(padding[1]);

        let mut lines = Vec::new();
        let mut rect = self.measure(run, w, h, opts, Some(&mut lines));
        for line in &lines {
            self.emit_line(run, ox, oy, line, spc_x, wsp, &mut perchar, None);
        }
        rect.x += x;
        rect.y += y;
        rect
    }

    /// Emits one previously measured line. The whitespace step here is the
    /// space glyph's width rather than its advance.
    pub fn draw_line(
        &self,
        run: &[&Glyph],
        x: i32,
        y: i32,
        line: &Line,
        spacing_x: i32,
        mut perchar: impl FnMut(i32, i32, &Glyph, PixelView<'_>),
    ) -> Rect {
        let header = self.font.header();
        let padding = header.padding;
        let spc_x = if spacing_x < 0 {
            i32::from(header.spacing_x)
        } else {
            spacing_x
        };
        let wsp = i32::from(self.font.glyph(' ' as u32).width);
        let mut rect = Rect::default();
        self.emit_line(
            run,
            x + i32::from(padding[0]),
            y + i32::from(padding[1]),
            line,
            spc_x,
            wsp,
            &mut perchar,
            Some(&mut rect),
        );
        rect
    }

    /// Emits a single glyph at a pen position.
    pub fn draw_glyph(
        &self,
        chr: &Glyph,
        x: i32,
        y: i32,
        mut perchar: impl FnMut(i32, i32, &Glyph, PixelView<'_>),
    ) {
        perchar(
            x + i32::from(chr.xoffset),
            y + i32::from(chr.yoffset),
            chr,
            self.font.glyph_data(chr),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_line(
        &self,
        run: &[&Glyph],
        x: i32,
        y: i32,
        line: &Line,
        spc_x: i32,
        wsp: i32,
        perchar: &mut impl FnMut(i32, i32, &Glyph, PixelView<'_>),
        out_rect: Option<&mut Rect>,
    ) {
        let size = run.len() as i32;
        if size < 1 {
            return;
        }
        let at = |i: i32| run[i.rem_euclid(size) as usize];

        let mut cx = x + line.ox;
        let cy = y + line.oy;
        let mut i = line.left;
        while i < line.right {
            let c = at(i);
            let sp = whitespace(c) * wsp;
            if sp != 0 {
                cx += sp;
            } else {
                perchar(
                    cx + i32::from(c.xoffset),
                    cy + i32::from(c.yoffset),
                    c,
                    self.font.glyph_data(c),
                );
                cx += i32::from(c.xadvance) + spc_x;
            }
            i += 1;
        }
        if let Some(rect) = out_rect {
            rect.x = x + line.ox;
            rect.y = y + line.oy;
            rect.w = cx - rect.x;
            rect.h = i32::from(self.font.header().line_height);
        }
    }
}
