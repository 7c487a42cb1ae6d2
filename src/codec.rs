//! CKF container encode/decode.
//!
//! File layout: 3 magic bytes `CKF`, one compression flag byte, then the
//! body. The body is the header record, `count` glyph records and the raw
//! arena, in that order. A compressed body is the same bytes pushed
//! through an LZ4 frame whose header carries the exact content size.
//!
//! Records are tightly packed little-endian; struct layout never reaches
//! the wire:
//!
//! ```text
//! header  lang[4] flag:u8 count:u16 lineHeight:u8 maxWidth:u8
//!         spacingX:u8 transparent:u32 padding[4]          = 18 bytes
//! glyph   code:u32 pos:u32 width:u8 height:u8 xadvance:u8
//!         xoffset:i8 yoffset:i8                           = 13 bytes
//! ```

use std::error::Error;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::warn;

use lz4_flex::frame::{FrameDecoder, FrameEncoder, FrameInfo};

use crate::font::{Font, Glyph, Header, arena_well_formed};

const MAGIC: &[u8; 3] = b"CKF";
pub(crate) const HEADER_SIZE: usize = 18;
pub(crate) const GLYPH_SIZE: usize = 13;

fn write_header(out: &mut impl Write, h: &Header) -> std::io::Result<()> {
    out.write_all(&h.lang)?;
    out.write_all(&[h.flag])?;
    out.write_all(&h.count.to_le_bytes())?;
    out.write_all(&[h.line_height, h.max_width, h.spacing_x])?;
    out.write_all(&h.transparent.to_le_bytes())?;
    out.write_all(&h.padding)
}

fn read_header(rec: &[u8]) -> Header {
    Header {
        lang: [rec[0], rec[1], rec[2], rec[3]],
        flag: rec[4],
        count: u16::from_le_bytes([rec[5], rec[6]]),
        line_height: rec[7],
        max_width: rec[8],
        spacing_x: rec[9],
        transparent: u32::from_le_bytes([rec[10], rec[11], rec[12], rec[13]]),
        padding: [rec[14], rec[15], rec[16], rec[17]],
    }
}

fn write_glyph(out: &mut impl Write, g: &Glyph) -> std::io::Result<()> {
    out.write_all(&g.code.to_le_bytes())?;
    out.write_all(&g.pos.to_le_bytes())?;
    out.write_all(&[g.width, g.height, g.xadvance, g.xoffset as u8, g.yoffset as u8])
}

fn read_glyph(rec: &[u8]) -> Glyph {
    Glyph {
        code: u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]),
        pos: u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]),
        width: rec[8],
        height: rec[9],
        xadvance: rec[10],
        xoffset: rec[11] as i8,
        yoffset: rec[12] as i8,
    }
}

impl Font {
    /// Writes the store to a file, see [`Font::write_to`].
    pub fn save(&mut self, path: impl AsRef<Path>, compress: bool) -> Result<(), Box<dyn Error>> {
        let file = fs::File::create(path)?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out, compress)?;
        out.flush()?;
        Ok(())
    }

    /// Serializes the store. `count` and `max_width` are recomputed from
    /// the glyph table before the header goes out, and the arena is
    /// trimmed to the exact byte total of the table.
    pub fn write_to(&mut self, mut out: impl Write, compress: bool) -> Result<(), Box<dyn Error>> {
        out.write_all(MAGIC)?;
        out.write_all(&[u8::from(compress)])?;

        self.header.count = self.chars.len() as u16;
        self.header.max_width = self.chars.iter().map(|c| c.width).max().unwrap_or(0);
        let bpp = self.header.bpp();
        let arena_size: usize = self.chars.iter().map(|c| c.data_len(bpp)).sum();
        self.arena.resize(arena_size, 0);

        if compress {
            let mut info = FrameInfo::new();
            info.content_size =
                Some((HEADER_SIZE + self.chars.len() * GLYPH_SIZE + arena_size) as u64);
            let mut enc = FrameEncoder::with_frame_info(info, out);
            self.write_body(&mut enc)?;
            enc.finish()?;
        } else {
            self.write_body(&mut out)?;
        }
        Ok(())
    }

    fn write_body(&self, out: &mut impl Write) -> std::io::Result<()> {
        write_header(out, &self.header)?;
        for it in &self.chars {
            write_glyph(out, it)?;
        }
        out.write_all(&self.arena)
    }

    /// Reads the store from a file, see [`Font::load`].
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let file = fs::File::open(path)?;
        self.load(BufReader::new(file))
    }

    /// Parses a serialized store from memory, see [`Font::load`].
    pub fn load_bytes(&mut self, data: &[u8]) -> Result<(), Box<dyn Error>> {
        self.load(data)
    }

    /// Parses a serialized store from a stream.
    ///
    /// The glyph table and arena are dropped up front; every failure path
    /// leaves them empty. A compressed body is inflated into memory before
    /// structured parsing resumes.
    pub fn load(&mut self, mut input: impl Read) -> Result<(), Box<dyn Error>> {
        self.index.clear();
        self.chars.clear();
        self.arena.clear();

        let mut prefix = [0u8; 4];
        input.read_exact(&mut prefix)?;
        if &prefix[..3] != MAGIC {
            warn!("illegal file tag");
            return Err("illegal file tag".into());
        }
        let compressed = prefix[3] != 0;

        let mut body = Vec::new();
        if compressed {
            let mut dec = FrameDecoder::new(input);
            dec.read_to_end(&mut body)?;
        } else {
            input.read_to_end(&mut body)?;
        }
        self.parse_body(&body)
    }

    fn parse_body(&mut self, body: &[u8]) -> Result<(), Box<dyn Error>> {
        if body.len() < HEADER_SIZE {
            warn!("file too small for a header record");
            return Err("truncated header".into());
        }
        self.header = read_header(&body[..HEADER_SIZE]);

        let count = usize::from(self.header.count);
        let mut offset = HEADER_SIZE;
        let mut chars = Vec::with_capacity(count);
        let mut arena = Vec::new();
        if count > 0 {
            while chars.len() < count && offset + GLYPH_SIZE <= body.len() {
                chars.push(read_glyph(&body[offset..offset + GLYPH_SIZE]));
                offset += GLYPH_SIZE;
            }
            if chars.len() != count {
                warn!("glyph table overflowed the file, font is likely broken");
                return Err("truncated glyph table".into());
            }
            arena = body[offset..].to_vec();
        }

        if !arena_well_formed(&chars, arena.len(), self.header.bpp()) {
            warn!("font validation failed");
            return Err("font validation failed".into());
        }

        self.chars = chars;
        self.arena = arena;
        self.rebuild_index();
        self.refresh_space();
        Ok(())
    }
}
