use bytes::{Bytes, BytesMut};

use super::CodecId;

/// What a start code means for access unit boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// First start code of a new picture.
    Picture,
    /// Header that precedes a picture (sequence/GOP header, SPS, PPS, AUD, SEI).
    Header,
    /// Anything that belongs to the current access unit.
    Inside,
    /// Not enough bytes yet to classify the start code.
    NeedMore,
}

/// Splits an MPEG-2 video or H.264 Annex B elementary stream into access
/// units.
///
/// Decoders that need whole frames read through this parser, so the byte
/// stream may be fed in arbitrary pieces, including pieces that end inside
/// a start code.
pub struct ElementaryStreamParser {
    codec: CodecId,
    buffer: BytesMut,
    /// Position of the next byte to scan for a start code.
    scan: usize,
    /// The buffered access unit already holds a picture.
    has_picture: bool,
}

impl ElementaryStreamParser {
    pub fn new(codec: CodecId) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            scan: 0,
            has_picture: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete access unit, if the buffer holds one.
    pub fn next_unit(&mut self) -> Option<Bytes> {
        while self.scan + 3 < self.buffer.len() {
            let i = self.scan;
            if self.buffer[i] != 0 || self.buffer[i + 1] != 0 || self.buffer[i + 2] != 1 {
                self.scan += 1;
                continue;
            }

            match self.classify(&self.buffer[i + 3..]) {
                Boundary::NeedMore => return None,
                Boundary::Picture | Boundary::Header if self.has_picture => {
                    // a leading zero byte belongs to the next unit's start code
                    let cut = if i > 0 && self.buffer[i - 1] == 0 { i - 1 } else { i };
                    let unit = self.buffer.split_to(cut).freeze();
                    self.scan = i - cut;
                    self.has_picture = false;
                    return Some(unit);
                }
                Boundary::Picture => self.has_picture = true,
                Boundary::Header | Boundary::Inside => {}
            }
            self.scan = i + 3;
        }
        None
    }

    /// Whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scan = 0;
        self.has_picture = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn classify(&self, payload: &[u8]) -> Boundary {
        let Some(&code) = payload.first() else {
            return Boundary::NeedMore;
        };

        match self.codec {
            CodecId::Mpeg2Video => match code {
                0x00 => Boundary::Picture,
                // sequence header, GOP header
                0xB3 | 0xB8 => Boundary::Header,
                _ => Boundary::Inside,
            },
            CodecId::H264 => match code & 0x1F {
                // coded slice: first_mb_in_slice == 0 starts a new picture
                1 | 5 => match payload.get(1) {
                    Some(b) if b & 0x80 != 0 => Boundary::Picture,
                    Some(_) => Boundary::Inside,
                    None => Boundary::NeedMore,
                },
                // SEI, SPS, PPS, access unit delimiter
                6..=9 => Boundary::Header,
                _ => Boundary::Inside,
            },
            CodecId::RawVideo => Boundary::Inside,
        }
    }
}
