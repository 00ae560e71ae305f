//! Chunk-boundary-safe conversion between encoded bytes and UTF-16.
//!
//! A [`CodeConvert`] is built once per stream for one code page. Both
//! directions take an input slice with a read cursor and a growable output
//! buffer with a write cursor. Each call converts as many complete characters
//! as it can and advances the cursors; an incomplete sequence at the end of
//! the input is left unread so the caller can append more data and call again.
//!
//! UTF-16 and UTF-32 are converted here, with surrogate validation and byte
//! swapping for the big-endian forms. UTF-8 and the single-byte and
//! double-byte code pages go through the host converter in batches that are
//! trimmed back to a character boundary first.

use bitflags::bitflags;
use encoding_rs::Encoding;

use crate::codepage::{
    CODE_PAGE_UTF8, CODE_PAGE_UTF16BE, CODE_PAGE_UTF16LE, CODE_PAGE_UTF32BE, CODE_PAGE_UTF32LE,
    CodePageCategory, CodePageInfo,
};
use crate::host::{self, HostCodePage, HostOutcome, ensure_len};
use crate::{Error, Result};

/// Largest batch handed to the host converter in one call.
pub(crate) const BATCH_MAX: usize = i32::MAX as usize / 2;

const REPLACEMENT: u16 = 0xFFFD;
const DEFAULT_CHAR: u8 = b'?';

bitflags! {
    /// Validation options for one conversion call
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConvertFlags: u32 {
        /// Stop with [`Error::InvalidSequence`] instead of substituting.
        ///
        /// Applies to decoding, and to encoding into a Unicode code page.
        const ERROR_ON_INVALID = 1 << 0;
        /// Never map a character to a visually similar one.
        ///
        /// The host converter has no best-fit tables, so output is always
        /// no-best-fit; the flag is accepted for callers that request it.
        const NO_BEST_FIT = 1 << 1;
        /// Decoding only: the input ends here. A trailing incomplete
        /// sequence is malformed input instead of being left unread.
        const END_OF_INPUT = 1 << 2;
    }
}

/// Outcome of a successful conversion call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Everything converted exactly
    Complete,
    /// Some input was replaced by U+FFFD or the default character
    Substituted,
}

impl Status {
    fn from_substituted(substituted: bool) -> Self {
        if substituted {
            Status::Substituted
        } else {
            Status::Complete
        }
    }

    /// Returns true if a replacement or default character was used
    pub fn is_substituted(self) -> bool {
        self == Status::Substituted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Utf8,
    LeadBytes(&'static HostCodePage),
    SingleByte,
}

impl Boundary {
    /// Length of the longest prefix of `batch` that ends on a character boundary.
    fn complete_len(self, batch: &[u8]) -> usize {
        match self {
            Boundary::Utf8 => utf8_complete_len(batch),
            Boundary::LeadBytes(page) => dbcs_complete_len(page, batch),
            Boundary::SingleByte => batch.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Route {
    FixedWidth { width: Width, big_endian: bool },
    Host {
        encoding: &'static Encoding,
        boundary: Boundary,
    },
}

/// Streaming converter for one code page
#[derive(Debug, Clone, Copy)]
pub struct CodeConvert {
    code_page: u32,
    category: CodePageCategory,
    route: Route,
    batch_max: usize,
}

impl CodeConvert {
    /// Creates a converter, resolving the auto code pages and rejecting
    /// code pages that cannot be streamed.
    pub fn new(code_page: u32) -> Result<Self> {
        let info = CodePageInfo::new(code_page);
        if !info.is_supported() {
            return Err(unsupported(info));
        }

        let route = match info.code_page {
            CODE_PAGE_UTF16LE | CODE_PAGE_UTF16BE => Route::FixedWidth {
                width: Width::U16,
                big_endian: info.code_page == CODE_PAGE_UTF16BE,
            },
            CODE_PAGE_UTF32LE | CODE_PAGE_UTF32BE => Route::FixedWidth {
                width: Width::U32,
                big_endian: info.code_page == CODE_PAGE_UTF32BE,
            },
            CODE_PAGE_UTF8 => Route::Host {
                encoding: encoding_rs::UTF_8,
                boundary: Boundary::Utf8,
            },
            id => {
                let Some(page) = host::lookup(id) else {
                    return Err(unsupported(info));
                };
                let boundary = match info.category {
                    CodePageCategory::DoubleByte => Boundary::LeadBytes(page),
                    _ => Boundary::SingleByte,
                };
                Route::Host {
                    encoding: page.encoding,
                    boundary,
                }
            }
        };

        Ok(Self {
            code_page: info.code_page,
            category: info.category,
            route,
            batch_max: BATCH_MAX,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_batch_max(mut self, batch_max: usize) -> Self {
        self.batch_max = batch_max;
        self
    }

    /// Resolved code page
    pub fn code_page(&self) -> u32 {
        self.code_page
    }

    /// Category of the code page
    pub fn category(&self) -> CodePageCategory {
        self.category
    }

    /// Returns true for UTF-8, UTF-16 and UTF-32 code pages
    pub fn is_unicode(&self) -> bool {
        self.category == CodePageCategory::Unicode
    }

    /// Decodes `input[*in_pos..]` into `out[*out_pos..]`, growing `out` as needed.
    ///
    /// On return `*in_pos` is short of `input.len()` only when the input ends
    /// in an incomplete sequence and [`ConvertFlags::END_OF_INPUT`] is not
    /// set. With [`ConvertFlags::ERROR_ON_INVALID`],
    /// malformed input stops the call with [`Error::InvalidSequence`] and the
    /// cursors point at the malformed sequence.
    pub fn encoded_to_utf16(
        &self,
        input: &[u8],
        in_pos: &mut usize,
        out: &mut Vec<u16>,
        out_pos: &mut usize,
        flags: ConvertFlags,
    ) -> Result<Status> {
        check_cursors(input.len(), *in_pos, out.len(), *out_pos)?;

        match self.route {
            Route::FixedWidth {
                width: Width::U16,
                big_endian,
            } => self.decode_utf16(input, in_pos, out, out_pos, big_endian, flags),
            Route::FixedWidth {
                width: Width::U32,
                big_endian,
            } => self.decode_utf32(input, in_pos, out, out_pos, big_endian, flags),
            Route::Host { encoding, boundary } => {
                self.decode_host(encoding, boundary, input, in_pos, out, out_pos, flags)
            }
        }
    }

    /// Encodes `input[*in_pos..]` into `out[*out_pos..]`, growing `out` as needed.
    ///
    /// A trailing high surrogate is left unread until its partner arrives.
    /// `default_char` replaces characters the code page cannot represent
    /// (`?` when `None`); passing one for a Unicode code page is an
    /// [`Error::InvalidParameter`].
    pub fn utf16_to_encoded(
        &self,
        input: &[u16],
        in_pos: &mut usize,
        out: &mut Vec<u8>,
        out_pos: &mut usize,
        flags: ConvertFlags,
        default_char: Option<u8>,
    ) -> Result<Status> {
        check_cursors(input.len(), *in_pos, out.len(), *out_pos)?;
        if default_char.is_some() && self.is_unicode() {
            return Err(Error::InvalidParameter(
                "a default character cannot be used with a Unicode code page",
            ));
        }
        let strict = flags.contains(ConvertFlags::ERROR_ON_INVALID);

        match self.route {
            Route::FixedWidth { width, big_endian } => {
                self.encode_fixed(input, in_pos, out, out_pos, width, big_endian, strict)
            }
            Route::Host { encoding, boundary } => self.encode_host(
                encoding,
                matches!(boundary, Boundary::Utf8),
                input,
                in_pos,
                out,
                out_pos,
                strict && self.is_unicode(),
                default_char.unwrap_or(DEFAULT_CHAR),
            ),
        }
    }

    fn invalid(&self, position: usize) -> Error {
        Error::InvalidSequence {
            code_page: self.code_page,
            position,
        }
    }

    fn decode_utf16(
        &self,
        input: &[u8],
        in_pos: &mut usize,
        out: &mut Vec<u16>,
        out_pos: &mut usize,
        big_endian: bool,
        flags: ConvertFlags,
    ) -> Result<Status> {
        let strict = flags.contains(ConvertFlags::ERROR_ON_INVALID);
        let end = flags.contains(ConvertFlags::END_OF_INPUT);
        let src = &input[*in_pos..];
        let count = src.len() / 2;
        let unit = |i: usize| {
            let bytes = [src[2 * i], src[2 * i + 1]];
            if big_endian {
                u16::from_be_bytes(bytes)
            } else {
                u16::from_le_bytes(bytes)
            }
        };
        ensure_len(out, *out_pos, count + 1);

        let mut read = 0;
        let mut written = *out_pos;
        let mut substituted = false;
        while read < count {
            let first = unit(read);
            let next = (read + 1 < count).then(|| unit(read + 1));
            match pairing(first, next) {
                Pairing::Single => {
                    out[written] = first;
                    written += 1;
                    read += 1;
                }
                Pairing::Pair(second) => {
                    out[written] = first;
                    out[written + 1] = second;
                    written += 2;
                    read += 2;
                }
                Pairing::Incomplete if !end => break,
                Pairing::Incomplete | Pairing::Unpaired => {
                    if strict {
                        *in_pos += 2 * read;
                        *out_pos = written;
                        return Err(self.invalid(*in_pos));
                    }
                    out[written] = REPLACEMENT;
                    written += 1;
                    read += 1;
                    substituted = true;
                }
            }
        }

        *in_pos += 2 * read;
        if end && src.len() % 2 != 0 {
            // odd byte left at the end
            if strict {
                *out_pos = written;
                return Err(self.invalid(*in_pos));
            }
            out[written] = REPLACEMENT;
            written += 1;
            *in_pos += 1;
            substituted = true;
        }
        *out_pos = written;
        Ok(Status::from_substituted(substituted))
    }

    fn decode_utf32(
        &self,
        input: &[u8],
        in_pos: &mut usize,
        out: &mut Vec<u16>,
        out_pos: &mut usize,
        big_endian: bool,
        flags: ConvertFlags,
    ) -> Result<Status> {
        let strict = flags.contains(ConvertFlags::ERROR_ON_INVALID);
        let src = &input[*in_pos..];
        ensure_len(out, *out_pos, src.len() / 4 * 2 + 1);

        let mut read = 0;
        let mut written = *out_pos;
        let mut substituted = false;
        for chunk in src.chunks_exact(4) {
            let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let value = if big_endian {
                u32::from_be_bytes(bytes)
            } else {
                u32::from_le_bytes(bytes)
            };
            match char::from_u32(value) {
                Some(ch) => {
                    written += ch.encode_utf16(&mut out[written..]).len();
                }
                None if strict => {
                    *in_pos += read;
                    *out_pos = written;
                    return Err(self.invalid(*in_pos));
                }
                None => {
                    out[written] = REPLACEMENT;
                    written += 1;
                    substituted = true;
                }
            }
            read += 4;
        }

        *in_pos += read;
        if flags.contains(ConvertFlags::END_OF_INPUT) && read < src.len() {
            if strict {
                *out_pos = written;
                return Err(self.invalid(*in_pos));
            }
            out[written] = REPLACEMENT;
            written += 1;
            *in_pos += src.len() - read;
            substituted = true;
        }
        *out_pos = written;
        Ok(Status::from_substituted(substituted))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_host(
        &self,
        encoding: &'static Encoding,
        boundary: Boundary,
        input: &[u8],
        in_pos: &mut usize,
        out: &mut Vec<u16>,
        out_pos: &mut usize,
        flags: ConvertFlags,
    ) -> Result<Status> {
        let strict = flags.contains(ConvertFlags::ERROR_ON_INVALID);
        let end = flags.contains(ConvertFlags::END_OF_INPUT);
        let mut substituted = false;
        loop {
            let remaining = &input[*in_pos..];
            let batch = &remaining[..remaining.len().min(self.batch_max)];
            let complete = if end && batch.len() == remaining.len() {
                batch.len()
            } else {
                boundary.complete_len(batch)
            };
            if complete == 0 {
                break;
            }

            match host::decode_batch(encoding, &batch[..complete], out, *out_pos, strict) {
                HostOutcome::Done {
                    read,
                    written,
                    substituted: replaced,
                } => {
                    *in_pos += read;
                    *out_pos += written;
                    substituted |= replaced;
                }
                HostOutcome::Malformed { read, written } => {
                    *in_pos += read;
                    *out_pos += written;
                    return Err(self.invalid(*in_pos));
                }
            }
        }
        Ok(Status::from_substituted(substituted))
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_fixed(
        &self,
        input: &[u16],
        in_pos: &mut usize,
        out: &mut Vec<u8>,
        out_pos: &mut usize,
        width: Width,
        big_endian: bool,
        strict: bool,
    ) -> Result<Status> {
        let src = &input[*in_pos..];
        let unit_size = match width {
            Width::U16 => 2,
            Width::U32 => 4,
        };
        ensure_len(out, *out_pos, src.len() * unit_size);

        let mut read = 0;
        let mut written = *out_pos;
        let mut substituted = false;
        let mut failed = false;
        let mut emit = |out: &mut Vec<u8>, units: &[u16]| match width {
            Width::U16 => {
                for &unit in units {
                    let bytes = if big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    };
                    out[written..written + 2].copy_from_slice(&bytes);
                    written += 2;
                }
            }
            Width::U32 => {
                let value = match *units {
                    [high, low] => {
                        0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00)
                    }
                    _ => u32::from(units[0]),
                };
                let bytes = if big_endian {
                    value.to_be_bytes()
                } else {
                    value.to_le_bytes()
                };
                out[written..written + 4].copy_from_slice(&bytes);
                written += 4;
            }
        };

        while read < src.len() {
            match pairing(src[read], src.get(read + 1).copied()) {
                Pairing::Single => {
                    emit(out, &src[read..read + 1]);
                    read += 1;
                }
                Pairing::Pair(_) => {
                    emit(out, &src[read..read + 2]);
                    read += 2;
                }
                Pairing::Incomplete => break,
                Pairing::Unpaired => {
                    if strict {
                        failed = true;
                        break;
                    }
                    emit(out, &[REPLACEMENT]);
                    read += 1;
                    substituted = true;
                }
            }
        }

        *in_pos += read;
        *out_pos = written;
        if failed {
            return Err(self.invalid(*in_pos));
        }
        Ok(Status::from_substituted(substituted))
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_host(
        &self,
        encoding: &'static Encoding,
        utf8: bool,
        input: &[u16],
        in_pos: &mut usize,
        out: &mut Vec<u8>,
        out_pos: &mut usize,
        strict: bool,
        default_char: u8,
    ) -> Result<Status> {
        let mut substituted = false;
        loop {
            let remaining = &input[*in_pos..];
            let mut len = remaining.len().min(self.batch_max);
            if len > 0 && is_high_surrogate(remaining[len - 1]) {
                len -= 1;
            }
            if len == 0 {
                break;
            }

            let mut batch = &remaining[..len];
            let mut failure = false;
            if utf8 {
                if let Some(bad) = first_unpaired_surrogate(batch) {
                    if strict {
                        batch = &batch[..bad];
                        failure = true;
                    } else {
                        substituted = true;
                    }
                }
            }

            if !batch.is_empty() {
                match host::encode_batch(encoding, batch, out, *out_pos, default_char) {
                    HostOutcome::Done {
                        read,
                        written,
                        substituted: replaced,
                    } => {
                        *in_pos += read;
                        *out_pos += written;
                        substituted |= replaced;
                    }
                    HostOutcome::Malformed { .. } => {
                        return Err(Error::Conversion {
                            code_page: self.code_page,
                            detail: "encoder reported a malformed sequence".to_string(),
                        });
                    }
                }
            }

            if failure {
                return Err(self.invalid(*in_pos));
            }
        }
        Ok(Status::from_substituted(substituted))
    }
}

fn unsupported(info: CodePageInfo) -> Error {
    Error::Unsupported {
        code_page: info.code_page,
        name: info.name,
        category: info.category,
    }
}

fn check_cursors(in_len: usize, in_pos: usize, out_len: usize, out_pos: usize) -> Result<()> {
    if in_pos > in_len {
        return Err(Error::InvalidParameter("input position is past the end of the input"));
    }
    if out_pos > out_len {
        return Err(Error::InvalidParameter("output position is past the end of the output"));
    }
    Ok(())
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

enum Pairing {
    Single,
    Pair(u16),
    Incomplete,
    Unpaired,
}

/// Classifies `unit` given the unit after it (`None` at end of input).
fn pairing(unit: u16, next: Option<u16>) -> Pairing {
    match unit {
        0xD800..=0xDBFF => match next {
            None => Pairing::Incomplete,
            Some(low @ 0xDC00..=0xDFFF) => Pairing::Pair(low),
            Some(_) => Pairing::Unpaired,
        },
        0xDC00..=0xDFFF => Pairing::Unpaired,
        _ => Pairing::Single,
    }
}

/// Index of the first surrogate without a partner. A high surrogate in the
/// last position counts as unpaired.
fn first_unpaired_surrogate(units: &[u16]) -> Option<usize> {
    let mut index = 0;
    while index < units.len() {
        match pairing(units[index], units.get(index + 1).copied()) {
            Pairing::Single => index += 1,
            Pairing::Pair(_) => index += 2,
            Pairing::Incomplete | Pairing::Unpaired => return Some(index),
        }
    }
    None
}

/// Trims a trailing UTF-8 sequence that cannot complete within `batch`.
///
/// Only a well-formed lead byte within the last four bytes is trimmed; any
/// other tail is passed through so the decoder can report or replace it.
pub(crate) fn utf8_complete_len(batch: &[u8]) -> usize {
    match batch.last() {
        None => return 0,
        Some(&last) if last < 0x80 => return batch.len(),
        Some(_) => {}
    }

    for back in 1..=batch.len().min(4) {
        let index = batch.len() - back;
        let byte = batch[index];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let trail = match byte {
            0xC0..=0xDF => 1,
            0xE0..=0xEF => 2,
            0xF0..=0xF7 => 3,
            _ => return batch.len(),
        };
        return if back <= trail { index } else { batch.len() };
    }
    batch.len()
}

/// Drops a trailing lead byte whose trail byte has not arrived yet.
///
/// Trail bytes can fall inside the lead-byte ranges, so the parity of the
/// run of lead-range bytes at the tail decides whether the last one is a lead.
pub(crate) fn dbcs_complete_len(page: &HostCodePage, batch: &[u8]) -> usize {
    let leads = batch
        .iter()
        .rev()
        .take_while(|&&byte| page.is_lead_byte(byte))
        .count();
    if leads % 2 == 1 {
        batch.len() - 1
    } else {
        batch.len()
    }
}
