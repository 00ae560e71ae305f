//! Code-page metadata and conversion backend for non-Unicode encodings.
//!
//! Windows code-page identifiers are mapped onto `encoding_rs` encodings. The
//! table plays the role of the platform's code-page service: it answers the
//! `max_char_size`/lead-byte questions used for classification and provides
//! the converter for single-byte and double-byte pages (and for UTF-8).

use std::ops::RangeInclusive;

use encoding_rs::{
    BIG5, DecoderResult, EUC_JP, EUC_KR, EncoderResult, Encoding, GB18030, GBK, IBM866,
    ISO_2022_JP, ISO_8859_2, ISO_8859_3, ISO_8859_4, ISO_8859_5, ISO_8859_6, ISO_8859_7,
    ISO_8859_8, ISO_8859_8_I, ISO_8859_13, ISO_8859_15, KOI8_R, KOI8_U, MACINTOSH, SHIFT_JIS,
    WINDOWS_874, WINDOWS_1250, WINDOWS_1251, WINDOWS_1252, WINDOWS_1253, WINDOWS_1254,
    WINDOWS_1255, WINDOWS_1256, WINDOWS_1257, WINDOWS_1258, X_MAC_CYRILLIC,
};

/// Lead-byte ranges shared by the GBK, UHC and Big5 code pages.
const LEAD_81_FE: &[RangeInclusive<u8>] = &[0x81..=0xFE];
const LEAD_SHIFT_JIS: &[RangeInclusive<u8>] = &[0x81..=0x9F, 0xE0..=0xFC];

/// One code page known to the host service.
#[derive(Debug)]
pub(crate) struct HostCodePage {
    pub id: u32,
    pub encoding: &'static Encoding,
    pub max_char_size: u8,
    pub lead_bytes: &'static [RangeInclusive<u8>],
}

impl HostCodePage {
    const fn sbcs(id: u32, encoding: &'static Encoding) -> Self {
        Self {
            id,
            encoding,
            max_char_size: 1,
            lead_bytes: &[],
        }
    }

    const fn dbcs(id: u32, encoding: &'static Encoding, lead_bytes: &'static [RangeInclusive<u8>]) -> Self {
        Self {
            id,
            encoding,
            max_char_size: 2,
            lead_bytes,
        }
    }

    const fn wide(id: u32, encoding: &'static Encoding, max_char_size: u8) -> Self {
        Self {
            id,
            encoding,
            max_char_size,
            lead_bytes: &[],
        }
    }

    pub fn is_lead_byte(&self, byte: u8) -> bool {
        self.lead_bytes.iter().any(|range| range.contains(&byte))
    }

    pub fn display_name(&self) -> String {
        format!("{} ({})", self.id, self.encoding.name())
    }
}

static HOST_CODE_PAGES: &[HostCodePage] = &[
    HostCodePage::sbcs(866, IBM866),
    HostCodePage::sbcs(874, WINDOWS_874),
    HostCodePage::dbcs(932, SHIFT_JIS, LEAD_SHIFT_JIS),
    HostCodePage::dbcs(936, GBK, LEAD_81_FE),
    HostCodePage::dbcs(949, EUC_KR, LEAD_81_FE),
    HostCodePage::dbcs(950, BIG5, LEAD_81_FE),
    HostCodePage::sbcs(1250, WINDOWS_1250),
    HostCodePage::sbcs(1251, WINDOWS_1251),
    HostCodePage::sbcs(1252, WINDOWS_1252),
    HostCodePage::sbcs(1253, WINDOWS_1253),
    HostCodePage::sbcs(1254, WINDOWS_1254),
    HostCodePage::sbcs(1255, WINDOWS_1255),
    HostCodePage::sbcs(1256, WINDOWS_1256),
    HostCodePage::sbcs(1257, WINDOWS_1257),
    HostCodePage::sbcs(1258, WINDOWS_1258),
    HostCodePage::sbcs(10000, MACINTOSH),
    HostCodePage::sbcs(10007, X_MAC_CYRILLIC),
    HostCodePage::sbcs(20866, KOI8_R),
    HostCodePage::wide(20932, EUC_JP, 3),
    HostCodePage::sbcs(21866, KOI8_U),
    HostCodePage::sbcs(28592, ISO_8859_2),
    HostCodePage::sbcs(28593, ISO_8859_3),
    HostCodePage::sbcs(28594, ISO_8859_4),
    HostCodePage::sbcs(28595, ISO_8859_5),
    HostCodePage::sbcs(28596, ISO_8859_6),
    HostCodePage::sbcs(28597, ISO_8859_7),
    HostCodePage::sbcs(28598, ISO_8859_8),
    HostCodePage::sbcs(28603, ISO_8859_13),
    HostCodePage::sbcs(28605, ISO_8859_15),
    HostCodePage::sbcs(38598, ISO_8859_8_I),
    HostCodePage::wide(50220, ISO_2022_JP, 5),
    HostCodePage::wide(51932, EUC_JP, 3),
    HostCodePage::wide(54936, GB18030, 4),
];

/// Looks up a code page. `None` means the host reports an error for the id.
pub(crate) fn lookup(id: u32) -> Option<&'static HostCodePage> {
    HOST_CODE_PAGES.iter().find(|page| page.id == id)
}

/// All code pages known to the host, in ascending id order.
pub(crate) fn all() -> impl Iterator<Item = &'static HostCodePage> {
    HOST_CODE_PAGES.iter()
}

/// Maps a charset label (e.g. from a locale string) to a host code page id.
pub(crate) fn for_label(label: &str) -> Option<u32> {
    let encoding = Encoding::for_label_no_replacement(label.as_bytes())?;
    if encoding == encoding_rs::UTF_8 {
        return Some(crate::codepage::CODE_PAGE_UTF8);
    }
    HOST_CODE_PAGES
        .iter()
        .find(|page| page.encoding == encoding)
        .map(|page| page.id)
}

/// Outcome of one host conversion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostOutcome {
    /// The whole batch was converted.
    Done { read: usize, written: usize, substituted: bool },
    /// Strict decoding stopped on a malformed sequence starting at `read`.
    Malformed { read: usize, written: usize },
}

/// Decodes one complete batch into `dst`, growing it when the converter runs
/// out of room. `dst` is written starting at `dst_pos`.
pub(crate) fn decode_batch(
    encoding: &'static Encoding,
    src: &[u8],
    dst: &mut Vec<u16>,
    dst_pos: usize,
    strict: bool,
) -> HostOutcome {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut read = 0;
    let mut written = 0;
    let mut substituted = false;

    loop {
        let out = &mut dst[dst_pos + written..];
        if strict {
            let (result, r, w) =
                decoder.decode_to_utf16_without_replacement(&src[read..], out, true);
            read += r;
            written += w;
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(bad, after) => {
                    return HostOutcome::Malformed {
                        read: read - bad as usize - after as usize,
                        written,
                    };
                }
            }
        } else {
            let (result, r, w, replaced) = decoder.decode_to_utf16(&src[read..], out, true);
            read += r;
            written += w;
            substituted |= replaced;
            if result == encoding_rs::CoderResult::InputEmpty {
                break;
            }
        }

        // Output full: size the buffer for everything that is left, then retry.
        let needed = decoder
            .max_utf16_buffer_length(src.len() - read)
            .unwrap_or(src.len() - read)
            .max(2);
        ensure_len(dst, dst_pos + written, needed);
    }

    HostOutcome::Done {
        read,
        written,
        substituted,
    }
}

/// Encodes one complete batch into `dst`, replacing unmappable characters
/// with `default_char`.
pub(crate) fn encode_batch(
    encoding: &'static Encoding,
    src: &[u16],
    dst: &mut Vec<u8>,
    dst_pos: usize,
    default_char: u8,
) -> HostOutcome {
    let mut encoder = encoding.new_encoder();
    let mut read = 0;
    let mut written = 0;
    let mut substituted = false;

    loop {
        let out = &mut dst[dst_pos + written..];
        let (result, r, w) = encoder.encode_from_utf16_without_replacement(&src[read..], out, true);
        read += r;
        written += w;
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::Unmappable(_) => {
                ensure_len(dst, dst_pos + written, 1);
                dst[dst_pos + written] = default_char;
                written += 1;
                substituted = true;
                continue;
            }
            EncoderResult::OutputFull => {}
        }

        let needed = encoder
            .max_buffer_length_from_utf16_without_replacement(src.len() - read)
            .unwrap_or(src.len() - read)
            .max(4);
        ensure_len(dst, dst_pos + written, needed);
    }

    HostOutcome::Done {
        read,
        written,
        substituted,
    }
}

/// Grows `buf` so that at least `additional` elements are available after `pos`.
/// Never shrinks.
pub(crate) fn ensure_len<T: Copy + Default>(buf: &mut Vec<T>, pos: usize, additional: usize) {
    let required = pos.saturating_add(additional);
    if buf.len() < required {
        buf.resize(required, T::default());
    }
}
