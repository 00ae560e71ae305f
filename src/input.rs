//! Read side: bytes or console text in, UTF-16 chunks out.
//!
//! A [`TextInput`] is opened on one source, optionally consumes a BOM (which
//! overrides the configured code page), and then hands out decoded text one
//! chunk at a time through [`TextInput::chars`] and
//! [`TextInput::read_next_chars`].
//!
//! ```
//! use textconv::{TextInput, TextInputFlags, CODE_PAGE_UTF8};
//!
//! let mut input = TextInput::new();
//! input
//!     .open_bytes(b"\xEF\xBB\xBFone\r\ntwo", 1252, TextInputFlags::CONSUME_BOM | TextInputFlags::FOLD_CRLF)
//!     .unwrap();
//! assert_eq!(input.code_page(), Some(CODE_PAGE_UTF8));
//! assert_eq!(String::from_utf16_lossy(input.chars()), "one\ntwo");
//! ```

use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::path::Path;

use bitflags::bitflags;
use log::{debug, trace};

use crate::bom::{ByteOrderMark, ByteOrderMatch};
use crate::codepage::CODE_PAGE_UTF16LE;
use crate::console::{ConsoleRead, Terminal};
use crate::convert::{CodeConvert, ConvertFlags};
use crate::host::ensure_len;
use crate::{Error, Result};

const FILE_BUFFER_SIZE: usize = 4096;
const CONSOLE_BUFFER_SIZE: usize = 2048;
const BOM_CHAR: u16 = 0xFEFF;
const CR: u16 = b'\r' as u16;
const LF: u16 = b'\n' as u16;
const CTRL_Z: u16 = 0x1A;

bitflags! {
    /// Options for [`TextInput`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextInputFlags: u32 {
        /// Convert CRLF and lone CR to LF
        const FOLD_CRLF = 1 << 0;
        /// Detect and skip a BOM; a detected BOM overrides the code page
        const CONSUME_BOM = 1 << 1;
        /// Fail on invalid input instead of substituting U+FFFD
        const INVALID_MBCS_ERROR = 1 << 2;
        /// Read standard input as a console when it is a terminal
        const CHECK_CONSOLE = 1 << 3;
        /// In console mode, a chunk ending in Ctrl-Z (U+001A) ends the input
        const CONSOLE_CTRL_Z = 1 << 4;
        /// `INVALID_MBCS_ERROR | CHECK_CONSOLE | CONSOLE_CTRL_Z`
        const DEFAULT = Self::INVALID_MBCS_ERROR.bits()
            | Self::CHECK_CONSOLE.bits()
            | Self::CONSOLE_CTRL_Z.bits();
    }
}

impl Default for TextInputFlags {
    fn default() -> Self {
        TextInputFlags::DEFAULT
    }
}

/// Kind of source a [`TextInput`] is reading from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInputMode {
    /// Not open
    None,
    /// In-memory UTF-16 text
    Chars,
    /// In-memory encoded bytes
    Bytes,
    /// A byte stream such as a file or pipe
    File,
    /// A UTF-16 console
    Console,
}

enum Source<'a> {
    None,
    Chars,
    Bytes,
    /// `None` once end of input was reached; the reader is dropped then.
    Reader(Option<Box<dyn Read + 'a>>),
    Console(Option<Box<dyn ConsoleRead + 'a>>),
}

/// Streaming text reader
pub struct TextInput<'a> {
    source: Source<'a>,
    codec: Option<CodeConvert>,
    flags: TextInputFlags,
    /// Unconverted bytes; `bytes[..bytes_pos]` is valid.
    bytes: Vec<u8>,
    bytes_pos: usize,
    /// Stream offset of `bytes[0]`.
    offset: usize,
    chars: Vec<u16>,
    chars_pos: usize,
    /// The previous chunk ended in CR, already emitted as LF.
    skip_next_lf: bool,
    /// Console mode: high surrogate held back from the previous chunk.
    pending_high: Option<u16>,
    /// Some input was malformed and decoded as U+FFFD.
    replaced: bool,
}

impl Default for TextInput<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> TextInput<'a> {
    /// Creates a closed input.
    pub fn new() -> Self {
        Self {
            source: Source::None,
            codec: None,
            flags: TextInputFlags::empty(),
            bytes: Vec::new(),
            bytes_pos: 0,
            offset: 0,
            chars: Vec::new(),
            chars_pos: 0,
            skip_next_lf: false,
            pending_high: None,
            replaced: false,
        }
    }

    /// Releases the source (dropping it if owned) and resets all state.
    /// Buffers keep their capacity.
    pub fn close(&mut self) {
        if !matches!(self.source, Source::None) {
            debug!("closing {:?} input", self.mode());
        }
        self.source = Source::None;
        self.codec = None;
        self.flags = TextInputFlags::empty();
        self.bytes_pos = 0;
        self.offset = 0;
        self.chars_pos = 0;
        self.skip_next_lf = false;
        self.pending_high = None;
        self.replaced = false;
    }

    /// Current mode
    pub fn mode(&self) -> TextInputMode {
        match self.source {
            Source::None => TextInputMode::None,
            Source::Chars => TextInputMode::Chars,
            Source::Bytes => TextInputMode::Bytes,
            Source::Reader(_) => TextInputMode::File,
            Source::Console(_) => TextInputMode::Console,
        }
    }

    /// Code page in effect, after any BOM override. In-memory character and
    /// console input report UTF-16LE.
    pub fn code_page(&self) -> Option<u32> {
        self.codec.map(|codec| codec.code_page())
    }

    /// The current chunk of decoded text
    pub fn chars(&self) -> &[u16] {
        &self.chars[..self.chars_pos]
    }

    /// Returns true if malformed bytes read since the input was opened were
    /// replaced with U+FFFD. Always false with
    /// [`TextInputFlags::INVALID_MBCS_ERROR`], which fails instead.
    pub fn used_replacement(&self) -> bool {
        self.replaced
    }

    /// Opens in-memory UTF-16 text. The whole text becomes the first chunk.
    pub fn open_chars(&mut self, input: &[u16], flags: TextInputFlags) -> Result<()> {
        self.close();
        self.codec = Some(CodeConvert::new(CODE_PAGE_UTF16LE)?);
        self.source = Source::Chars;
        self.flags = flags;

        let input = match input {
            [BOM_CHAR, rest @ ..] if flags.contains(TextInputFlags::CONSUME_BOM) => rest,
            _ => input,
        };
        ensure_len(&mut self.chars, 0, input.len());
        self.chars[..input.len()].copy_from_slice(input);
        self.chars_pos = input.len();
        debug!("opened {} chars", input.len());

        self.fold_crlf();
        Ok(())
    }

    /// Opens in-memory encoded bytes. The whole input is decoded at once and
    /// becomes the first chunk.
    pub fn open_bytes(&mut self, input: &[u8], code_page: u32, flags: TextInputFlags) -> Result<()> {
        self.close();
        self.codec = Some(CodeConvert::new(code_page)?);
        self.source = Source::Bytes;
        self.flags = flags;

        let mut consumed = 0;
        if flags.contains(TextInputFlags::CONSUME_BOM) {
            if let Some(bom) = ByteOrderMark::detect(input) {
                self.use_bom(bom)?;
                consumed = bom.len();
            }
        }

        ensure_len(&mut self.bytes, 0, input.len() - consumed);
        self.bytes[..input.len() - consumed].copy_from_slice(&input[consumed..]);
        self.bytes_pos = input.len() - consumed;
        self.offset = consumed;
        debug!(
            "opened {} bytes as code page {}",
            input.len(),
            self.code_page().unwrap_or(code_page)
        );
        self.convert()
    }

    /// Opens a byte stream that the input owns and drops when done.
    ///
    /// Reads ahead to detect a BOM if requested, then reads the first chunk.
    pub fn open_reader(
        &mut self,
        reader: Box<dyn Read + 'a>,
        code_page: u32,
        flags: TextInputFlags,
    ) -> Result<()> {
        self.close();
        self.codec = Some(CodeConvert::new(code_page)?);
        self.source = Source::Reader(Some(reader));
        self.flags = flags;
        debug!("opened stream input as code page {code_page}");

        ensure_len(&mut self.bytes, 0, FILE_BUFFER_SIZE);
        if flags.contains(TextInputFlags::CONSUME_BOM) {
            self.sniff_bom()?;
        }
        self.read_next_chars()?;
        Ok(())
    }

    /// Opens a byte stream the caller keeps ownership of.
    pub fn open_borrowed(
        &mut self,
        reader: &'a mut dyn Read,
        code_page: u32,
        flags: TextInputFlags,
    ) -> Result<()> {
        self.open_reader(Box::new(reader), code_page, flags)
    }

    /// Opens a file for reading.
    pub fn open_file(
        &mut self,
        path: impl AsRef<Path>,
        code_page: u32,
        flags: TextInputFlags,
    ) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!("opened input file {}", path.display());
        self.open_reader(Box::new(file), code_page, flags)
    }

    /// Opens a UTF-16 console. No BOM is consumed from a console.
    pub fn open_console(
        &mut self,
        console: Box<dyn ConsoleRead + 'a>,
        flags: TextInputFlags,
    ) -> Result<()> {
        self.close();
        self.codec = Some(CodeConvert::new(CODE_PAGE_UTF16LE)?);
        self.source = Source::Console(Some(console));
        self.flags = flags;
        debug!("opened console input");

        ensure_len(&mut self.chars, 0, CONSOLE_BUFFER_SIZE);
        self.read_next_chars()?;
        Ok(())
    }

    /// Opens standard input: as a console when it is a terminal and
    /// [`TextInputFlags::CHECK_CONSOLE`] is set, otherwise as a byte stream.
    ///
    /// `code_page` is validated even when the console is used.
    pub fn open_stdin(&mut self, code_page: u32, flags: TextInputFlags) -> Result<()> {
        let stdin = io::stdin();
        if flags.contains(TextInputFlags::CHECK_CONSOLE) && stdin.is_terminal() {
            CodeConvert::new(code_page)?;
            return self.open_console(Box::new(Terminal::new(stdin)?), flags);
        }
        self.open_reader(Box::new(stdin), code_page, flags)
    }

    /// Replaces the current chunk with the next one.
    ///
    /// Returns false once the source is exhausted and nothing more was
    /// decoded. Bytes left over at end of input are decoded before that.
    /// Invalid input in strict mode is an error, not a false return.
    pub fn read_next_chars(&mut self) -> Result<bool> {
        self.chars_pos = 0;
        match self.source {
            Source::None => return Err(Error::InvalidParameter("the input is not open")),
            Source::Chars | Source::Bytes => {}
            Source::Reader(_) => {
                while self.chars_pos == 0 && (self.is_source_open() || self.bytes_pos != 0) {
                    self.read_bytes(usize::MAX)?;
                    self.convert()?;
                }
            }
            Source::Console(_) => {
                while self.is_source_open() && self.chars_pos == 0 {
                    self.read_console()?;
                    self.fold_crlf();
                }
            }
        }
        Ok(self.chars_pos != 0)
    }

    fn is_source_open(&self) -> bool {
        matches!(
            self.source,
            Source::Reader(Some(_)) | Source::Console(Some(_))
        )
    }

    fn convert_flags(&self) -> ConvertFlags {
        let mut flags = ConvertFlags::empty();
        if self.flags.contains(TextInputFlags::INVALID_MBCS_ERROR) {
            flags |= ConvertFlags::ERROR_ON_INVALID;
        }
        if !self.is_source_open() {
            flags |= ConvertFlags::END_OF_INPUT;
        }
        flags
    }

    fn use_bom(&mut self, bom: &ByteOrderMark) -> Result<()> {
        let configured = self.code_page();
        self.codec = Some(CodeConvert::new(bom.code_page)?);
        debug!(
            "byte order mark selects code page {} (configured {:?})",
            bom.code_page, configured
        );
        Ok(())
    }

    /// Tries each standard BOM in order, reading more only while a candidate
    /// still needs data and the source is not exhausted.
    fn sniff_bom(&mut self) -> Result<()> {
        self.read_bytes(4)?;
        for bom in &ByteOrderMark::STANDARD {
            loop {
                match bom.matches(&self.bytes[..self.bytes_pos]) {
                    ByteOrderMatch::Yes => {
                        self.consume_bytes(bom.len());
                        return self.use_bom(bom);
                    }
                    ByteOrderMatch::No => break,
                    ByteOrderMatch::NeedMoreData if !self.is_source_open() => break,
                    ByteOrderMatch::NeedMoreData => self.read_bytes(bom.len() - self.bytes_pos)?,
                }
            }
        }
        Ok(())
    }

    /// Appends up to `max` bytes from the reader to the residue. Closes the
    /// source at end of input; a broken pipe counts as end of input.
    fn read_bytes(&mut self, max: usize) -> Result<()> {
        let Source::Reader(Some(reader)) = &mut self.source else {
            return Ok(());
        };
        ensure_len(&mut self.bytes, self.bytes_pos, 1);
        let end = self.bytes.len().min(self.bytes_pos.saturating_add(max));

        let read = loop {
            match reader.read(&mut self.bytes[self.bytes_pos..end]) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => break 0,
                Err(err) => return Err(err.into()),
            }
        };
        trace!("read {read} bytes");

        self.bytes_pos += read;
        if read == 0 {
            debug!("end of stream input");
            self.source = Source::Reader(None);
        }
        Ok(())
    }

    fn read_console(&mut self) -> Result<()> {
        let Source::Console(Some(console)) = &mut self.source else {
            return Ok(());
        };
        ensure_len(&mut self.chars, 0, CONSOLE_BUFFER_SIZE);

        let start = match self.pending_high.take() {
            Some(high) => {
                self.chars[0] = high;
                1
            }
            None => 0,
        };
        let read = loop {
            match console.read_utf16(&mut self.chars[start..]) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => break 0,
                Err(err) => return Err(err.into()),
            }
        };
        trace!("read {read} console chars");
        self.chars_pos = start + read;

        if read == 0 {
            debug!("end of console input");
            self.source = Source::Console(None);
            return Ok(());
        }

        let last = self.chars[self.chars_pos - 1];
        if last == CTRL_Z && self.flags.contains(TextInputFlags::CONSOLE_CTRL_Z) {
            debug!("console input ended by Ctrl-Z");
            self.chars_pos -= 1;
            self.source = Source::Console(None);
        } else if (0xD800..=0xDBFF).contains(&last) {
            self.pending_high = Some(last);
            self.chars_pos -= 1;
        }
        Ok(())
    }

    fn consume_bytes(&mut self, consumed: usize) {
        debug_assert!(consumed <= self.bytes_pos);
        self.bytes.copy_within(consumed..self.bytes_pos, 0);
        self.bytes_pos -= consumed;
        self.offset += consumed;
    }

    /// Decodes the residue into a fresh chunk, compacts what is left, and
    /// folds line endings. Once the source is exhausted an incomplete tail
    /// is decoded as malformed input.
    fn convert(&mut self) -> Result<()> {
        let Some(codec) = self.codec else {
            return Err(Error::InvalidParameter("the input is not open"));
        };
        let flags = self.convert_flags();
        self.chars_pos = 0;

        let mut consumed = 0;
        let result = codec.encoded_to_utf16(
            &self.bytes[..self.bytes_pos],
            &mut consumed,
            &mut self.chars,
            &mut self.chars_pos,
            flags,
        );
        let result = match result {
            Err(Error::InvalidSequence {
                code_page,
                position,
            }) => Err(Error::InvalidSequence {
                code_page,
                position: self.offset + position,
            }),
            other => other.map(|status| self.replaced |= status.is_substituted()),
        };
        self.consume_bytes(consumed);
        trace!("decoded {} chars, {} bytes left over", self.chars_pos, self.bytes_pos);

        self.fold_crlf();
        result
    }

    /// Folds CRLF and lone CR to LF in the current chunk. A CR at the end of
    /// the chunk becomes LF, and an LF at the start of the next chunk is
    /// then dropped.
    fn fold_crlf(&mut self) {
        if !self.flags.contains(TextInputFlags::FOLD_CRLF) || self.chars_pos == 0 {
            return;
        }

        let skip_lf = std::mem::take(&mut self.skip_next_lf);
        let chars = &mut self.chars[..self.chars_pos];
        let (mut input, mut output) = if skip_lf && chars[0] == LF {
            (1, 0)
        } else {
            match chars.iter().position(|&ch| ch == CR) {
                Some(first_cr) => (first_cr, first_cr),
                None => return,
            }
        };

        while input < chars.len() {
            let ch = chars[input];
            if ch != CR {
                chars[output] = ch;
                output += 1;
            } else if input + 1 == chars.len() {
                chars[output] = LF;
                output += 1;
                self.skip_next_lf = true;
            } else if chars[input + 1] != LF {
                chars[output] = LF;
                output += 1;
            }
            input += 1;
        }
        self.chars_pos = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::{CODE_PAGE_UTF8, CODE_PAGE_UTF16LE, CODE_PAGE_UTF32LE};
    use crate::to_utf16;
    use std::collections::VecDeque;

    /// Returns one queued chunk per read call.
    struct Chunks(VecDeque<io::Result<Vec<u8>>>);

    impl Chunks {
        fn new(chunks: &[&[u8]]) -> Self {
            Chunks(chunks.iter().map(|chunk| Ok(chunk.to_vec())).collect())
        }
    }

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(mut chunk)) => {
                    let count = chunk.len().min(buf.len());
                    buf[..count].copy_from_slice(&chunk[..count]);
                    if count < chunk.len() {
                        self.0.push_front(Ok(chunk.split_off(count)));
                    }
                    Ok(count)
                }
            }
        }
    }

    struct FakeConsole(VecDeque<Vec<u16>>);

    impl ConsoleRead for FakeConsole {
        fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize> {
            let Some(chunk) = self.0.pop_front() else {
                return Ok(0);
            };
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn read_all(input: &mut TextInput) -> Result<String> {
        let mut all = input.chars().to_vec();
        while input.read_next_chars()? {
            all.extend_from_slice(input.chars());
        }
        Ok(String::from_utf16_lossy(&all))
    }

    #[test]
    fn test_fold_crlf_in_memory() {
        let mut input = TextInput::new();
        input
            .open_chars(&to_utf16("a\r\nb\rc\nd"), TextInputFlags::FOLD_CRLF)
            .unwrap();
        assert_eq!(input.mode(), TextInputMode::Chars);
        assert_eq!(String::from_utf16_lossy(input.chars()), "a\nb\nc\nd");
        assert!(!input.read_next_chars().unwrap());
    }

    #[test]
    fn test_fold_crlf_across_chunks() {
        let mut input = TextInput::new();
        let reader = Chunks::new(&[b"a\r", b"\nb"]);
        input
            .open_reader(Box::new(reader), CODE_PAGE_UTF8, TextInputFlags::FOLD_CRLF)
            .unwrap();
        assert_eq!(String::from_utf16_lossy(input.chars()), "a\n");
        assert_eq!(read_all(&mut input).unwrap(), "a\nb");
    }

    #[test]
    fn test_chunk_of_only_skipped_lf_reads_on() {
        let mut input = TextInput::new();
        let reader = Chunks::new(&[b"x\r", b"\n", b"y\r\r\n"]);
        input
            .open_reader(Box::new(reader), 1252, TextInputFlags::FOLD_CRLF)
            .unwrap();
        assert_eq!(read_all(&mut input).unwrap(), "x\ny\n\n");
    }

    #[test]
    fn test_utf8_bom_consumed_from_bytes() {
        let mut input = TextInput::new();
        input
            .open_bytes(
                &[0xEF, 0xBB, 0xBF, 0x41, 0x42],
                CODE_PAGE_UTF8,
                TextInputFlags::CONSUME_BOM,
            )
            .unwrap();
        assert_eq!(input.mode(), TextInputMode::Bytes);
        assert_eq!(input.chars(), &to_utf16("AB")[..]);
        assert_eq!(input.code_page(), Some(CODE_PAGE_UTF8));
    }

    #[test]
    fn test_bom_ignored_without_flag() {
        let mut input = TextInput::new();
        input
            .open_bytes(&[0xEF, 0xBB, 0xBF, 0x41], CODE_PAGE_UTF8, TextInputFlags::empty())
            .unwrap();
        assert_eq!(input.chars(), &[0xFEFF, 0x41]);
    }

    #[test]
    fn test_bom_sniffed_from_trickling_reader() {
        let mut input = TextInput::new();
        let data = [0xFF, 0xFE, 0x00, 0x00, 0x41, 0x00, 0x00, 0x00];
        let chunks: Vec<&[u8]> = data.chunks(1).collect();
        input
            .open_reader(Box::new(Chunks::new(&chunks)), 1252, TextInputFlags::CONSUME_BOM)
            .unwrap();
        assert_eq!(input.code_page(), Some(CODE_PAGE_UTF32LE));
        assert_eq!(read_all(&mut input).unwrap(), "A");
    }

    #[test]
    fn test_two_byte_stream_is_utf16_bom() {
        let mut reader: &[u8] = &[0xFF, 0xFE];
        let mut input = TextInput::new();
        input
            .open_borrowed(&mut reader, 1252, TextInputFlags::CONSUME_BOM)
            .unwrap();
        assert_eq!(input.code_page(), Some(CODE_PAGE_UTF16LE));
        assert!(input.chars().is_empty());
        assert!(!input.read_next_chars().unwrap());
    }

    #[test]
    fn test_no_bom_keeps_code_page() {
        let mut input = TextInput::new();
        let reader: &[u8] = b"\xFF\xFEx";
        input
            .open_reader(Box::new(reader), 1252, TextInputFlags::CONSUME_BOM)
            .unwrap();
        assert_eq!(input.code_page(), Some(CODE_PAGE_UTF16LE));

        let reader: &[u8] = b"\xE9t\xE9";
        input
            .open_reader(Box::new(reader), 1252, TextInputFlags::CONSUME_BOM)
            .unwrap();
        assert_eq!(input.code_page(), Some(1252));
        assert_eq!(read_all(&mut input).unwrap(), "été");
    }

    #[test]
    fn test_large_stream_spans_refills() {
        let text = "line of text with ü and 😀\r\n".repeat(500);
        let mut input = TextInput::new();
        let reader = io::Cursor::new(text.clone().into_bytes());
        input
            .open_reader(Box::new(reader), CODE_PAGE_UTF8, TextInputFlags::DEFAULT)
            .unwrap();
        assert_eq!(read_all(&mut input).unwrap(), text);
    }

    #[test]
    fn test_truncated_input_at_end() {
        let mut input = TextInput::new();
        let reader: &[u8] = b"ab\xE2\x82";
        input
            .open_reader(Box::new(reader), CODE_PAGE_UTF8, TextInputFlags::empty())
            .unwrap();
        assert_eq!(read_all(&mut input).unwrap(), "ab\u{FFFD}");

        let reader: &[u8] = b"ab\xE2\x82";
        let err = input
            .open_reader(Box::new(reader), CODE_PAGE_UTF8, TextInputFlags::INVALID_MBCS_ERROR)
            .and_then(|()| read_all(&mut input).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSequence { position: 2, .. }));
    }

    #[test]
    fn test_malformed_tail_replaced_like_mid_stream() {
        let mut input = TextInput::new();
        let reader = Chunks::new(&[b"a\xE0", b"\x80"]);
        input
            .open_reader(Box::new(reader), CODE_PAGE_UTF8, TextInputFlags::empty())
            .unwrap();
        assert_eq!(read_all(&mut input).unwrap(), "a\u{FFFD}\u{FFFD}");

        input
            .open_bytes(b"a\xE0\x80", CODE_PAGE_UTF8, TextInputFlags::empty())
            .unwrap();
        assert_eq!(String::from_utf16_lossy(input.chars()), "a\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn test_used_replacement() {
        let mut input = TextInput::new();
        input
            .open_reader(Box::new(Chunks::new(&[b"fine"])), CODE_PAGE_UTF8, TextInputFlags::empty())
            .unwrap();
        read_all(&mut input).unwrap();
        assert!(!input.used_replacement());

        input
            .open_reader(
                Box::new(Chunks::new(&[b"a\xFF", b"b"])),
                CODE_PAGE_UTF8,
                TextInputFlags::empty(),
            )
            .unwrap();
        assert_eq!(read_all(&mut input).unwrap(), "a\u{FFFD}b");
        assert!(input.used_replacement());

        input.close();
        assert!(!input.used_replacement());

        input
            .open_bytes(&[0x41, 0x00, 0x42], CODE_PAGE_UTF16LE, TextInputFlags::empty())
            .unwrap();
        assert_eq!(input.chars(), &[0x41, 0xFFFD]);
        assert!(input.used_replacement());
    }

    #[test]
    fn test_invalid_position_is_stream_offset() {
        let mut input = TextInput::new();
        let reader = Chunks::new(&[b"ab", b"c\xFF"]);
        input
            .open_reader(Box::new(reader), CODE_PAGE_UTF8, TextInputFlags::INVALID_MBCS_ERROR)
            .unwrap();
        let err = read_all(&mut input).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSequence {
                code_page: CODE_PAGE_UTF8,
                position: 3
            }
        ));
    }

    #[test]
    fn test_broken_pipe_is_end_of_input() {
        let mut chunks = Chunks::new(&[b"partial"]);
        chunks
            .0
            .push_back(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        let mut input = TextInput::new();
        input
            .open_reader(Box::new(chunks), 1252, TextInputFlags::DEFAULT)
            .unwrap();
        assert_eq!(read_all(&mut input).unwrap(), "partial");
    }

    #[test]
    fn test_read_error_propagates() {
        let mut chunks = Chunks::new(&[]);
        chunks
            .0
            .push_back(Err(io::Error::from(io::ErrorKind::PermissionDenied)));
        let mut input = TextInput::new();
        let err = input
            .open_reader(Box::new(chunks), 1252, TextInputFlags::DEFAULT)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_console_ctrl_z_ends_input() {
        let console = FakeConsole(VecDeque::from([
            to_utf16("one\r\n"),
            to_utf16("two\u{1A}"),
            to_utf16("never read"),
        ]));
        let mut input = TextInput::new();
        input
            .open_console(
                Box::new(console),
                TextInputFlags::FOLD_CRLF | TextInputFlags::CONSOLE_CTRL_Z,
            )
            .unwrap();
        assert_eq!(input.mode(), TextInputMode::Console);
        assert_eq!(read_all(&mut input).unwrap(), "one\ntwo");
    }

    #[test]
    fn test_console_holds_back_high_surrogate() {
        let emoji = to_utf16("\u{1F600}");
        let console = FakeConsole(VecDeque::from([
            vec![0x41, emoji[0]],
            vec![emoji[1], 0x42],
        ]));
        let mut input = TextInput::new();
        input
            .open_console(Box::new(console), TextInputFlags::empty())
            .unwrap();
        assert_eq!(input.chars(), &[0x41]);
        assert!(input.read_next_chars().unwrap());
        assert_eq!(input.chars(), &[emoji[0], emoji[1], 0x42]);
        assert!(!input.read_next_chars().unwrap());
    }

    #[test]
    fn test_chars_bom_and_close() {
        let mut input = TextInput::new();
        input
            .open_chars(&[0xFEFF, 0x41], TextInputFlags::CONSUME_BOM)
            .unwrap();
        assert_eq!(input.chars(), &[0x41]);

        input.close();
        assert_eq!(input.mode(), TextInputMode::None);
        assert_eq!(input.code_page(), None);
        assert!(input.chars().is_empty());
        assert!(matches!(
            input.read_next_chars(),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_unsupported_code_page_rejected_before_reading() {
        let mut input = TextInput::new();
        let err = input
            .open_bytes(b"abc", 54936, TextInputFlags::DEFAULT)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert_eq!(input.mode(), TextInputMode::None);
    }
}
