//! Write side: UTF-16 text in, encoded bytes or console text out.
//!
//! A [`TextOutput`] accepts UTF-16 through [`TextOutput::write_chars`],
//! optionally expands LF to CRLF, encodes, and buffers or writes the result.
//! Buffered bytes are flushed on [`TextOutput::flush`], on
//! [`TextOutput::close`], and when the output is dropped.

use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::Path;

use bitflags::bitflags;
use log::{debug, trace, warn};

use crate::codepage::CODE_PAGE_UTF16LE;
use crate::console::{ConsoleWrite, Terminal};
use crate::convert::{CodeConvert, ConvertFlags};
use crate::host::ensure_len;
use crate::{Error, Result};

/// Buffered bytes that trigger a flush in stream mode.
const AUTO_FLUSH_SIZE: usize = 16384;
/// Largest single write to a stream or console.
const WRITE_MAX: usize = 1 << 20;
const BOM_CHAR: u16 = 0xFEFF;
const CR: u16 = b'\r' as u16;
const LF: u16 = b'\n' as u16;

bitflags! {
    /// Options for [`TextOutput`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextOutputFlags: u32 {
        /// Write every LF as CRLF
        const EXPAND_CRLF = 1 << 0;
        /// Start Unicode output with a BOM (never written to a console)
        const INSERT_BOM = 1 << 1;
        /// Unicode targets: fail on unpaired surrogates instead of writing U+FFFD
        const INVALID_UTF16_ERROR = 1 << 2;
        /// Non-Unicode targets: never substitute a look-alike character
        const NO_BEST_FIT_CHARS = 1 << 3;
        /// Write standard output as a console when it is a terminal
        const CHECK_CONSOLE = 1 << 4;
        /// `INVALID_UTF16_ERROR | NO_BEST_FIT_CHARS | CHECK_CONSOLE`
        const DEFAULT = Self::INVALID_UTF16_ERROR.bits()
            | Self::NO_BEST_FIT_CHARS.bits()
            | Self::CHECK_CONSOLE.bits();
    }
}

impl Default for TextOutputFlags {
    fn default() -> Self {
        TextOutputFlags::DEFAULT
    }
}

/// Kind of sink a [`TextOutput`] is writing to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutputMode {
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

enum Sink<'a> {
    None,
    Chars,
    Bytes,
    Writer(Box<dyn Write + 'a>),
    Console(Box<dyn ConsoleWrite + 'a>),
}

/// Streaming text writer
pub struct TextOutput<'a> {
    sink: Sink<'a>,
    codec: Option<CodeConvert>,
    flags: TextOutputFlags,
    /// Encoded bytes not yet written; `bytes[..bytes_pos]` is valid.
    bytes: Vec<u8>,
    bytes_pos: usize,
    /// Chars mode: the output text. Other modes: text carried into the next
    /// write (an unpaired high surrogate), or scratch for CRLF expansion.
    chars: Vec<u16>,
    chars_pos: usize,
}

impl Default for TextOutput<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TextOutput<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("failed to flush text output: {err}");
        }
    }
}

impl<'a> TextOutput<'a> {
    /// Creates a closed output.
    pub fn new() -> Self {
        Self {
            sink: Sink::None,
            codec: None,
            flags: TextOutputFlags::empty(),
            bytes: Vec::new(),
            bytes_pos: 0,
            chars: Vec::new(),
            chars_pos: 0,
        }
    }

    /// Writes out buffered bytes in stream mode and flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_bytes()?;
        match &mut self.sink {
            Sink::Writer(writer) => writer.flush()?,
            Sink::Console(console) => console.flush()?,
            Sink::None | Sink::Chars | Sink::Bytes => {}
        }
        Ok(())
    }

    /// Flushes, then releases the sink (dropping it if owned) and resets all
    /// state. The sink is released even when the flush fails.
    pub fn close(&mut self) -> Result<()> {
        let result = self.flush();
        if !matches!(self.sink, Sink::None) {
            debug!("closing {:?} output", self.mode());
        }
        self.sink = Sink::None;
        self.codec = None;
        self.flags = TextOutputFlags::empty();
        self.bytes_pos = 0;
        self.chars_pos = 0;
        result
    }

    /// Current mode
    pub fn mode(&self) -> TextOutputMode {
        match self.sink {
            Sink::None => TextOutputMode::None,
            Sink::Chars => TextOutputMode::Chars,
            Sink::Bytes => TextOutputMode::Bytes,
            Sink::Writer(_) => TextOutputMode::File,
            Sink::Console(_) => TextOutputMode::Console,
        }
    }

    /// Target code page. In-memory character and console output report UTF-16LE.
    pub fn code_page(&self) -> Option<u32> {
        self.codec.map(|codec| codec.code_page())
    }

    /// Text collected in Chars mode; empty in other modes.
    pub fn buffered_chars(&self) -> &[u16] {
        match self.sink {
            Sink::Chars => &self.chars[..self.chars_pos],
            _ => &[],
        }
    }

    /// Bytes collected in Bytes mode, or not yet flushed in stream mode.
    pub fn buffered_bytes(&self) -> &[u8] {
        match self.sink {
            Sink::Bytes | Sink::Writer(_) => &self.bytes[..self.bytes_pos],
            _ => &[],
        }
    }

    /// Collects UTF-16 text in memory.
    pub fn open_chars(&mut self, flags: TextOutputFlags) -> Result<()> {
        self.close()?;
        self.codec = Some(CodeConvert::new(CODE_PAGE_UTF16LE)?);
        self.sink = Sink::Chars;
        self.flags = flags;
        debug!("opened chars output");
        self.insert_bom()
    }

    /// Collects encoded bytes in memory.
    pub fn open_bytes(&mut self, code_page: u32, flags: TextOutputFlags) -> Result<()> {
        self.close()?;
        self.codec = Some(CodeConvert::new(code_page)?);
        self.sink = Sink::Bytes;
        self.flags = flags;
        debug!("opened bytes output as code page {code_page}");
        self.insert_bom()
    }

    /// Writes to a byte stream that the output owns and drops when closed.
    pub fn open_writer(
        &mut self,
        writer: Box<dyn Write + 'a>,
        code_page: u32,
        flags: TextOutputFlags,
    ) -> Result<()> {
        self.close()?;
        self.codec = Some(CodeConvert::new(code_page)?);
        self.sink = Sink::Writer(writer);
        self.flags = flags;
        debug!("opened stream output as code page {code_page}");
        self.insert_bom()
    }

    /// Writes to a byte stream the caller keeps ownership of.
    pub fn open_borrowed(
        &mut self,
        writer: &'a mut dyn Write,
        code_page: u32,
        flags: TextOutputFlags,
    ) -> Result<()> {
        self.open_writer(Box::new(writer), code_page, flags)
    }

    /// Creates (or truncates) a file and writes to it.
    pub fn open_file(
        &mut self,
        path: impl AsRef<Path>,
        code_page: u32,
        flags: TextOutputFlags,
    ) -> Result<()> {
        let path = path.as_ref();
        CodeConvert::new(code_page)?;
        let file = File::create(path)?;
        debug!("created output file {}", path.display());
        self.open_writer(Box::new(file), code_page, flags)
    }

    /// Writes UTF-16 to a console. No BOM is written to a console.
    pub fn open_console(
        &mut self,
        console: Box<dyn ConsoleWrite + 'a>,
        flags: TextOutputFlags,
    ) -> Result<()> {
        self.close()?;
        self.codec = Some(CodeConvert::new(CODE_PAGE_UTF16LE)?);
        self.sink = Sink::Console(console);
        self.flags = flags;
        debug!("opened console output");
        Ok(())
    }

    /// Opens standard output: as a console when it is a terminal and
    /// [`TextOutputFlags::CHECK_CONSOLE`] is set, otherwise as a byte stream.
    ///
    /// `code_page` is validated even when the console is used.
    pub fn open_stdout(&mut self, code_page: u32, flags: TextOutputFlags) -> Result<()> {
        let stdout = io::stdout();
        if flags.contains(TextOutputFlags::CHECK_CONSOLE) && stdout.is_terminal() {
            CodeConvert::new(code_page)?;
            return self.open_console(Box::new(Terminal::new(stdout)?), flags);
        }
        self.open_writer(Box::new(stdout), code_page, flags)
    }

    /// Writes text. Returns true if a character had to be replaced by the
    /// default character (non-Unicode targets only; `?` when `default_char`
    /// is `None`).
    ///
    /// A trailing high surrogate is held until the next call supplies its
    /// partner. When the call fails, whatever it did not convert is
    /// discarded and the next call starts clean.
    pub fn write_chars(&mut self, chars: &[u16], default_char: Option<u8>) -> Result<bool> {
        match self.sink {
            Sink::None => Err(Error::InvalidParameter("the output is not open")),
            Sink::Chars => {
                if self.flags.contains(TextOutputFlags::EXPAND_CRLF) {
                    self.append_expanding_crlf(chars);
                } else {
                    self.append(chars);
                }
                Ok(false)
            }
            Sink::Console(_) => {
                self.write_console(chars)?;
                Ok(false)
            }
            Sink::Bytes => self.convert_and_append(chars, default_char),
            Sink::Writer(_) => {
                let used_default = self.convert_and_append(chars, default_char)?;
                if self.bytes_pos >= AUTO_FLUSH_SIZE {
                    self.flush_bytes()?;
                }
                Ok(used_default)
            }
        }
    }

    fn insert_bom(&mut self) -> Result<()> {
        let unicode = self.codec.is_some_and(|codec| codec.is_unicode());
        if unicode && self.flags.contains(TextOutputFlags::INSERT_BOM) {
            self.write_chars(&[BOM_CHAR], None)?;
        }
        Ok(())
    }

    fn append(&mut self, chars: &[u16]) {
        ensure_len(&mut self.chars, self.chars_pos, chars.len());
        self.chars[self.chars_pos..self.chars_pos + chars.len()].copy_from_slice(chars);
        self.chars_pos += chars.len();
    }

    fn append_expanding_crlf(&mut self, chars: &[u16]) {
        let line_feeds = chars.iter().filter(|&&ch| ch == LF).count();
        ensure_len(&mut self.chars, self.chars_pos, chars.len() + line_feeds);

        let mut pos = self.chars_pos;
        for &ch in chars {
            if ch == LF {
                self.chars[pos] = CR;
                pos += 1;
            }
            self.chars[pos] = ch;
            pos += 1;
        }
        self.chars_pos = pos;
    }

    /// Moves new text behind any carried-over text, expanding CRLF if asked.
    /// Returns the length of the combined text in `self.chars`, or `None`
    /// when `new_chars` can be used as is.
    fn consume_pending(&mut self, new_chars: &[u16]) -> Option<usize> {
        if self.flags.contains(TextOutputFlags::EXPAND_CRLF) {
            self.append_expanding_crlf(new_chars);
        } else if self.chars_pos != 0 {
            self.append(new_chars);
        } else {
            return None;
        }
        Some(std::mem::take(&mut self.chars_pos))
    }

    /// Keeps `input[consumed..]` for the next write. `input` is either
    /// `self.chars[..len]` (`pending` is `Some(len)`) or `new_chars`.
    fn save_remaining(&mut self, new_chars: &[u16], pending: Option<usize>, consumed: usize) {
        let total = pending.unwrap_or(new_chars.len());
        let remaining = total - consumed;
        if remaining == 0 {
            return;
        }
        match pending {
            Some(_) => self.chars.copy_within(consumed..total, 0),
            None => {
                ensure_len(&mut self.chars, 0, remaining);
                self.chars[..remaining].copy_from_slice(&new_chars[consumed..]);
            }
        }
        self.chars_pos = remaining;
    }

    fn convert_and_append(&mut self, new_chars: &[u16], default_char: Option<u8>) -> Result<bool> {
        let Some(codec) = self.codec else {
            return Err(Error::InvalidParameter("the output is not open"));
        };
        let (flags, default_char) = if codec.is_unicode() {
            let flags = if self.flags.contains(TextOutputFlags::INVALID_UTF16_ERROR) {
                ConvertFlags::ERROR_ON_INVALID
            } else {
                ConvertFlags::empty()
            };
            (flags, None)
        } else {
            let flags = if self.flags.contains(TextOutputFlags::NO_BEST_FIT_CHARS) {
                ConvertFlags::NO_BEST_FIT
            } else {
                ConvertFlags::empty()
            };
            (flags, default_char)
        };

        let pending = self.consume_pending(new_chars);
        let input = match pending {
            Some(len) => &self.chars[..len],
            None => new_chars,
        };
        let mut consumed = 0;
        let result = codec.utf16_to_encoded(
            input,
            &mut consumed,
            &mut self.bytes,
            &mut self.bytes_pos,
            flags,
            default_char,
        );
        // Text after a rejected character is dropped, not carried into the next write.
        let status = result?;
        self.save_remaining(new_chars, pending, consumed);
        Ok(status.is_substituted() && !codec.is_unicode())
    }

    /// Writes text to the console in batches that never end on a high
    /// surrogate. A lone trailing high surrogate is carried over.
    fn write_console(&mut self, new_chars: &[u16]) -> Result<()> {
        let pending = self.consume_pending(new_chars);
        let Sink::Console(console) = &mut self.sink else {
            return Ok(());
        };
        let input = match pending {
            Some(len) => &self.chars[..len],
            None => new_chars,
        };

        let mut written = 0;
        while written < input.len() {
            let mut batch = (input.len() - written).min(WRITE_MAX);
            if is_high_surrogate(input[written + batch - 1]) {
                batch -= 1;
                if batch == 0 {
                    break;
                }
            }
            match console.write_utf16(&input[written..written + batch]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(count) => written += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        trace!("wrote {written} console chars");

        self.save_remaining(new_chars, pending, written);
        Ok(())
    }

    /// Writes all buffered bytes to the stream, retrying partial writes.
    fn flush_bytes(&mut self) -> Result<()> {
        let Sink::Writer(writer) = &mut self.sink else {
            return Ok(());
        };
        let to_write = std::mem::take(&mut self.bytes_pos);

        let mut written = 0;
        while written < to_write {
            let batch = (to_write - written).min(WRITE_MAX);
            match writer.write(&self.bytes[written..written + batch]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(count) => written += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        if to_write != 0 {
            trace!("flushed {to_write} bytes");
        }
        Ok(())
    }
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}
