//! UTF-16 console endpoints.
//!
//! Console-mode streams exchange UTF-16 directly with the console instead of
//! going through the byte codec. [`Terminal`] adapts a UTF-8 terminal (or any
//! byte stream carrying UTF-8) to these traits.

use std::io::{self, Read, Write};

use crate::codepage::CODE_PAGE_UTF8;
use crate::convert::{CodeConvert, ConvertFlags};

const READ_SIZE: usize = 4096;

/// A console that produces UTF-16 text
pub trait ConsoleRead {
    /// Reads up to `buf.len()` code units. Returns 0 at end of input.
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize>;
}

/// A console that accepts UTF-16 text
pub trait ConsoleWrite {
    /// Writes a prefix of `buf` and returns how many code units were taken.
    fn write_utf16(&mut self, buf: &[u16]) -> io::Result<usize>;

    /// Flushes anything the console buffers internally.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: ConsoleRead + ?Sized> ConsoleRead for &mut C {
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize> {
        (**self).read_utf16(buf)
    }
}

impl<C: ConsoleRead + ?Sized> ConsoleRead for Box<C> {
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize> {
        (**self).read_utf16(buf)
    }
}

impl<C: ConsoleWrite + ?Sized> ConsoleWrite for &mut C {
    fn write_utf16(&mut self, buf: &[u16]) -> io::Result<usize> {
        (**self).write_utf16(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<C: ConsoleWrite + ?Sized> ConsoleWrite for Box<C> {
    fn write_utf16(&mut self, buf: &[u16]) -> io::Result<usize> {
        (**self).write_utf16(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// A UTF-8 terminal seen as a UTF-16 console.
///
/// Incomplete UTF-8 sequences are carried between reads. Malformed input is
/// replaced with U+FFFD rather than failing the read.
pub struct Terminal<T> {
    inner: T,
    codec: CodeConvert,
    residue: Vec<u8>,
    decoded: Vec<u16>,
    decoded_pos: usize,
    encoded: Vec<u8>,
    eof: bool,
}

impl<T> Terminal<T> {
    /// Wraps a byte stream carrying UTF-8.
    pub fn new(inner: T) -> crate::Result<Self> {
        Ok(Self {
            inner,
            codec: CodeConvert::new(CODE_PAGE_UTF8)?,
            residue: Vec::new(),
            decoded: Vec::new(),
            decoded_pos: 0,
            encoded: Vec::new(),
            eof: false,
        })
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Terminal<T> {
    fn fill(&mut self) -> io::Result<()> {
        let start = self.residue.len();
        self.residue.resize(start + READ_SIZE, 0);
        let read = loop {
            match self.inner.read(&mut self.residue[start..]) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.residue.truncate(start);
                    return Err(err);
                }
            }
        };
        self.residue.truncate(start + read);

        self.decoded.clear();
        self.decoded_pos = 0;
        let flags = if read == 0 {
            self.eof = true;
            ConvertFlags::END_OF_INPUT
        } else {
            ConvertFlags::empty()
        };
        let mut in_pos = 0;
        let mut out_pos = 0;
        self.codec
            .encoded_to_utf16(
                &self.residue,
                &mut in_pos,
                &mut self.decoded,
                &mut out_pos,
                flags,
            )
            .map_err(io::Error::other)?;
        self.residue.drain(..in_pos);
        self.decoded.truncate(out_pos);
        Ok(())
    }
}

impl<T: Read> ConsoleRead for Terminal<T> {
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.decoded_pos == self.decoded.len() {
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }

        let available = &self.decoded[self.decoded_pos..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.decoded_pos += count;
        Ok(count)
    }
}

impl<T: Write> ConsoleWrite for Terminal<T> {
    fn write_utf16(&mut self, buf: &[u16]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut in_pos = 0;
        let mut out_pos = 0;
        self.codec
            .utf16_to_encoded(
                buf,
                &mut in_pos,
                &mut self.encoded,
                &mut out_pos,
                ConvertFlags::empty(),
                None,
            )
            .map_err(io::Error::other)?;

        if in_pos == 0 {
            // A lone high surrogate with nothing after it.
            let mut utf8 = [0; 3];
            char::REPLACEMENT_CHARACTER.encode_utf8(&mut utf8);
            self.inner.write_all(&utf8)?;
            return Ok(1);
        }

        self.inner.write_all(&self.encoded[..out_pos])?;
        Ok(in_pos)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::to_utf16;

    /// Hands out its data a few bytes at a time.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let count = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
            self.pos += count;
            Ok(count)
        }
    }

    fn read_all(console: &mut impl ConsoleRead) -> Vec<u16> {
        let mut all = Vec::new();
        let mut buf = [0u16; 3];
        loop {
            let count = console.read_utf16(&mut buf).unwrap();
            if count == 0 {
                return all;
            }
            all.extend_from_slice(&buf[..count]);
        }
    }

    #[test]
    fn test_terminal_reads_split_sequences() {
        let text = "héllo \u{1F600} wörld";
        let mut terminal = Terminal::new(Trickle {
            data: text.as_bytes().to_vec(),
            pos: 0,
            step: 1,
        })
        .unwrap();
        assert_eq!(read_all(&mut terminal), to_utf16(text));
    }

    #[test]
    fn test_terminal_truncated_input_ends_with_replacement() {
        let mut terminal = Terminal::new(Trickle {
            data: vec![b'a', 0xE2, 0x82],
            pos: 0,
            step: 8,
        })
        .unwrap();
        assert_eq!(read_all(&mut terminal), [0x61, 0xFFFD]);
    }

    #[test]
    fn test_terminal_writes_utf8() {
        let mut terminal = Terminal::new(Vec::new()).unwrap();
        let units = to_utf16("añ\u{1F600}");
        let written = terminal.write_utf16(&units).unwrap();
        assert_eq!(written, units.len());
        assert_eq!(terminal.into_inner(), "añ\u{1F600}".as_bytes());
    }

    #[test]
    fn test_terminal_write_holds_back_high_surrogate() {
        let mut terminal = Terminal::new(Vec::new()).unwrap();
        assert_eq!(terminal.write_utf16(&[0x41, 0xD83D]).unwrap(), 1);
        assert_eq!(terminal.write_utf16(&[0xD83D, 0xDE00]).unwrap(), 2);
        assert_eq!(terminal.into_inner(), "A\u{1F600}".as_bytes());
    }
}
