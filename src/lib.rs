//! # textconv - Streaming Text Conversion
//!
//! Converts text between byte-oriented encodings (Windows single-byte and
//! double-byte code pages, UTF-8, UTF-16LE/BE, UTF-32LE/BE) and in-memory
//! UTF-16, in bounded chunks that never split a character.
//!
//! ## Features
//!
//! - **Chunk-boundary safe** conversion: incomplete sequences stay in the caller's buffer
//! - **BOM sniffing** on input and **BOM insertion** on output
//! - **Line-ending normalization**: CR/CRLF folding on read, LF to CRLF expansion on write
//! - **Code-page classification** to reject encodings that cannot be streamed safely
//!
//! ## Quick Start
//!
//! ```rust
//! use textconv::{CodeConvert, CODE_PAGE_UTF8};
//!
//! let codec = CodeConvert::new(CODE_PAGE_UTF8).unwrap();
//!
//! // The last byte starts a 3-byte sequence, so it is left for the next call.
//! let input = [b'H', b'i', 0xE2];
//! let mut in_pos = 0;
//! let mut utf16 = Vec::new();
//! let mut out_pos = 0;
//! codec
//!     .encoded_to_utf16(&input, &mut in_pos, &mut utf16, &mut out_pos, Default::default())
//!     .unwrap();
//!
//! assert_eq!(in_pos, 2);
//! assert_eq!(&utf16[..out_pos], &[b'H' as u16, b'i' as u16]);
//! ```

#![deny(missing_docs)]

use thiserror::Error;

pub mod bom;
pub mod codepage;
pub mod console;
pub mod convert;
mod host;
pub mod input;
pub mod output;

pub use bom::{ByteOrderMark, ByteOrderMatch};
pub use codepage::{
    CODE_PAGE_ACP, CODE_PAGE_OEMCP, CODE_PAGE_UTF8, CODE_PAGE_UTF16BE, CODE_PAGE_UTF16LE,
    CODE_PAGE_UTF32BE, CODE_PAGE_UTF32LE, CodePageArg, CodePageCategory, CodePageInfo,
};
pub use console::{ConsoleRead, ConsoleWrite, Terminal};
pub use convert::{CodeConvert, ConvertFlags, Status};
pub use input::{TextInput, TextInputFlags, TextInputMode};
pub use output::{TextOutput, TextOutputFlags, TextOutputMode};

/// Result type for conversion and stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing encodings or converting text
#[derive(Debug, Error)]
pub enum Error {
    /// An encoding token could not be parsed
    #[error("unrecognized encoding '{0}'")]
    Parse(String),

    /// The code page is known to be unusable for streaming conversion
    #[error(
        "code page {name} is not supported: this library supports single-byte and \
         double-byte code pages, UTF-8 (65001), UTF-16LE (1200), UTF-16BE (1201), \
         UTF-32LE (12000), and UTF-32BE (12001)"
    )]
    Unsupported {
        /// Code page identifier
        code_page: u32,
        /// Display name of the code page
        name: String,
        /// Category that caused the rejection
        category: CodePageCategory,
    },

    /// Input contained a sequence that is not valid for the encoding
    #[error("input is not valid for encoding {code_page} (near position {position})")]
    InvalidSequence {
        /// Code page of the invalid data
        code_page: u32,
        /// Position (bytes or UTF-16 units) of the offending sequence
        position: usize,
    },

    /// A precondition of a conversion call was violated
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The underlying converter failed
    #[error("conversion error for code page {code_page}: {detail}")]
    Conversion {
        /// Code page being converted
        code_page: u32,
        /// Description of the failure
        detail: String,
    },

    /// Reading from a source or writing to a sink failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors caused by malformed input data
    pub fn is_invalid_sequence(&self) -> bool {
        matches!(self, Error::InvalidSequence { .. })
    }
}

/// Converts a string to UTF-16 code units.
pub fn to_utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::Parse("utf7".to_string());
        assert_eq!(err.to_string(), "unrecognized encoding 'utf7'");

        let err = Error::InvalidSequence {
            code_page: CODE_PAGE_UTF8,
            position: 3,
        };
        assert!(err.is_invalid_sequence());
        assert!(err.to_string().contains("65001"));
    }

    #[test]
    fn test_unsupported_message_names_code_page() {
        let info = CodePageInfo::new(54936);
        let err = Error::Unsupported {
            code_page: info.code_page,
            name: info.name.clone(),
            category: info.category,
        };
        assert!(err.to_string().contains("54936"));
        assert!(!err.is_invalid_sequence());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
