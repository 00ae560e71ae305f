//! Byte order mark table and prefix matching.

use crate::codepage::{
    CODE_PAGE_UTF8, CODE_PAGE_UTF16BE, CODE_PAGE_UTF16LE, CODE_PAGE_UTF32BE, CODE_PAGE_UTF32LE,
};

/// Result of comparing buffered input against a BOM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrderMatch {
    /// The data does not start with this BOM
    No,
    /// The data starts with this BOM
    Yes,
    /// The data is a proper prefix of this BOM; read more and try again
    NeedMoreData,
}

/// A byte order mark and the code page it implies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteOrderMark {
    /// Code page implied by the mark
    pub code_page: u32,
    /// Encoded bytes of U+FEFF
    pub bytes: &'static [u8],
}

impl ByteOrderMark {
    /// The standard marks in testing order. UTF-32LE must come before UTF-16LE
    /// because `FF FE` is a prefix of `FF FE 00 00`.
    pub const STANDARD: [ByteOrderMark; 5] = [
        ByteOrderMark {
            code_page: CODE_PAGE_UTF8,
            bytes: &[0xEF, 0xBB, 0xBF],
        },
        ByteOrderMark {
            code_page: CODE_PAGE_UTF32LE,
            bytes: &[0xFF, 0xFE, 0x00, 0x00],
        },
        ByteOrderMark {
            code_page: CODE_PAGE_UTF16LE,
            bytes: &[0xFF, 0xFE],
        },
        ByteOrderMark {
            code_page: CODE_PAGE_UTF32BE,
            bytes: &[0x00, 0x00, 0xFE, 0xFF],
        },
        ByteOrderMark {
            code_page: CODE_PAGE_UTF16BE,
            bytes: &[0xFE, 0xFF],
        },
    ];

    /// Length of the mark in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the mark has no bytes. None of the standard marks do.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Compares the start of `data` against this mark.
    pub fn matches(&self, data: &[u8]) -> ByteOrderMatch {
        let checked = self.bytes.len().min(data.len());
        if self.bytes[..checked] != data[..checked] {
            ByteOrderMatch::No
        } else if checked == self.bytes.len() {
            ByteOrderMatch::Yes
        } else {
            ByteOrderMatch::NeedMoreData
        }
    }

    /// Returns the first standard mark that `data` fully starts with.
    ///
    /// Treats the data as complete: a 2-byte input `FF FE` is UTF-16LE even
    /// though it is also a prefix of the UTF-32LE mark.
    pub fn detect(data: &[u8]) -> Option<&'static ByteOrderMark> {
        Self::STANDARD
            .iter()
            .find(|bom| bom.matches(data) == ByteOrderMatch::Yes)
    }

    /// Returns the standard mark for a Unicode code page.
    pub fn for_code_page(code_page: u32) -> Option<&'static ByteOrderMark> {
        Self::STANDARD.iter().find(|bom| bom.code_page == code_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf32le_before_utf16le() {
        let bom = ByteOrderMark::detect(&[0xFF, 0xFE, 0x00, 0x00, b'A', 0, 0, 0]).unwrap();
        assert_eq!(bom.code_page, CODE_PAGE_UTF32LE);
        assert_eq!(bom.len(), 4);

        let bom = ByteOrderMark::detect(&[0xFF, 0xFE, b'A', 0x00]).unwrap();
        assert_eq!(bom.code_page, CODE_PAGE_UTF16LE);
        assert_eq!(bom.len(), 2);
    }

    #[test]
    fn test_short_input_matches_shorter_mark() {
        let bom = ByteOrderMark::detect(&[0xFF, 0xFE]).unwrap();
        assert_eq!(bom.code_page, CODE_PAGE_UTF16LE);
    }

    #[test]
    fn test_match_states() {
        let utf32le = ByteOrderMark::for_code_page(CODE_PAGE_UTF32LE).unwrap();
        assert_eq!(utf32le.matches(&[0xFF]), ByteOrderMatch::NeedMoreData);
        assert_eq!(utf32le.matches(&[0xFF, 0xFE, 0x00]), ByteOrderMatch::NeedMoreData);
        assert_eq!(utf32le.matches(&[0xFF, 0xFE, 0x41]), ByteOrderMatch::No);
        assert_eq!(utf32le.matches(&[0xFF, 0xFE, 0x00, 0x00]), ByteOrderMatch::Yes);
        assert_eq!(utf32le.matches(&[]), ByteOrderMatch::NeedMoreData);
    }

    #[test]
    fn test_detect_other_marks() {
        assert_eq!(
            ByteOrderMark::detect(&[0xEF, 0xBB, 0xBF, b'x']).unwrap().code_page,
            CODE_PAGE_UTF8
        );
        assert_eq!(
            ByteOrderMark::detect(&[0x00, 0x00, 0xFE, 0xFF]).unwrap().code_page,
            CODE_PAGE_UTF32BE
        );
        assert_eq!(
            ByteOrderMark::detect(&[0xFE, 0xFF, 0x00, b'A']).unwrap().code_page,
            CODE_PAGE_UTF16BE
        );
        assert!(ByteOrderMark::detect(b"plain").is_none());
        assert!(ByteOrderMark::detect(&[0xEF, 0xBB]).is_none());
    }
}
