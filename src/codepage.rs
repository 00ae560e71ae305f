//! Code-page identifiers, classification, and encoding-name parsing.
//!
//! Code pages are plain Windows code-page numbers. The five Unicode pages are
//! classified locally; every other id is looked up in the host code-page
//! table and sorted into single-byte, double-byte, or complex.

use std::fmt;

use serde::Serialize;

use crate::host;

/// Auto value: the process's default ("ANSI") code page.
pub const CODE_PAGE_ACP: u32 = 0;
/// Auto value: the process's default OEM code page.
pub const CODE_PAGE_OEMCP: u32 = 1;
/// UTF-8
pub const CODE_PAGE_UTF8: u32 = 65001;
/// UTF-16, little endian
pub const CODE_PAGE_UTF16LE: u32 = 1200;
/// UTF-16, big endian
pub const CODE_PAGE_UTF16BE: u32 = 1201;
/// UTF-32, little endian
pub const CODE_PAGE_UTF32LE: u32 = 12000;
/// UTF-32, big endian
pub const CODE_PAGE_UTF32BE: u32 = 12001;

/// Streaming-relevant classification of a code page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodePageCategory {
    /// One byte per character
    SingleByte,
    /// Up to two bytes per character, with registered lead bytes
    DoubleByte,
    /// Known, but characters may span more bytes or depend on state
    Complex,
    /// UTF-8, UTF-16LE/BE, or UTF-32LE/BE
    Unicode,
    /// The code page is not known
    Error,
}

impl CodePageCategory {
    /// Returns true if chunked conversion can always stop on a character
    /// boundary for this category.
    pub fn is_streamable(self) -> bool {
        matches!(
            self,
            CodePageCategory::SingleByte | CodePageCategory::DoubleByte | CodePageCategory::Unicode
        )
    }
}

impl fmt::Display for CodePageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodePageCategory::SingleByte => "single-byte",
            CodePageCategory::DoubleByte => "double-byte",
            CodePageCategory::Complex => "complex",
            CodePageCategory::Unicode => "unicode",
            CodePageCategory::Error => "error",
        };
        f.write_str(name)
    }
}

/// Metadata about one code page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodePageInfo {
    /// Resolved code page identifier
    pub code_page: u32,
    /// Identifier as originally requested (may be an auto value)
    pub unresolved_code_page: u32,
    /// Classification
    pub category: CodePageCategory,
    /// Display name, e.g. `"65001 (UTF-8)"`
    pub name: String,
    /// Maximum bytes per character (0 when unknown)
    pub max_char_size: u8,
}

impl CodePageInfo {
    /// Classifies `code_page`. Auto values are resolved first.
    pub fn new(code_page: u32) -> Self {
        let resolved = resolve(code_page);

        if let Some(name) = unicode_name(resolved) {
            return Self {
                code_page: resolved,
                unresolved_code_page: code_page,
                category: CodePageCategory::Unicode,
                name: format!("{resolved} ({name})"),
                max_char_size: 4,
            };
        }

        match host::lookup(resolved) {
            None => Self {
                code_page: resolved,
                unresolved_code_page: code_page,
                category: CodePageCategory::Error,
                name: format!("{resolved} (Unknown)"),
                max_char_size: 0,
            },
            Some(page) => {
                let category = if page.max_char_size == 1 {
                    CodePageCategory::SingleByte
                } else if page.max_char_size == 2 && !page.lead_bytes.is_empty() {
                    CodePageCategory::DoubleByte
                } else {
                    CodePageCategory::Complex
                };
                Self {
                    code_page: resolved,
                    unresolved_code_page: code_page,
                    category,
                    name: page.display_name(),
                    max_char_size: page.max_char_size,
                }
            }
        }
    }

    /// Returns true if the code page can be used for streaming conversion
    pub fn is_supported(&self) -> bool {
        self.category.is_streamable()
    }

    /// Every code page the host knows about, followed by the Unicode pages.
    pub fn all() -> Vec<CodePageInfo> {
        host::all()
            .map(|page| CodePageInfo::new(page.id))
            .chain(
                [
                    CODE_PAGE_UTF16LE,
                    CODE_PAGE_UTF16BE,
                    CODE_PAGE_UTF32LE,
                    CODE_PAGE_UTF32BE,
                    CODE_PAGE_UTF8,
                ]
                .into_iter()
                .map(CodePageInfo::new),
            )
            .collect()
    }
}

fn unicode_name(code_page: u32) -> Option<&'static str> {
    match code_page {
        CODE_PAGE_UTF8 => Some("UTF-8"),
        CODE_PAGE_UTF16LE => Some("UTF-16LE"),
        CODE_PAGE_UTF16BE => Some("UTF-16BE"),
        CODE_PAGE_UTF32LE => Some("UTF-32LE"),
        CODE_PAGE_UTF32BE => Some("UTF-32BE"),
        _ => None,
    }
}

/// Resolves the auto values (`CODE_PAGE_ACP`, `CODE_PAGE_OEMCP`) to a concrete
/// code page using the process locale. Other values are returned unchanged.
pub fn resolve(code_page: u32) -> u32 {
    match code_page {
        CODE_PAGE_ACP | CODE_PAGE_OEMCP => {
            let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
                .into_iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|value| !value.is_empty());
            let resolved = locale_code_page(locale.as_deref());
            log::debug!("resolved auto code page {code_page} to {resolved}");
            resolved
        }
        _ => code_page,
    }
}

/// Maps a locale string such as `"de_DE.ISO-8859-15@euro"` to a code page.
/// Unknown or absent charsets map to UTF-8.
pub fn locale_code_page(locale: Option<&str>) -> u32 {
    locale
        .and_then(|locale| locale.split_once('.'))
        .map(|(_, charset)| charset.split('@').next().unwrap_or(charset))
        .and_then(host::for_label)
        .unwrap_or(CODE_PAGE_UTF8)
}

/// A parsed encoding token such as `"utf16be"`, `"cp1252"`, or `"utf8bom"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePageArg {
    /// Code page identifier
    pub code_page: u32,
    /// True if the token ended with a `bom` suffix
    pub bom_suffix: bool,
    /// True if the token named a Unicode encoding
    pub is_unicode: bool,
}

const UTF_NAMES: [(&str, u32); 7] = [
    ("utf8", CODE_PAGE_UTF8),
    ("utf16", CODE_PAGE_UTF16LE),
    ("utf16le", CODE_PAGE_UTF16LE),
    ("utf16be", CODE_PAGE_UTF16BE),
    ("utf32", CODE_PAGE_UTF32LE),
    ("utf32le", CODE_PAGE_UTF32LE),
    ("utf32be", CODE_PAGE_UTF32BE),
];

enum BomSuffix {
    None,
    Bom,
    NoMatch,
}

fn bom_suffix(rest: &[u8]) -> BomSuffix {
    match rest {
        [] => BomSuffix::None,
        b"bom" => BomSuffix::Bom,
        _ => BomSuffix::NoMatch,
    }
}

impl CodePageArg {
    /// Parses `(NNNN|cpNNNN|utf8|utf16[le|be]|utf32[le|be])[bom]`.
    ///
    /// Matching ignores case and any character that is not an ASCII letter or
    /// digit, so `"UTF-16 BE"` and `"utf16be"` are the same token. The
    /// returned code page is not validated; see [`CodePageInfo::new`].
    pub fn parse(token: &str) -> crate::Result<Self> {
        let folded: Vec<u8> = token
            .bytes()
            .filter(u8::is_ascii_alphanumeric)
            .map(|b| b.to_ascii_lowercase())
            .collect();

        for (name, code_page) in UTF_NAMES {
            if let Some(rest) = folded.strip_prefix(name.as_bytes()) {
                match bom_suffix(rest) {
                    BomSuffix::NoMatch => continue,
                    suffix => {
                        return Ok(Self {
                            code_page,
                            bom_suffix: matches!(suffix, BomSuffix::Bom),
                            is_unicode: true,
                        });
                    }
                }
            }
        }

        let number = folded.strip_prefix(b"cp").unwrap_or(&folded[..]);
        let digits = number.iter().take_while(|b| b.is_ascii_digit()).count();
        let code_page = std::str::from_utf8(&number[..digits])
            .ok()
            .and_then(|digits| digits.parse::<u32>().ok())
            .ok_or_else(|| crate::Error::Parse(token.to_string()))?;

        let bom_suffix = match bom_suffix(&number[digits..]) {
            BomSuffix::NoMatch => return Err(crate::Error::Parse(token.to_string())),
            suffix => matches!(suffix, BomSuffix::Bom),
        };

        Ok(Self {
            code_page,
            bom_suffix,
            is_unicode: unicode_name(code_page).is_some(),
        })
    }

    /// Parses the token and rejects code pages that cannot be streamed.
    ///
    /// A malformed token is [`crate::Error::Parse`]; a well-formed token naming
    /// an unknown or complex code page is [`crate::Error::Unsupported`].
    pub fn parse_supported(token: &str) -> crate::Result<(Self, CodePageInfo)> {
        let arg = Self::parse(token)?;
        let info = CodePageInfo::new(arg.code_page);
        if !info.is_supported() {
            return Err(crate::Error::Unsupported {
                code_page: info.code_page,
                name: info.name,
                category: info.category,
            });
        }
        Ok((arg, info))
    }
}

impl std::str::FromStr for CodePageArg {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicode_classification() {
        for (code_page, name) in [
            (CODE_PAGE_UTF8, "65001 (UTF-8)"),
            (CODE_PAGE_UTF16LE, "1200 (UTF-16LE)"),
            (CODE_PAGE_UTF16BE, "1201 (UTF-16BE)"),
            (CODE_PAGE_UTF32LE, "12000 (UTF-32LE)"),
            (CODE_PAGE_UTF32BE, "12001 (UTF-32BE)"),
        ] {
            let info = CodePageInfo::new(code_page);
            assert_eq!(info.category, CodePageCategory::Unicode);
            assert_eq!(info.name, name);
            assert!(info.is_supported());
        }
    }

    #[test]
    fn test_host_classification() {
        assert_eq!(CodePageInfo::new(1252).category, CodePageCategory::SingleByte);
        assert_eq!(CodePageInfo::new(932).category, CodePageCategory::DoubleByte);
        assert_eq!(CodePageInfo::new(54936).category, CodePageCategory::Complex);
        assert_eq!(CodePageInfo::new(50220).category, CodePageCategory::Complex);

        let unknown = CodePageInfo::new(4242);
        assert_eq!(unknown.category, CodePageCategory::Error);
        assert_eq!(unknown.name, "4242 (Unknown)");
        assert!(!unknown.is_supported());
    }

    #[test]
    fn test_locale_code_page() {
        assert_eq!(locale_code_page(Some("en_US.UTF-8")), CODE_PAGE_UTF8);
        assert_eq!(locale_code_page(Some("ru_RU.KOI8-R")), 20866);
        assert_eq!(locale_code_page(Some("de_DE.ISO-8859-15@euro")), 28605);
        assert_eq!(locale_code_page(Some("C")), CODE_PAGE_UTF8);
        assert_eq!(locale_code_page(None), CODE_PAGE_UTF8);
    }

    #[test]
    fn test_parse_utf_names() {
        let arg = CodePageArg::parse("UTF-16").unwrap();
        assert_eq!(arg.code_page, CODE_PAGE_UTF16LE);
        assert!(!arg.bom_suffix);
        assert!(arg.is_unicode);

        let arg = CodePageArg::parse("utf16be-BOM").unwrap();
        assert_eq!(arg.code_page, CODE_PAGE_UTF16BE);
        assert!(arg.bom_suffix);

        assert_eq!(CodePageArg::parse("utf32").unwrap().code_page, CODE_PAGE_UTF32LE);
        assert_eq!(CodePageArg::parse("Utf_8").unwrap().code_page, CODE_PAGE_UTF8);
    }

    #[test]
    fn test_parse_numbers() {
        let arg = CodePageArg::parse("cp1252").unwrap();
        assert_eq!(arg.code_page, 1252);
        assert!(!arg.bom_suffix);
        assert!(!arg.is_unicode);

        let arg = CodePageArg::parse("1252bom").unwrap();
        assert_eq!(arg.code_page, 1252);
        assert!(arg.bom_suffix);

        let arg = CodePageArg::parse("65001").unwrap();
        assert!(arg.is_unicode);
    }

    #[test]
    fn test_parse_errors() {
        for token in ["", "utf7", "cp", "1252x", "cp1252bomb", "latin1"] {
            let err = CodePageArg::parse(token).unwrap_err();
            assert!(matches!(err, crate::Error::Parse(_)), "{token}");
        }
    }

    #[test]
    fn test_parse_supported_distinguishes_failures() {
        assert!(matches!(
            CodePageArg::parse_supported("cp54936"),
            Err(crate::Error::Unsupported { .. })
        ));
        assert!(matches!(
            CodePageArg::parse_supported("4242"),
            Err(crate::Error::Unsupported {
                category: CodePageCategory::Error,
                ..
            })
        ));
        assert!(matches!(
            CodePageArg::parse_supported("nope"),
            Err(crate::Error::Parse(_))
        ));
        let (arg, info) = CodePageArg::parse_supported("utf8bom").unwrap();
        assert!(arg.bom_suffix);
        assert_eq!(info.category, CodePageCategory::Unicode);
    }
}
