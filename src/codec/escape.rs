//! Escape sequences for delimiter characters inside data.
//!
//! | Sequence   | Meaning                        |
//! |------------|--------------------------------|
//! | `\F\`      | field separator                |
//! | `\S\`      | component separator            |
//! | `\T\`      | sub-component separator        |
//! | `\R\`      | repetition separator           |
//! | `\E\`      | escape character               |
//! | `\Xhh..\`  | bytes in hex (UTF-8)           |
//!
//! Formatting sequences (`\H\`, `\N\`, `\.br\`, `\.sp2\`, `\C2842\`, `\M...\`,
//! `\Z...\`) are kept verbatim in decoded values and written back unchanged.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::codec::Delimiters;
use crate::error::{Hl7Error, Result, WirePosition};

static FORMATTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(H|N|\.[a-z]{2}[+-]?[0-9]*|C[0-9A-Fa-f]{4}|M[0-9A-Fa-f]{4,6}|Z[^\s]*)$")
        .expect("formatting escape pattern is valid")
});

fn is_formatting(body: &str) -> bool {
    FORMATTING.is_match(body)
}

/// Replace delimiter characters in `text` with escape sequences.
///
/// CR, LF and the segment delimiter become hex escapes. Any other C0 control
/// character except TAB has no wire representation. `position` is only
/// evaluated when an error is returned.
pub fn escape<'a, F>(text: &'a str, d: &Delimiters, position: F) -> Result<Cow<'a, str>>
where
    F: Fn() -> WirePosition,
{
    if !text.chars().any(|c| needs_escape(c, d)) {
        return Ok(Cow::Borrowed(text));
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let width = c.len_utf8();
        if c == d.escape {
            // pass formatting sequences through untouched
            if let Some(end) = rest[width..].find(d.escape) {
                let body = &rest[width..width + end];
                if is_formatting(body) {
                    let len = width + end + d.escape.len_utf8();
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                    continue;
                }
            }
            push_escape(&mut out, d, "E");
        } else if c == d.field {
            push_escape(&mut out, d, "F");
        } else if c == d.component {
            push_escape(&mut out, d, "S");
        } else if c == d.subcomponent {
            push_escape(&mut out, d, "T");
        } else if c == d.repetition {
            push_escape(&mut out, d, "R");
        } else if c == d.segment || c == '\r' || c == '\n' {
            let mut buf = [0u8; 4];
            let hex: String = c
                .encode_utf8(&mut buf)
                .bytes()
                .map(|b| format!("{:02X}", b))
                .collect();
            push_escape(&mut out, d, &format!("X{}", hex));
        } else if is_unencodable(c) {
            return Err(Hl7Error::UnescapableCharacter {
                code: c as u32,
                position: position(),
            });
        } else {
            out.push(c);
        }
        rest = &rest[width..];
    }
    Ok(Cow::Owned(out))
}

/// Resolve escape sequences in a wire token.
pub fn unescape<'a, F>(text: &'a str, d: &Delimiters, position: F) -> Result<Cow<'a, str>>
where
    F: Fn() -> WirePosition,
{
    if !text.contains(d.escape) {
        return Ok(Cow::Borrowed(text));
    }

    let width = d.escape.len_utf8();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(d.escape) {
        out.push_str(&rest[..start]);
        let after = &rest[start + width..];
        let end = after
            .find(d.escape)
            .ok_or_else(|| malformed(position(), "unterminated escape sequence"))?;
        let body = &after[..end];
        match body {
            "" => return Err(malformed(position(), "empty escape sequence")),
            "F" => out.push(d.field),
            "S" => out.push(d.component),
            "T" => out.push(d.subcomponent),
            "R" => out.push(d.repetition),
            "E" => out.push(d.escape),
            _ if body.starts_with('X') => {
                let decoded = decode_hex(&body[1..]).ok_or_else(|| {
                    malformed(position(), &format!("invalid hex escape '{}'", body))
                })?;
                if let Some(c) = decoded.chars().find(|c| is_unencodable(*c)) {
                    let reason = format!(
                        "hex escape '{}' decodes to control character U+{:04X}",
                        body, c as u32
                    );
                    return Err(malformed(position(), &reason));
                }
                out.push_str(&decoded);
            }
            _ if is_formatting(body) => {
                out.push(d.escape);
                out.push_str(body);
                out.push(d.escape);
            }
            _ => {
                return Err(malformed(
                    position(),
                    &format!("unknown escape sequence '{}'", body),
                ))
            }
        }
        rest = &after[end + width..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

fn needs_escape(c: char, d: &Delimiters) -> bool {
    c == d.escape
        || c == d.field
        || c == d.component
        || c == d.subcomponent
        || c == d.repetition
        || c == d.segment
        || ((c as u32) < 0x20 && c != '\t')
}

/// C0 controls other than TAB, CR and LF.
fn is_unencodable(c: char) -> bool {
    (c as u32) < 0x20 && !matches!(c, '\t' | '\r' | '\n')
}

fn push_escape(out: &mut String, d: &Delimiters, body: &str) {
    out.push(d.escape);
    out.push_str(body);
    out.push(d.escape);
}

fn decode_hex(hex: &str) -> Option<String> {
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn malformed(position: WirePosition, reason: &str) -> Hl7Error {
    Hl7Error::MalformedWireText {
        position,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> WirePosition {
        WirePosition::segment(1, "NTE").with_field(3)
    }

    #[test]
    fn test_plain_text_is_borrowed() {
        let d = Delimiters::default();
        assert!(matches!(escape("plain text", &d, here).unwrap(), Cow::Borrowed(_)));
        assert!(matches!(unescape("plain text", &d, here).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_escape_delimiters() {
        let d = Delimiters::default();
        assert_eq!(escape("a|b^c&d~e\\f", &d, here).unwrap(), "a\\F\\b\\S\\c\\T\\d\\R\\e\\E\\f");
        assert_eq!(escape("line1\rline2\n", &d, here).unwrap(), "line1\\X0D\\line2\\X0A\\");
    }

    #[test]
    fn test_unescape_delimiters() {
        let d = Delimiters::default();
        assert_eq!(unescape("a\\F\\b\\S\\c\\T\\d\\R\\e\\E\\f", &d, here).unwrap(), "a|b^c&d~e\\f");
        assert_eq!(unescape("\\X0D0A\\", &d, here).unwrap(), "\r\n");
        assert_eq!(unescape("caf\\XC3A9\\", &d, here).unwrap(), "café");
    }

    #[test]
    fn test_escape_uses_custom_delimiters() {
        let d = Delimiters {
            field: '#',
            escape: '/',
            ..Default::default()
        };
        assert_eq!(escape("a#b|c", &d, here).unwrap(), "a/F/b|c");
        assert_eq!(unescape("a/F/b", &d, here).unwrap(), "a#b");
    }

    #[test]
    fn test_formatting_sequences_preserved() {
        let d = Delimiters::default();
        let decoded = unescape("first\\.br\\second \\H\\bold\\N\\", &d, here).unwrap();
        assert_eq!(decoded, "first\\.br\\second \\H\\bold\\N\\");
        assert_eq!(escape(&decoded, &d, here).unwrap(), "first\\.br\\second \\H\\bold\\N\\");
    }

    #[test]
    fn test_lone_escape_char_is_escaped() {
        let d = Delimiters::default();
        assert_eq!(escape("C:\\temp", &d, here).unwrap(), "C:\\E\\temp");
    }

    #[test]
    fn test_unterminated_escape() {
        let d = Delimiters::default();
        let err = unescape("abc\\F", &d, here).unwrap_err();
        match err {
            Hl7Error::MalformedWireText { position, .. } => assert_eq!(position, here()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_escapes() {
        let d = Delimiters::default();
        assert!(matches!(unescape("\\\\", &d, here), Err(Hl7Error::MalformedWireText { .. })));
        assert!(matches!(unescape("\\XZZ\\", &d, here), Err(Hl7Error::MalformedWireText { .. })));
        assert!(matches!(unescape("\\Q\\", &d, here), Err(Hl7Error::MalformedWireText { .. })));
    }

    #[test]
    fn test_control_character_is_unescapable() {
        let d = Delimiters::default();
        let err = escape("bell\u{7}", &d, here).unwrap_err();
        assert!(matches!(err, Hl7Error::UnescapableCharacter { code: 7, .. }));
        assert_eq!(escape("tab\there", &d, here).unwrap(), "tab\there");
    }

    #[test]
    fn test_hex_escape_to_control_character_rejected() {
        let d = Delimiters::default();
        let err = unescape("bell\\X07\\", &d, here).unwrap_err();
        match err {
            Hl7Error::MalformedWireText { position, reason } => {
                assert_eq!(position, here());
                assert!(reason.contains("U+0007"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(unescape("\\X01\\", &d, here), Err(Hl7Error::MalformedWireText { .. })));
        // TAB, CR and LF survive a round trip
        let decoded = unescape("a\\X09\\b\\X0D0A\\", &d, here).unwrap();
        assert_eq!(decoded, "a\tb\r\n");
        assert_eq!(escape(&decoded, &d, here).unwrap(), "a\tb\\X0D\\\\X0A\\");
    }
}
