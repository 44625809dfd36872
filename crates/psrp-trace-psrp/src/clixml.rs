//! CLIXML string decoding: `_xHHHH_` escape sequences (with UTF-16
//! surrogate-pair reconstruction) plus, optionally, XML/HTML entity
//! unescaping for text already extracted from an element.

use regex::Regex;
use std::sync::OnceLock;

fn escape_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_x[0-9A-Fa-f]{4}_").expect("static regex is valid"))
}

/// Decode `_xHHHH_` escapes in a CLIXML string body, reconstructing UTF-16
/// surrogate pairs (`_xD800_`..`_xDFFF_`) into a single scalar value. An
/// escape that doesn't parse as hex, or a lone/mismatched surrogate half, is
/// emitted back out verbatim rather than dropped — CLIXML readers must not
/// lose data on a malformed escape.
pub fn deserialize_string(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let pattern = escape_pattern();
    if !pattern.is_match(input) {
        return input.to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut high_surrogate: Option<u16> = None;
    let mut pos = 0;

    for m in pattern.find_iter(input) {
        if m.start() > pos {
            result.push_str(&input[pos..m.start()]);
            high_surrogate = None;
        }

        let escaped = m.as_str();
        let hex_str = &escaped[2..6];
        match u16::from_str_radix(hex_str, 16) {
            Ok(code_unit) => {
                if let Some(high) = high_surrogate {
                    if (0xDC00..=0xDFFF).contains(&code_unit) {
                        let code_point = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(code_unit) - 0xDC00);
                        match char::from_u32(code_point) {
                            Some(ch) => result.push(ch),
                            None => result.push_str(escaped),
                        }
                        high_surrogate = None;
                    } else {
                        push_raw_escape(&mut result, high);
                        if (0xD800..=0xDBFF).contains(&code_unit) {
                            high_surrogate = Some(code_unit);
                        } else {
                            push_scalar(&mut result, code_unit, escaped);
                            high_surrogate = None;
                        }
                    }
                } else if (0xD800..=0xDBFF).contains(&code_unit) {
                    high_surrogate = Some(code_unit);
                } else {
                    push_scalar(&mut result, code_unit, escaped);
                    high_surrogate = None;
                }
            }
            Err(_) => {
                result.push_str(escaped);
                high_surrogate = None;
            }
        }

        pos = m.end();
    }

    if pos < input.len() {
        result.push_str(&input[pos..]);
    }

    if let Some(high) = high_surrogate {
        push_raw_escape(&mut result, high);
    }

    result
}

fn push_scalar(result: &mut String, code_unit: u16, escaped: &str) {
    match char::from_u32(u32::from(code_unit)) {
        Some(ch) => result.push(ch),
        None => result.push_str(escaped),
    }
}

fn push_raw_escape(result: &mut String, code_unit: u16) {
    result.push_str(&format!("_x{code_unit:04X}_"));
}

/// Decode a CLIXML string body: `_xHHHH_` escapes first, then standard
/// XML/HTML entities (`&amp;`, `&lt;`, ...).
pub fn deserialize_and_unescape(input: &str) -> String {
    html_escape::decode_html_entities(&deserialize_string(input)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_plain_text() {
        assert_eq!(deserialize_string("hello world"), "hello world");
    }

    #[test]
    fn decodes_single_escape() {
        assert_eq!(deserialize_string("_x000A_"), "\n");
    }

    #[test]
    fn decodes_surrogate_pair() {
        // U+1F600 GRINNING FACE = D83D DE00
        assert_eq!(deserialize_string("_xD83D__xDE00_"), "\u{1F600}");
    }

    #[test]
    fn unmatched_high_surrogate_is_emitted_raw() {
        assert_eq!(deserialize_string("_xD83D_x"), "_xD83D_x");
    }

    #[test]
    fn invalid_hex_escape_is_left_alone() {
        assert_eq!(deserialize_string("_xZZZZ_"), "_xZZZZ_");
    }

    #[test]
    fn mixed_text_and_escapes() {
        assert_eq!(deserialize_string("a_x0009_b"), "a\tb");
    }

    #[test]
    fn unescape_handles_entities_after_clixml_decode() {
        assert_eq!(deserialize_and_unescape("a &amp; b_x0009_c"), "a & b\tc");
    }
}
