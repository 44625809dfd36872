//! Best-effort CLIXML primitive-value decoding: turning one `<Obj>`'s
//! immediate representation element into a human-readable string. Mirrors
//! the source's `SimpleCommandTracer.deseiralize_element` static method,
//! covering the primitive types enumerated in [MS-PSRP] 2.2.5.1 plus the
//! handful of composite wrappers the tracer bothers to render (`GUID`,
//! `SecureString`, `BA`). Anything else is tagged `[unsupported-*]` with
//! its raw markup attached rather than dropped, per §4.7.

use base64::Engine;
use psrp_trace_psrp::{deserialize_and_unescape, deserialize_string};
use roxmltree::Node;

use crate::xmlpath;

/// Decode one primitive CLIXML value element. Returns `None` for `Nil`
/// (nothing to print, matching the source's `output = None  # Just
/// ignore`).
pub fn primitive_value(elem: Node) -> Option<String> {
    let text = || elem.text().unwrap_or("");
    Some(match elem.tag_name().name() {
        "Nil" => return None,
        "S" | "SBK" | "Version" | "URI" => deserialize_string(text()),
        "XD" => deserialize_and_unescape(text()),
        "GUID" => format!("{{{}}}", text()),
        "SecureString" => format!("[SecureString]{}", text()),
        "D" | "Dd" | "Sg" | "I64" | "U64" | "I32" | "U32" | "I16" | "U16" | "DT" | "B" => text().to_string(),
        "C" => format!("[char_code]{}", text()),
        "BA" => match base64::engine::general_purpose::STANDARD.decode(text()) {
            Ok(bytes) => format_byte_array(&bytes),
            Err(_) => format!("[unsupported-BA-type]{}", xmlpath::outer_xml(elem)),
        },
        "SB" => format!("[signed_byte]{}", text()),
        "By" => format!("[unsigned_byte]{}", text()),
        other => format!("[unsupported-{other}-type]{}", xmlpath::outer_xml(elem)),
    })
}

/// Render bytes the way Python's `repr(bytes)` would: printable ASCII as
/// itself, everything else as a `\xHH` escape, wrapped in `b'...'`.
fn format_byte_array(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &byte in bytes {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(xml: &str) -> roxmltree::Document<'static> {
        roxmltree::Document::parse(Box::leak(xml.to_string().into_boxed_str())).unwrap()
    }

    #[test]
    fn nil_yields_none() {
        let d = elem("<Nil/>");
        assert_eq!(primitive_value(d.root_element()), None);
    }

    #[test]
    fn string_is_clixml_decoded() {
        let d = elem("<S>a_x0009_b</S>");
        assert_eq!(primitive_value(d.root_element()), Some("a\tb".to_string()));
    }

    #[test]
    fn guid_is_bracketed() {
        let d = elem("<GUID>abc-123</GUID>");
        assert_eq!(primitive_value(d.root_element()), Some("{abc-123}".to_string()));
    }

    #[test]
    fn integer_types_pass_through_raw_text() {
        let d = elem("<I32>42</I32>");
        assert_eq!(primitive_value(d.root_element()), Some("42".to_string()));
    }

    #[test]
    fn byte_array_decodes_base64_and_formats_like_python_bytes() {
        let d = elem("<BA>QUI=</BA>"); // base64("AB")
        assert_eq!(primitive_value(d.root_element()), Some("b'AB'".to_string()));
    }

    #[test]
    fn unsupported_tag_echoes_raw_markup() {
        let d = elem(r#"<Weird N="x">v</Weird>"#);
        let out = primitive_value(d.root_element()).unwrap();
        assert!(out.starts_with("[unsupported-Weird-type]"));
        assert!(out.contains(r#"<Weird N="x">v</Weird>"#));
    }
}
