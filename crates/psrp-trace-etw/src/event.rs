//! Trace event data model: the shapes the OS tracing subscription hands us
//! once it has parsed a raw ETW record, per §6's `EventHeader`/
//! `EventDescriptor` plus the WinRM and PowerShell-provider payload fields
//! enumerated in §4.1 and §4.6. Producing these structures from a live
//! trace session is an external collaborator (§1); this crate only
//! consumes them.

/// `EventHeader.EventDescriptor`: the keyword/level pair used to classify
/// PowerShell-provider events (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDescriptor {
    pub keyword: u64,
    pub level: u8,
}

/// Common fields every trace event carries, independent of provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Correlation id assigned by the trace provider. `None` when the event
    /// carries no `ActivityId`, matching §4.1's "default to sentinel -1
    /// when absent" — the sentinel is applied at the [`SoapDefragmenter`]
    /// boundary, not here, so this type can stay `Option`-shaped.
    ///
    /// [`SoapDefragmenter`]: psrp_trace_soap::SoapDefragmenter
    pub activity_id: Option<i64>,
    pub process_id: u32,
    pub thread_id: u32,
    pub descriptor: EventDescriptor,
}

/// A chunked-SOAP-document event from the `Microsoft-Windows-WinRM`
/// provider (§4.1's input fields).
#[derive(Debug, Clone)]
pub struct WinRmSoapChunkEvent {
    pub header: EventHeader,
    pub total_chunks: u32,
    /// 1-indexed chunk number.
    pub index: u32,
    pub soap_document: String,
}

impl WinRmSoapChunkEvent {
    /// Adapt this event into the shape [`psrp_trace_soap::SoapDefragmenter`]
    /// consumes, dropping the fields it does not need (descriptor).
    pub fn into_soap_chunk_event(self) -> psrp_trace_soap::SoapChunkEvent {
        psrp_trace_soap::SoapChunkEvent {
            activity_id: self.header.activity_id,
            pid: self.header.process_id,
            tid: self.header.thread_id,
            total_chunks: self.total_chunks,
            index: self.index,
            soap_document: self.soap_document,
        }
    }
}

/// Keyword for `Microsoft-Windows-PowerShell` PSRP fragment events.
pub const KEYWORD_PSRP_FRAGMENT: u64 = 0x4000_0000_0000_0008;
/// Only this level under [`KEYWORD_PSRP_FRAGMENT`] carries fragment data;
/// other levels are emitted under the same keyword for unrelated purposes.
pub const LEVEL_PSRP_FRAGMENT: u8 = 5;
/// Keyword for `Microsoft-Windows-PowerShell` shell-context events.
pub const KEYWORD_SHELL_CONTEXT: u64 = 0x4000_0000_0000_0100;

/// A PSRP fragment event from the `Microsoft-Windows-PowerShell` provider
/// (§4.6). `fragment_payload_hex` is the raw `"0x...."`-prefixed hex string
/// as the provider emits it; [`crate::parser::PowerShellEtwParser`] decodes
/// it.
#[derive(Debug, Clone)]
pub struct PsrpFragmentEventPayload {
    pub object_id: i64,
    pub fragment_id: i64,
    pub s_flag: bool,
    pub e_flag: bool,
    pub fragment_length: u32,
    pub fragment_payload_hex: String,
}

/// A shell-context event from the `Microsoft-Windows-PowerShell` provider
/// (§4.6). `description` drives which of the three tracked patterns
/// applies; `param1`..`param4` are the provider's positional substitution
/// parameters (only `param1` is ever consulted by this pipeline).
#[derive(Debug, Clone)]
pub struct ShellContextEventPayload {
    pub description: String,
    pub param1: Option<String>,
}

/// The two PowerShell-provider event shapes this pipeline understands.
/// A real trace session typically hands events already split into a known
/// schema (per event id / manifest), so the caller is expected to already
/// know which variant an incoming record is; [`crate::parser::PowerShellEtwParser`]
/// still re-checks keyword/level before acting on it, per §4.6.
#[derive(Debug, Clone)]
pub enum PowerShellTraceEvent {
    PsrpFragment(PsrpFragmentEventPayload),
    ShellContext(ShellContextEventPayload),
}

/// Parse a `"0x...."`-prefixed hex string into bytes, matching the source's
/// `bytes.fromhex(frag_data[2:])`. Returns `None` on malformed hex (odd
/// length, non-hex digits) rather than panicking.
pub fn decode_fragment_payload_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_prefixed_hex() {
        assert_eq!(decode_fragment_payload_hex("0x0102ff"), Some(vec![0x01, 0x02, 0xff]));
    }

    #[test]
    fn decodes_hex_without_prefix() {
        assert_eq!(decode_fragment_payload_hex("0102"), Some(vec![0x01, 0x02]));
    }

    #[test]
    fn rejects_odd_length() {
        assert_eq!(decode_fragment_payload_hex("0x010"), None);
    }

    #[test]
    fn rejects_non_hex_digits() {
        assert_eq!(decode_fragment_payload_hex("0xzz"), None);
    }

    #[test]
    fn winrm_event_adapts_into_soap_chunk_event() {
        let event = WinRmSoapChunkEvent {
            header: EventHeader {
                activity_id: Some(7),
                process_id: 100,
                thread_id: 200,
                descriptor: EventDescriptor { keyword: 0, level: 0 },
            },
            total_chunks: 1,
            index: 1,
            soap_document: "<a/>".to_string(),
        };
        let chunk = event.into_soap_chunk_event();
        assert_eq!(chunk.activity_id, Some(7));
        assert_eq!(chunk.pid, 100);
        assert_eq!(chunk.soap_document, "<a/>");
    }
}
