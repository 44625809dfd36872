//! Trace event data model and the PowerShell-provider ingress path (§4.6):
//! the alternate route PSRP fragments take into the same defragmenter the
//! WinRM path feeds, plus the raw event shapes both ingress paths consume.

pub mod event;
mod parser;

pub use event::{
    decode_fragment_payload_hex, EventDescriptor, EventHeader, PowerShellTraceEvent, PsrpFragmentEventPayload,
    ShellContextEventPayload, WinRmSoapChunkEvent, KEYWORD_PSRP_FRAGMENT, KEYWORD_SHELL_CONTEXT, LEVEL_PSRP_FRAGMENT,
};
pub use parser::{EtwParseError, PowerShellEtwParser};
