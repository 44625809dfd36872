//! Wires the WinRM-provider ingress path end to end: SOAP chunk
//! reassembly, WS-Man dispatch, PSRP message parsing, and presentation.
//! Mirrors `remotepspy.__main__.run_winrm_etw`.

use std::sync::mpsc::Receiver;

use psrp_trace_psrp::PsrpMessage;
use psrp_trace_soap::SoapDefragmenter;
use psrp_trace_tracer::CommandTracer;
use psrp_trace_winrm::WsManDispatcher;
use psrp_trace_xpress::MissingDecompressor;
use tracing::{error, warn};

use crate::process_filter::ExcludedPids;
use crate::trace_session::RawTraceEvent;

/// Drains `events` until the channel closes (the trace session stopped),
/// printing every transcript line the command tracer produces.
pub fn run(events: &Receiver<RawTraceEvent>, excluded: &ExcludedPids) {
    let soap_defrag = SoapDefragmenter::new();
    let mut dispatcher = WsManDispatcher::new(MissingDecompressor);
    let mut tracer = CommandTracer::new();

    for event in events {
        let RawTraceEvent::WinRmSoapChunk(chunk) = event else {
            warn!("ignoring non-WinRM event on the WinRM capture path");
            continue;
        };
        if !excluded.should_include(chunk.pid) {
            continue;
        }

        let Some(document) = soap_defrag.new_event(chunk) else {
            continue;
        };

        for object in dispatcher.dispatch(&document.soap) {
            match PsrpMessage::parse(&object.data) {
                Ok(message) => crate::print_traced_lines(tracer.handle(&message)),
                Err(err) => error!(%err, "failed to parse a completed PSRP object"),
            }
        }
    }
}
