//! Wires the PowerShell-provider ingress path end to end: ETW event
//! classification, PSRP defragmentation, message parsing, and
//! presentation. Mirrors `remotepspy.__main__.run_powershell_etw`.

use std::sync::mpsc::Receiver;

use psrp_trace_etw::PowerShellEtwParser;
use psrp_trace_psrp::PsrpMessage;
use psrp_trace_tracer::CommandTracer;
use tracing::{error, warn};

use crate::process_filter::ExcludedPids;
use crate::trace_session::RawTraceEvent;

pub fn run(events: &Receiver<RawTraceEvent>, excluded: &ExcludedPids) {
    let parser = PowerShellEtwParser::new();
    let mut tracer = CommandTracer::new();

    for event in events {
        let RawTraceEvent::PowerShellProvider(header, payload) = event else {
            warn!("ignoring non-PowerShell event on the PowerShell capture path");
            continue;
        };
        if !excluded.should_include(header.process_id) {
            continue;
        }

        for object in parser.new_event(header, payload) {
            match PsrpMessage::parse(&object.data) {
                Ok(message) => crate::print_traced_lines(tracer.handle(&message)),
                Err(err) => error!(%err, "failed to parse a completed PSRP object"),
            }
        }
    }
}
