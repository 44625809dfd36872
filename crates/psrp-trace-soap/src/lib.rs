//! SOAP chunk defragmentation (§4.1): reassembles a WS-Management SOAP
//! envelope from an ordered run of chunked trace events.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, error};

/// Fallback key used when a trace event carries no `ActivityId`.
pub const NO_ACTIVITY_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AssemblyKey {
    activity_id: i64,
    pid: u32,
    tid: u32,
}

/// One chunked-SOAP trace event, as delivered by the WinRM provider.
#[derive(Debug, Clone)]
pub struct SoapChunkEvent {
    pub activity_id: Option<i64>,
    pub pid: u32,
    pub tid: u32,
    pub total_chunks: u32,
    /// 1-indexed chunk number.
    pub index: u32,
    pub soap_document: String,
}

#[derive(Debug)]
struct SoapAssembly {
    total_chunks: u32,
    last_chunk: u32,
    soap: String,
}

/// A fully reassembled SOAP document, handed off to the dispatch layer for
/// parsing. Left unparsed here — only the activity/pid/tid triple and the
/// raw text are this crate's concern.
#[derive(Debug, Clone)]
pub struct CompletedSoapDocument {
    pub activity_id: i64,
    pub pid: u32,
    pub tid: u32,
    pub soap: String,
}

/// Reassembles chunked SOAP documents, keyed by `(ActivityId, Pid, Tid)`.
///
/// A single instance is meant to be shared across however many trace
/// threads feed it; [`Self::new_event`] takes `&self` and serializes intake
/// internally with a [`Mutex`], matching the "exclusive lock over
/// `partial_messages`" requirement rather than pushing that responsibility
/// onto callers.
#[derive(Debug, Default)]
pub struct SoapDefragmenter {
    partial_messages: Mutex<HashMap<AssemblyKey, SoapAssembly>>,
}

impl SoapDefragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk event. Returns the assembled document once its final
    /// chunk arrives, otherwise `None`.
    ///
    /// An out-of-order `index` is a hard defragmentation error: the
    /// in-progress assembly is logged and abandoned (dropped entirely),
    /// and downstream is never notified for it.
    pub fn new_event(&self, event: SoapChunkEvent) -> Option<CompletedSoapDocument> {
        let key = AssemblyKey {
            activity_id: event.activity_id.unwrap_or(NO_ACTIVITY_ID),
            pid: event.pid,
            tid: event.tid,
        };

        let mut partial_messages = self.partial_messages.lock().unwrap();

        let assembly = partial_messages.entry(key).or_insert_with(|| SoapAssembly {
            total_chunks: event.total_chunks,
            last_chunk: 0,
            soap: String::new(),
        });

        if event.index != assembly.last_chunk + 1 {
            error!(
                activity_id = key.activity_id,
                pid = key.pid,
                tid = key.tid,
                expected = assembly.last_chunk + 1,
                got = event.index,
                "SOAP chunk out of order; abandoning assembly"
            );
            partial_messages.remove(&key);
            return None;
        }

        assembly.soap.push_str(&event.soap_document);
        assembly.last_chunk += 1;

        debug!(
            activity_id = key.activity_id,
            pid = key.pid,
            tid = key.tid,
            chunk = assembly.last_chunk,
            total = assembly.total_chunks,
            "processed WS-Man SOAP chunk"
        );

        if assembly.last_chunk == assembly.total_chunks {
            let assembly = partial_messages.remove(&key).unwrap();
            Some(CompletedSoapDocument {
                activity_id: key.activity_id,
                pid: key.pid,
                tid: key.tid,
                soap: assembly.soap,
            })
        } else {
            None
        }
    }
}
