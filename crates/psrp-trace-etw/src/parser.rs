//! The PowerShell-provider ingress path (§4.6): classifies incoming
//! provider events by keyword/level, resolves PSRP fragments to their
//! owning shell via an activity-id-keyed context index, and feeds complete
//! fragments straight into a [`Defragmenter`] it owns — mirroring how
//! [`psrp_trace_winrm::WsManDispatcher`] owns its own `Defragmenter` for
//! the WinRM path, so both ingress paths hand the same [`CompletedPsrpObject`]
//! shape downstream to the PSRP message parser / command tracer.
//!
//! Per §5, all state mutations happen under one exclusive lock spanning
//! classification, context-table updates, and delivery to the defragmenter.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use psrp_trace_psrp::{CompletedPsrpObject, Defragmenter, Fragment};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::event::{
    decode_fragment_payload_hex, EventHeader, PowerShellTraceEvent, PsrpFragmentEventPayload, ShellContextEventPayload,
    KEYWORD_PSRP_FRAGMENT, KEYWORD_SHELL_CONTEXT, LEVEL_PSRP_FRAGMENT,
};

#[derive(Debug, thiserror::Error)]
pub enum EtwParseError {
    #[error("ShellId in shell-context event param1 is not a valid UUID: {0}")]
    InvalidShellId(String),
}

struct ParserState {
    /// Shells currently tracked by this ingress path, mirroring the
    /// source's `self.shells` list (kept as a set here; order never
    /// mattered to the source either).
    shells: HashSet<Uuid>,
    /// `ActivityId -> ShellId`, the `ShellContextIndex` of §3's data model.
    activity_shell_contexts: HashMap<i64, Uuid>,
    defrag: Defragmenter,
}

/// Parses `Microsoft-Windows-PowerShell` provider events, the alternate
/// ingress path to the same [`Defragmenter`] the WinRM path feeds.
pub struct PowerShellEtwParser {
    state: Mutex<ParserState>,
}

impl Default for PowerShellEtwParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerShellEtwParser {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ParserState {
                shells: HashSet::new(),
                activity_shell_contexts: HashMap::new(),
                defrag: Defragmenter::new(),
            }),
        }
    }

    /// Classify and handle one provider event. Fragment events that
    /// complete an object are returned; shell-context events never produce
    /// one directly.
    pub fn new_event(&self, header: EventHeader, event: PowerShellTraceEvent) -> Vec<CompletedPsrpObject> {
        let mut state = self.state.lock().unwrap();
        match event {
            PowerShellTraceEvent::PsrpFragment(payload) => {
                if header.descriptor.keyword == KEYWORD_PSRP_FRAGMENT && header.descriptor.level == LEVEL_PSRP_FRAGMENT {
                    Self::handle_fragment(&mut state, header, &payload).into_iter().collect()
                } else {
                    debug!(
                        keyword = header.descriptor.keyword,
                        level = header.descriptor.level,
                        "skipping non-level-5 event under the PSRP fragment keyword"
                    );
                    Vec::new()
                }
            }
            PowerShellTraceEvent::ShellContext(payload) => {
                if header.descriptor.keyword == KEYWORD_SHELL_CONTEXT {
                    Self::handle_shell_context(&mut state, header, &payload);
                }
                Vec::new()
            }
        }
    }

    fn handle_fragment(state: &mut ParserState, header: EventHeader, payload: &PsrpFragmentEventPayload) -> Option<CompletedPsrpObject> {
        let Some(activity_id) = header.activity_id else {
            error!("unable to identify Shell context for PSRP fragment: event has no ActivityId");
            return None;
        };
        let Some(&shell_id) = state.activity_shell_contexts.get(&activity_id) else {
            error!(activity_id, "unable to identify Shell context for PSRP fragment");
            return None;
        };

        let Some(data) = decode_fragment_payload_hex(&payload.fragment_payload_hex) else {
            error!(activity_id, %shell_id, "PSRP fragment payload is not valid hex; dropping fragment");
            return None;
        };
        if data.len() as u32 != payload.fragment_length {
            warn!(
                %shell_id,
                declared = payload.fragment_length,
                actual = data.len(),
                "PSRP fragment payload length does not match declared FragmentLength"
            );
        }

        let fragment = Fragment::new(payload.object_id, payload.fragment_id, payload.s_flag, payload.e_flag, data);
        // No CommandId is threaded through this path: the source notes it
        // would be possible to recover one from request correlation, but
        // the tracer never needs it, so it's simply not tracked here.
        state.defrag.new_fragment(shell_id, &fragment, None)
    }

    fn handle_shell_context(state: &mut ParserState, header: EventHeader, payload: &ShellContextEventPayload) {
        let Some(activity_id) = header.activity_id else {
            return;
        };

        if payload.description.contains("Request %1. Creating a server remote session.") {
            let Some(shell_id) = Self::parse_shell_id(payload) else { return };
            debug!(%shell_id, activity_id, "tracking new shell");
            if state.shells.insert(shell_id) {
                state.defrag.new_shell(shell_id);
            }
            state.activity_shell_contexts.insert(activity_id, shell_id);
        } else if payload.description.contains("Shell Context %1. Request Id %2") {
            let Some(shell_id) = Self::parse_shell_id(payload) else { return };
            if state.shells.insert(shell_id) {
                debug!(%shell_id, "tracking new shell for which the shell creation event was missed");
                state.defrag.new_shell(shell_id);
            }
            state.activity_shell_contexts.entry(activity_id).or_insert_with(|| {
                debug!(%shell_id, activity_id, "tracking shell context");
                shell_id
            });
        } else if payload.description.contains("Reporting operation complete for request: %1") {
            let Some(request_id) = Self::parse_shell_id(payload) else { return };
            if state.shells.remove(&request_id) {
                debug!(shell_id = %request_id, "shell closed, removing tracking data");
                state.activity_shell_contexts.retain(|_, v| *v != request_id);
                state.defrag.delete_shell(request_id);
            }
        }
    }

    fn parse_shell_id(payload: &ShellContextEventPayload) -> Option<Uuid> {
        let raw = payload.param1.as_deref()?;
        match Self::try_parse_shell_id(raw) {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(%err, "ignoring shell-context event");
                None
            }
        }
    }

    fn try_parse_shell_id(raw: &str) -> Result<Uuid, EtwParseError> {
        let trimmed = raw.trim_start_matches('{').trim_end_matches('}');
        Uuid::parse_str(trimmed).map_err(|_| EtwParseError::InvalidShellId(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventDescriptor;
    use tracing_test::traced_test;

    fn header(activity_id: Option<i64>, keyword: u64, level: u8) -> EventHeader {
        EventHeader {
            activity_id,
            process_id: 100,
            thread_id: 200,
            descriptor: EventDescriptor { keyword, level },
        }
    }

    fn shell_context(description: &str, shell_id: Uuid) -> PowerShellTraceEvent {
        PowerShellTraceEvent::ShellContext(ShellContextEventPayload {
            description: description.to_string(),
            param1: Some(shell_id.to_string()),
        })
    }

    #[test]
    fn fragment_event_resolves_shell_via_context_and_completes() {
        let parser = PowerShellEtwParser::new();
        let shell_id = Uuid::new_v4();

        parser.new_event(
            header(Some(1), KEYWORD_SHELL_CONTEXT, 0),
            shell_context("Request %1. Creating a server remote session.", shell_id),
        );

        let fragment = PowerShellTraceEvent::PsrpFragment(PsrpFragmentEventPayload {
            object_id: 1,
            fragment_id: 0,
            s_flag: true,
            e_flag: true,
            fragment_length: 2,
            fragment_payload_hex: "0xabcd".to_string(),
        });
        let completed = parser.new_event(header(Some(1), KEYWORD_PSRP_FRAGMENT, LEVEL_PSRP_FRAGMENT), fragment);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data, vec![0xab, 0xcd]);
    }

    #[test]
    #[traced_test]
    fn fragment_event_with_unknown_activity_is_dropped() {
        let parser = PowerShellEtwParser::new();
        let fragment = PowerShellTraceEvent::PsrpFragment(PsrpFragmentEventPayload {
            object_id: 1,
            fragment_id: 0,
            s_flag: true,
            e_flag: true,
            fragment_length: 1,
            fragment_payload_hex: "0xab".to_string(),
        });
        let completed = parser.new_event(header(Some(99), KEYWORD_PSRP_FRAGMENT, LEVEL_PSRP_FRAGMENT), fragment);
        assert!(completed.is_empty());
    }

    #[test]
    fn non_level_5_fragment_keyword_event_is_skipped() {
        let parser = PowerShellEtwParser::new();
        let shell_id = Uuid::new_v4();
        parser.new_event(
            header(Some(1), KEYWORD_SHELL_CONTEXT, 0),
            shell_context("Request %1. Creating a server remote session.", shell_id),
        );
        let fragment = PowerShellTraceEvent::PsrpFragment(PsrpFragmentEventPayload {
            object_id: 1,
            fragment_id: 0,
            s_flag: true,
            e_flag: true,
            fragment_length: 1,
            fragment_payload_hex: "0xab".to_string(),
        });
        let completed = parser.new_event(header(Some(1), KEYWORD_PSRP_FRAGMENT, 4), fragment);
        assert!(completed.is_empty());
    }

    #[test]
    fn late_bound_shell_context_is_tracked() {
        let parser = PowerShellEtwParser::new();
        let shell_id = Uuid::new_v4();
        parser.new_event(
            header(Some(2), KEYWORD_SHELL_CONTEXT, 0),
            shell_context("Shell Context %1. Request Id %2", shell_id),
        );

        let fragment = PowerShellTraceEvent::PsrpFragment(PsrpFragmentEventPayload {
            object_id: 1,
            fragment_id: 0,
            s_flag: true,
            e_flag: true,
            fragment_length: 1,
            fragment_payload_hex: "0x42".to_string(),
        });
        let completed = parser.new_event(header(Some(2), KEYWORD_PSRP_FRAGMENT, LEVEL_PSRP_FRAGMENT), fragment);
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn operation_complete_removes_shell_tracking() {
        let parser = PowerShellEtwParser::new();
        let shell_id = Uuid::new_v4();
        parser.new_event(
            header(Some(1), KEYWORD_SHELL_CONTEXT, 0),
            shell_context("Request %1. Creating a server remote session.", shell_id),
        );
        parser.new_event(
            header(Some(1), KEYWORD_SHELL_CONTEXT, 0),
            shell_context("Reporting operation complete for request: %1", shell_id),
        );

        let fragment = PowerShellTraceEvent::PsrpFragment(PsrpFragmentEventPayload {
            object_id: 1,
            fragment_id: 0,
            s_flag: true,
            e_flag: true,
            fragment_length: 1,
            fragment_payload_hex: "0xab".to_string(),
        });
        let completed = parser.new_event(header(Some(1), KEYWORD_PSRP_FRAGMENT, LEVEL_PSRP_FRAGMENT), fragment);
        assert!(completed.is_empty(), "activity binding should have been purged");
    }

    #[test]
    fn non_matching_keyword_shell_context_event_is_ignored() {
        let parser = PowerShellEtwParser::new();
        let shell_id = Uuid::new_v4();
        // wrong keyword entirely; should not register anything
        parser.new_event(
            header(Some(1), 0xDEAD, 0),
            shell_context("Request %1. Creating a server remote session.", shell_id),
        );
        let fragment = PowerShellTraceEvent::PsrpFragment(PsrpFragmentEventPayload {
            object_id: 1,
            fragment_id: 0,
            s_flag: true,
            e_flag: true,
            fragment_length: 1,
            fragment_payload_hex: "0xab".to_string(),
        });
        let completed = parser.new_event(header(Some(1), KEYWORD_PSRP_FRAGMENT, LEVEL_PSRP_FRAGMENT), fragment);
        assert!(completed.is_empty());
    }
}
