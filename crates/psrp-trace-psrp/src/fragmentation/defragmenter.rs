use std::collections::HashMap;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::fragment::Fragment;
use crate::PsrpError;

/// Per-(identifier, object_id) accumulator, matching §3's `ObjectBuffer`.
#[derive(Debug, Default)]
struct ObjectBuffer {
    last_fragment_id: i64,
    buffer: Vec<u8>,
    command_id: Option<Uuid>,
}

impl ObjectBuffer {
    fn new() -> Self {
        Self {
            last_fragment_id: -1,
            buffer: Vec::new(),
            command_id: None,
        }
    }
}

/// A fully reassembled PSRP object, ready to hand to [`crate::message::PsrpMessage::parse`].
#[derive(Debug, Clone)]
pub struct CompletedPsrpObject {
    pub object_id: i64,
    pub data: Vec<u8>,
    pub command_id: Option<Uuid>,
}

type ObjectBuffers = HashMap<i64, ObjectBuffer>;

/// Reassembles PSRP messages from fragment streams, separately for each
/// `(identifier, object_id)` key, across two disjoint identifier spaces:
/// known shells (keyed by `ShellId`) and pending shells (keyed by the
/// `MessageId` of the `Create` request that is creating them).
///
/// Per §9's gap-recovery decision: a fragment whose `fragment_id` is not
/// `last_fragment_id + 1` is logged and dropped, and the buffer it would
/// have belonged to is left untouched — it is not abandoned outright, so a
/// later out-of-order retransmit of exactly the missing id would still
/// complete it. In practice trace ordering violations mean that object
/// simply never completes, matching the upstream Python implementation.
#[derive(Debug, Default)]
pub struct Defragmenter {
    shell_bufs: HashMap<Uuid, ObjectBuffers>,
    pending_shell_bufs: HashMap<String, ObjectBuffers>,
    pending_shell_completed: HashMap<String, Vec<CompletedPsrpObject>>,
}

impl Defragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_shell(&self, shell_id: Uuid) -> bool {
        self.shell_bufs.contains_key(&shell_id)
    }

    pub fn has_pending_shell(&self, message_id: &str) -> bool {
        self.pending_shell_bufs.contains_key(message_id)
    }

    pub fn new_shell(&mut self, shell_id: Uuid) {
        if self.shell_bufs.contains_key(&shell_id) {
            warn!(%shell_id, "request to create a new shell that already existed");
        } else {
            self.shell_bufs.insert(shell_id, HashMap::new());
        }
    }

    pub fn new_pending_shell(&mut self, message_id: impl Into<String>) {
        let message_id = message_id.into();
        if self.pending_shell_bufs.contains_key(&message_id) {
            warn!(message_id, "request to create a pending shell that already existed");
        } else {
            self.pending_shell_bufs.insert(message_id, HashMap::new());
        }
    }

    /// Consume a single pre-parsed fragment for a known shell (the
    /// PowerShell-provider ingress path, which always resolves to an
    /// already-known shell via `ShellContextIndex`).
    pub fn new_fragment(
        &mut self,
        shell_id: Uuid,
        fragment: &Fragment,
        command_id: Option<Uuid>,
    ) -> Option<CompletedPsrpObject> {
        let buffers = self.shell_buffers_mut(shell_id);
        append_fragment(
            buffers,
            fragment.object_id,
            fragment.fragment_id,
            fragment.end,
            &fragment.data,
            command_id,
            &shell_id,
        )
    }

    /// Consume raw fragment-stream bytes (one or more back-to-back
    /// fragments) for a known shell.
    pub fn new_fragment_data(
        &mut self,
        shell_id: Uuid,
        mut data: &[u8],
        command_id: Option<Uuid>,
    ) -> Result<Vec<CompletedPsrpObject>, PsrpError> {
        let buffers = self.shell_buffers_mut(shell_id);
        let mut completed = Vec::new();
        while !data.is_empty() {
            let (fragment, rest) = Fragment::unpack(data)?;
            data = rest;
            if let Some(object) = append_fragment(
                buffers,
                fragment.object_id,
                fragment.fragment_id,
                fragment.end,
                &fragment.data,
                command_id,
                &shell_id,
            ) {
                completed.push(object);
            }
        }
        Ok(completed)
    }

    /// As [`Defragmenter::new_fragment_data`], but for a pending shell
    /// tracked by the `MessageId` of its `Create` request. Any object that
    /// completes here is stashed, not delivered, until [`Self::promote_pending`]
    /// is called.
    pub fn new_fragment_data_pending_shell(
        &mut self,
        message_id: &str,
        mut data: &[u8],
        command_id: Option<Uuid>,
    ) -> Result<(), PsrpError> {
        if !self.pending_shell_bufs.contains_key(message_id) {
            warn!(message_id, "auto-registering pending shell seen via fragment data");
            self.pending_shell_bufs
                .insert(message_id.to_string(), HashMap::new());
        }
        let buffers = self.pending_shell_bufs.get_mut(message_id).unwrap();

        while !data.is_empty() {
            let (fragment, rest) = Fragment::unpack(data)?;
            data = rest;
            if let Some(object) = append_fragment(
                buffers,
                fragment.object_id,
                fragment.fragment_id,
                fragment.end,
                &fragment.data,
                command_id,
                &message_id,
            ) {
                self.pending_shell_completed
                    .entry(message_id.to_string())
                    .or_default()
                    .push(object);
            }
        }
        Ok(())
    }

    /// Migrate a pending shell's buffers and stashed completions to its real
    /// `ShellId`, once the `CreateResponse` has published it. Returns the
    /// stashed completions in the order they originally completed, so the
    /// caller can deliver them downstream exactly as if the shell had been
    /// known from the start.
    pub fn promote_pending(&mut self, message_id: &str, shell_id: Uuid) -> Vec<CompletedPsrpObject> {
        let Some(buffers) = self.pending_shell_bufs.remove(message_id) else {
            warn!(
                message_id,
                %shell_id,
                "promote_pending called with no matching pending shell; registering the shell anyway"
            );
            self.new_shell(shell_id);
            return Vec::new();
        };

        if self.shell_bufs.contains_key(&shell_id) {
            warn!(
                message_id,
                %shell_id,
                "a shell buffer set already exists for this ShellId; discarding the pending shell's \
                 unfinished buffers (completed messages are still delivered)"
            );
        } else {
            self.shell_bufs.insert(shell_id, buffers);
        }

        let completed = self.pending_shell_completed.remove(message_id).unwrap_or_default();
        if !completed.is_empty() {
            info!(
                message_id,
                %shell_id,
                count = completed.len(),
                "delivering completed messages stashed while shell was pending"
            );
        }
        completed
    }

    pub fn delete_shell(&mut self, shell_id: Uuid) {
        if self.shell_bufs.remove(&shell_id).is_some() {
            debug!(%shell_id, "discarded buffers for deleted shell");
        }
    }

    fn shell_buffers_mut(&mut self, shell_id: Uuid) -> &mut ObjectBuffers {
        self.shell_bufs.entry(shell_id).or_insert_with(|| {
            warn!(%shell_id, "auto-registering shell seen via fragment data");
            HashMap::new()
        })
    }
}

/// Shared append/complete logic for both identifier spaces (§4.3's "Append
/// policy"). `log_identifier` is only used for diagnostics.
fn append_fragment(
    buffers: &mut ObjectBuffers,
    object_id: i64,
    fragment_id: i64,
    end: bool,
    data: &[u8],
    command_id: Option<Uuid>,
    log_identifier: &dyn std::fmt::Display,
) -> Option<CompletedPsrpObject> {
    let buf = buffers.entry(object_id).or_insert_with(ObjectBuffer::new);
    buf.command_id = command_id;

    let expected = buf.last_fragment_id + 1;
    if expected != fragment_id {
        error!(
            %log_identifier,
            object_id,
            expected,
            got = fragment_id,
            "out-of-order PSRP fragment; abandoning fragment"
        );
        return None;
    }

    buf.buffer.extend_from_slice(data);
    buf.last_fragment_id = fragment_id;

    if end {
        let buf = buffers.remove(&object_id).unwrap();
        debug!(%log_identifier, object_id, len = buf.buffer.len(), "PSRP object complete");
        Some(CompletedPsrpObject {
            object_id,
            data: buf.buffer,
            command_id: buf.command_id,
        })
    } else {
        None
    }
}
