//! WS-Management SOAP envelope parsing and dispatch (§4.2): the layer that
//! decides whether a reassembled SOAP document is PowerShell-related, keeps
//! the tracking tables that correlate requests with responses and commands
//! with shells, and feeds PSRP payloads to the fragment defragmenter.
//!
//! Per §5's concurrency model, [`WsManDispatcher`] is deliberately **not**
//! internally locked (option (a): run it on a single-threaded executor fed
//! by a channel the SOAP defragmenter writes into, rather than guarding its
//! tracking tables with a lock). Its methods take `&mut self`.

mod action;
mod namespace;
mod xmlpath;

pub use action::WsManAction;
pub use namespace::*;

use std::collections::{HashMap, HashSet};

use base64::Engine;
use psrp_trace_psrp::{CompletedPsrpObject, Defragmenter};
use psrp_trace_xpress::{Decompressor, XpressStreamDecompressor};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum WinrmError {
    #[error("SOAP XML is not well-formed: {0}")]
    MalformedXml(#[from] roxmltree::Error),

    #[error("SOAP document has no s:Header element")]
    MissingHeader,

    #[error("SOAP document has no s:Body element")]
    MissingBody,

    #[error("SOAP header has no a:Action element")]
    MissingAction,
}

/// Parses complete SOAP envelopes, identifies those relating to PSRP, and
/// routes their payloads into a [`Defragmenter`]. Non-PSRP envelopes are
/// ignored.
pub struct WsManDispatcher<D: Decompressor> {
    defrag: Defragmenter,
    decompressor: XpressStreamDecompressor<D>,

    /// `MessageID`s of outstanding `Create` requests.
    create_msgs: HashSet<String>,
    /// `MessageID -> ShellId` for outstanding `Delete` requests.
    delete_msgs: HashMap<String, Uuid>,
    /// `MessageID -> ShellId` for outstanding `Command` requests.
    command_msgs: HashMap<String, Uuid>,
    /// `MessageID -> ShellId` for outstanding `Receive` requests.
    receive_msgs: HashMap<String, Uuid>,
    /// `CommandId -> ShellId` once a command has been bound to a shell.
    commands: HashMap<String, Uuid>,
}

impl<D: Decompressor> WsManDispatcher<D> {
    pub fn new(decompressor: D) -> Self {
        Self {
            defrag: Defragmenter::new(),
            decompressor: XpressStreamDecompressor::new(decompressor),
            create_msgs: HashSet::new(),
            delete_msgs: HashMap::new(),
            command_msgs: HashMap::new(),
            receive_msgs: HashMap::new(),
            commands: HashMap::new(),
        }
    }

    /// Parse and dispatch one complete SOAP document. Any error anywhere in
    /// this pipeline for this document is logged and the document is
    /// abandoned; tracking-table state from before the error is left
    /// intact, matching the "catch around each handler, no tracking table
    /// corruption" requirement.
    pub fn dispatch(&mut self, soap: &str) -> Vec<CompletedPsrpObject> {
        match self.try_dispatch(soap) {
            Ok(objects) => objects,
            Err(err) => {
                error!(%err, "error parsing WS-Man SOAP document; it will be abandoned");
                Vec::new()
            }
        }
    }

    fn try_dispatch(&mut self, soap: &str) -> Result<Vec<CompletedPsrpObject>, WinrmError> {
        let doc = roxmltree::Document::parse(soap)?;
        let envelope = doc.root_element();

        let header = xmlpath::child(envelope, NS_SOAP_ENVELOPE, "Header").ok_or(WinrmError::MissingHeader)?;

        let action_uri = xmlpath::child(header, NS_WS_ADDRESSING, "Action")
            .and_then(xmlpath::text)
            .ok_or(WinrmError::MissingAction)?;

        let Some(action) = WsManAction::from_uri(action_uri) else {
            debug!(action_uri, "WS-Man action not recognized as PowerShell related; ignored");
            return Ok(Vec::new());
        };

        let resource_uri = xmlpath::child(header, NS_DMTF_WSMAN, "ResourceURI").and_then(xmlpath::text);
        if let Some(resource_uri) = resource_uri {
            if resource_uri != PS_RESOURCE_URI {
                debug!(resource_uri, "WS-Man ResourceURI does not look like PowerShell; ignored");
                return Ok(Vec::new());
            }
        }

        let message_id = xmlpath::child(header, NS_WS_ADDRESSING, "MessageID").and_then(xmlpath::text);
        let body = xmlpath::child(envelope, NS_SOAP_ENVELOPE, "Body").ok_or(WinrmError::MissingBody)?;

        match action {
            WsManAction::Create => Ok(self.on_create(body, message_id, resource_uri)),
            WsManAction::CreateResponse => Ok(self.on_create_response(header, body, message_id)),
            WsManAction::Delete => Ok(self.on_delete(header, resource_uri, message_id)),
            WsManAction::DeleteResponse => Ok(self.on_delete_response(header, message_id)),
            WsManAction::Command => Ok(self.on_command(header, body, resource_uri, message_id)),
            WsManAction::CommandResponse => Ok(self.on_command_response(header, body)),
            WsManAction::Receive => Ok(self.on_receive(header, body, resource_uri, message_id)),
            WsManAction::ReceiveResponse => Ok(self.on_receive_response(header, body)),
            WsManAction::Signal | WsManAction::Fault => Ok(Vec::new()),
        }
    }

    fn get_shell_id(header: roxmltree::Node) -> Option<Uuid> {
        xmlpath::selector_value(header, NS_DMTF_WSMAN, "ShellId").and_then(|text| Uuid::parse_str(text).ok())
    }

    /// §4.2's `_known_shell_id_or_resource_uri`: a request is relevant if
    /// its `ShellId` selector is already tracked, or if its `ResourceURI`
    /// is the PowerShell one (in which case a previously-unknown ShellId is
    /// registered on the spot).
    fn known_shell_id_or_resource_uri(&mut self, shell_id: Option<Uuid>, resource_uri: Option<&str>) -> bool {
        if let Some(shell_id) = shell_id {
            if self.defrag.has_shell(shell_id) {
                return true;
            }
        }
        if resource_uri == Some(PS_RESOURCE_URI) {
            if let Some(shell_id) = shell_id {
                info!(%shell_id, "unknown ShellId with a PowerShell ResourceURI; will now track it");
                self.defrag.new_shell(shell_id);
            }
            true
        } else {
            false
        }
    }

    fn on_create(&mut self, body: roxmltree::Node, message_id: Option<&str>, resource_uri: Option<&str>) -> Vec<CompletedPsrpObject> {
        if resource_uri != Some(PS_RESOURCE_URI) {
            debug!("Create did not have a PowerShell ResourceURI; ignored");
            return Vec::new();
        }
        let Some(message_id) = message_id else {
            warn!("Create request has a PowerShell ResourceURI but no MessageID; ignored");
            return Vec::new();
        };
        let Some(shell) = xmlpath::path(body, &[(NS_WSMAN_SHELL, "Shell")]) else {
            warn!("could not find Shell element in Create request");
            return Vec::new();
        };
        let Some(creation_xml) = xmlpath::child(shell, NS_POWERSHELL, "creationXml").and_then(xmlpath::text) else {
            warn!("Create request's Shell element has no creationXml");
            return Vec::new();
        };

        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(creation_xml) else {
            error!("error base64-decoding creationXml in Create request");
            return Vec::new();
        };

        self.create_msgs.insert(message_id.to_string());
        info!(message_id, "new Shell create pending");
        self.defrag.new_pending_shell(message_id);
        if let Err(err) = self.defrag.new_fragment_data_pending_shell(message_id, &decoded, None) {
            error!(%err, message_id, "error defragmenting creationXml");
        }
        Vec::new()
    }

    fn on_create_response(&mut self, header: roxmltree::Node, body: roxmltree::Node, _message_id: Option<&str>) -> Vec<CompletedPsrpObject> {
        let relates_to = xmlpath::child(header, NS_WS_ADDRESSING, "RelatesTo").and_then(xmlpath::text);
        let pending_match = relates_to.is_some_and(|rt| self.create_msgs.remove(rt));

        let Some(resource_created) = xmlpath::path(body, &[(NS_WS_TRANSFER, "ResourceCreated")]) else {
            error!("could not find ResourceCreated in CreateResponse body");
            return Vec::new();
        };
        let Some(reference_parameters) = xmlpath::child(resource_created, NS_WS_ADDRESSING, "ReferenceParameters") else {
            error!("could not find ReferenceParameters in CreateResponse's ResourceCreated");
            return Vec::new();
        };
        let body_resource_uri = xmlpath::child(reference_parameters, NS_DMTF_WSMAN, "ResourceURI").and_then(xmlpath::text);

        match (pending_match, body_resource_uri) {
            (false, uri) if uri != Some(PS_RESOURCE_URI) => {
                debug!(?uri, "CreateResponse did not look PowerShell related; ignored");
                return Vec::new();
            }
            (true, uri) if uri != Some(PS_RESOURCE_URI) => {
                warn!(
                    ?uri,
                    "CreateResponse body ResourceURI is not PowerShell, but RelatesTo matches a tracked Create; \
                     continuing anyway"
                );
            }
            (false, uri) if uri == Some(PS_RESOURCE_URI) => {
                warn!("CreateResponse has a PowerShell ResourceURI but no matching tracked Create request");
            }
            _ => {}
        }

        let Some(shell_id_text) = xmlpath::selector_value(reference_parameters, NS_DMTF_WSMAN, "ShellId") else {
            warn!("no ShellId found in CreateResponse");
            return Vec::new();
        };
        let Ok(shell_id) = Uuid::parse_str(shell_id_text) else {
            warn!(shell_id_text, "ShellId in CreateResponse is not a valid UUID");
            return Vec::new();
        };
        let Some(relates_to) = relates_to else {
            warn!(%shell_id, "CreateResponse has no RelatesTo to promote a pending shell with");
            return Vec::new();
        };

        info!(%shell_id, relates_to, "received ShellId for pending shell");
        self.defrag.promote_pending(relates_to, shell_id)
    }

    fn on_delete(&mut self, header: roxmltree::Node, resource_uri: Option<&str>, message_id: Option<&str>) -> Vec<CompletedPsrpObject> {
        let shell_id = Self::get_shell_id(header);
        if !self.known_shell_id_or_resource_uri(shell_id, resource_uri) {
            debug!("Delete was not associated with a known shell or PowerShell ResourceURI; ignored");
            return Vec::new();
        }
        if let (Some(message_id), Some(shell_id)) = (message_id, shell_id) {
            if let Some(previous) = self.delete_msgs.insert(message_id.to_string(), shell_id) {
                warn!(message_id, %previous, %shell_id, "replacing an existing Delete tracking entry");
            }
        }
        Vec::new()
    }

    fn on_delete_response(&mut self, header: roxmltree::Node, _message_id: Option<&str>) -> Vec<CompletedPsrpObject> {
        let relates_to = xmlpath::child(header, NS_WS_ADDRESSING, "RelatesTo").and_then(xmlpath::text);
        let Some(shell_id) = relates_to.and_then(|rt| self.delete_msgs.remove(rt)) else {
            debug!("DeleteResponse was not associated with a tracked Delete request; ignored");
            return Vec::new();
        };
        if self.defrag.has_shell(shell_id) {
            self.defrag.delete_shell(shell_id);
            info!(%shell_id, "shell deleted");
        }
        Vec::new()
    }

    fn on_command(
        &mut self,
        header: roxmltree::Node,
        body: roxmltree::Node,
        resource_uri: Option<&str>,
        message_id: Option<&str>,
    ) -> Vec<CompletedPsrpObject> {
        let shell_id = Self::get_shell_id(header);
        if !self.known_shell_id_or_resource_uri(shell_id, resource_uri) {
            debug!("Command was not associated with a known shell or PowerShell ResourceURI; ignored");
            return Vec::new();
        }
        let Some(shell_id) = shell_id else {
            warn!("Command was accepted as PowerShell related but carries no ShellId; cannot defragment it");
            return Vec::new();
        };

        let Some(arguments) = xmlpath::path(body, &[(NS_WSMAN_SHELL, "CommandLine"), (NS_WSMAN_SHELL, "Arguments")]).and_then(xmlpath::text)
        else {
            error!("could not find CommandLine/Arguments in Command request");
            return Vec::new();
        };

        let mut completed = Vec::new();
        match base64::engine::general_purpose::STANDARD.decode(arguments) {
            Ok(decoded) => match self.defrag.new_fragment_data(shell_id, &decoded, None) {
                Ok(objects) => completed = objects,
                Err(err) => error!(%err, %shell_id, "error defragmenting Command arguments"),
            },
            Err(err) => error!(%err, "error base64-decoding Command arguments"),
        }

        if let Some(message_id) = message_id {
            if let Some(previous) = self.command_msgs.insert(message_id.to_string(), shell_id) {
                warn!(message_id, %previous, %shell_id, "replacing an existing Command tracking entry");
            }
        }
        completed
    }

    fn on_command_response(&mut self, header: roxmltree::Node, body: roxmltree::Node) -> Vec<CompletedPsrpObject> {
        let relates_to = xmlpath::child(header, NS_WS_ADDRESSING, "RelatesTo").and_then(xmlpath::text);
        let Some(relates_to) = relates_to else {
            debug!("CommandResponse has no RelatesTo; ignored");
            return Vec::new();
        };
        let Some(&shell_id) = self.command_msgs.get(relates_to) else {
            debug!(relates_to, "CommandResponse RelatesTo does not match a tracked Command request; ignored");
            return Vec::new();
        };

        let Some(command_id) = xmlpath::path(body, &[(NS_WSMAN_SHELL, "CommandResponse"), (NS_WSMAN_SHELL, "CommandId")]).and_then(xmlpath::text)
        else {
            warn!("could not find CommandId in CommandResponse despite a tracked Command request");
            return Vec::new();
        };

        self.command_msgs.remove(relates_to);
        if let Some(previous) = self.commands.insert(command_id.to_string(), shell_id) {
            warn!(command_id, %previous, %shell_id, "replacing an existing command tracking entry");
        }
        Vec::new()
    }

    fn on_receive(
        &mut self,
        header: roxmltree::Node,
        body: roxmltree::Node,
        resource_uri: Option<&str>,
        message_id: Option<&str>,
    ) -> Vec<CompletedPsrpObject> {
        let shell_id = Self::get_shell_id(header);
        if !self.known_shell_id_or_resource_uri(shell_id, resource_uri) {
            debug!("Receive was not associated with a known shell or PowerShell ResourceURI; ignored");
            return Vec::new();
        }

        if let (Some(message_id), Some(shell_id)) = (message_id, shell_id) {
            if let Some(previous) = self.receive_msgs.insert(message_id.to_string(), shell_id) {
                warn!(message_id, %previous, %shell_id, "replacing an existing Receive tracking entry");
            }
        }

        if let (Some(receive_elem), Some(shell_id)) = (xmlpath::path(body, &[(NS_WSMAN_SHELL, "Receive")]), shell_id) {
            for desired_stream in xmlpath::children(receive_elem, NS_WSMAN_SHELL, "DesiredStream") {
                if let Some(command_id) = desired_stream.attribute("CommandId") {
                    if !self.commands.contains_key(command_id) {
                        info!(
                            command_id,
                            "new PowerShell CommandId found via a Receive request; the Command request itself was missed"
                        );
                        self.commands.insert(command_id.to_string(), shell_id);
                    }
                }
            }
        }
        Vec::new()
    }

    fn on_receive_response(&mut self, header: roxmltree::Node, body: roxmltree::Node) -> Vec<CompletedPsrpObject> {
        let relates_to = xmlpath::child(header, NS_WS_ADDRESSING, "RelatesTo").and_then(xmlpath::text);
        let Some(relates_to) = relates_to else {
            debug!("ReceiveResponse has no RelatesTo; ignored");
            return Vec::new();
        };
        let Some(shell_id) = self.receive_msgs.remove(relates_to) else {
            debug!(relates_to, "ReceiveResponse was not associated with a tracked Receive request; ignored");
            return Vec::new();
        };

        let Some(receive_response) = xmlpath::path(body, &[(NS_WSMAN_SHELL, "ReceiveResponse")]) else {
            error!("could not find ReceiveResponse element in body");
            return Vec::new();
        };

        let mut finished_commands = Vec::new();
        for command_state in xmlpath::children(receive_response, NS_WSMAN_SHELL, "CommandState") {
            let command_id = command_state.attribute("CommandId");
            let exit_code = xmlpath::child(command_state, NS_WSMAN_SHELL, "ExitCode").and_then(xmlpath::text);
            let state = command_state.attribute("State");
            if let Some(command_id) = command_id {
                if state == Some(CMD_STATE_DONE) || exit_code.is_some() {
                    info!(command_id, ?exit_code, "command finished");
                    finished_commands.push(command_id.to_string());
                }
            }
        }

        let mut completed = Vec::new();
        for stream in xmlpath::children(receive_response, NS_WSMAN_SHELL, "Stream") {
            let name = stream.attribute("Name").unwrap_or("<UNKNOWN_STREAM>");
            let command_id = stream.attribute("CommandId");
            let Some(text) = xmlpath::text(stream) else { continue };

            let blob = match base64::engine::general_purpose::STANDARD.decode(text) {
                Ok(blob) => blob,
                Err(err) => {
                    error!(%err, name, ?command_id, "error base64-decoding ReceiveResponse stream");
                    continue;
                }
            };

            let decompressed = match self.decompressor.decompress(&blob) {
                Ok(data) => data,
                Err(err) => {
                    error!(%err, name, ?command_id, "error decompressing ReceiveResponse stream");
                    continue;
                }
            };

            let command_uuid = command_id.and_then(|cid| Uuid::parse_str(cid).ok());
            match self.defrag.new_fragment_data(shell_id, &decompressed, command_uuid) {
                Ok(objects) => completed.extend(objects),
                Err(err) => error!(%err, name, ?command_id, "error defragmenting ReceiveResponse stream"),
            }
        }

        for command_id in finished_commands {
            self.commands.remove(&command_id);
        }

        completed
    }
}
