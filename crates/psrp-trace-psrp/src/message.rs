//! PSRP message-header parsing: turning one complete, reassembled PSRP
//! object into a typed [`PsrpMessage`].
//!
//! Wire layout (all fields little-endian), per §4.4:
//! `destination(4) | message_type(4) | rpid(16) | pid(16) | data(rest)`.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use uuid::Uuid;

use crate::PsrpError;

const HEADER_LEN: usize = 40;

/// Symbolic PSRP message type, decoded from the wire's raw `u32`. Unlike
/// [`PsrpMessage::message_type`] itself (which is never allowed to fail to
/// parse, since the header's integrity does not depend on recognizing the
/// value), this enum exists purely for downstream consumers — the tracer —
/// that want a name instead of a number, and so carries an `Unknown`
/// fallback rather than a `TryFrom` that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SessionCapability,
    InitRunspacepool,
    PublicKey,
    EncryptedSessionKey,
    PublicKeyRequest,
    ConnectRunspacepool,
    RunspacepoolInitData,
    ResetRunspaceState,
    SetMaxRunspaces,
    SetMinRunspaces,
    RunspaceAvailability,
    RunspacepoolState,
    CreatePipeline,
    GetAvailableRunspaces,
    UserEvent,
    ApplicationPrivateData,
    GetCommandMetadata,
    RunspacepoolHostCall,
    RunspacepoolHostResponse,
    PipelineInput,
    EndOfPipelineInput,
    PipelineOutput,
    ErrorRecord,
    PipelineState,
    DebugRecord,
    VerboseRecord,
    WarningRecord,
    ProgressRecord,
    InformationRecord,
    PipelineHostCall,
    PipelineHostResponse,
    Unknown(u32),
}

impl From<u32> for MessageType {
    fn from(value: u32) -> Self {
        match value {
            0x0001_0002 => Self::SessionCapability,
            0x0001_0004 => Self::InitRunspacepool,
            0x0001_0005 => Self::PublicKey,
            0x0001_0006 => Self::EncryptedSessionKey,
            0x0001_0007 => Self::PublicKeyRequest,
            0x0001_0008 => Self::ConnectRunspacepool,
            0x0002_100B => Self::RunspacepoolInitData,
            0x0002_100C => Self::ResetRunspaceState,
            0x0002_1002 => Self::SetMaxRunspaces,
            0x0002_1003 => Self::SetMinRunspaces,
            0x0002_1004 => Self::RunspaceAvailability,
            0x0002_1005 => Self::RunspacepoolState,
            0x0002_1006 => Self::CreatePipeline,
            0x0002_1007 => Self::GetAvailableRunspaces,
            0x0002_1008 => Self::UserEvent,
            0x0002_1009 => Self::ApplicationPrivateData,
            0x0002_100A => Self::GetCommandMetadata,
            0x0002_1100 => Self::RunspacepoolHostCall,
            0x0002_1101 => Self::RunspacepoolHostResponse,
            0x0004_1002 => Self::PipelineInput,
            0x0004_1003 => Self::EndOfPipelineInput,
            0x0004_1004 => Self::PipelineOutput,
            0x0004_1005 => Self::ErrorRecord,
            0x0004_1006 => Self::PipelineState,
            0x0004_1007 => Self::DebugRecord,
            0x0004_1008 => Self::VerboseRecord,
            0x0004_1009 => Self::WarningRecord,
            0x0004_1010 => Self::ProgressRecord,
            0x0004_1011 => Self::InformationRecord,
            0x0004_1100 => Self::PipelineHostCall,
            0x0004_1101 => Self::PipelineHostResponse,
            other => Self::Unknown(other),
        }
    }
}

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// A parsed PSRP message header plus its raw CLIXML body.
///
/// `destination` and `message_type` are kept as the raw wire `u32` here —
/// §3's data model treats the header as a flat, never-failing-to-parse
/// structure; [`MessageType::from`] is the place to turn `message_type`
/// into something symbolic, and only when a caller actually needs that.
#[derive(Debug, Clone)]
pub struct PsrpMessage {
    pub destination: u32,
    pub message_type: u32,
    pub rpid: Uuid,
    pub pid: Option<Uuid>,
    pub data: Vec<u8>,
}

impl PsrpMessage {
    /// Parse a complete PSRP object's bytes (as produced by
    /// [`crate::fragmentation::Defragmenter`]) into a header plus body.
    pub fn parse(data: &[u8]) -> Result<Self, PsrpError> {
        if data.len() < HEADER_LEN {
            return Err(PsrpError::MessageHeaderTruncated(data.len()));
        }

        let mut cursor = Cursor::new(data);
        let destination = cursor.read_u32::<LittleEndian>()?;
        let message_type = cursor.read_u32::<LittleEndian>()?;

        let mut rpid_bytes = [0u8; 16];
        cursor.read_exact(&mut rpid_bytes)?;
        let mut pid_bytes = [0u8; 16];
        cursor.read_exact(&mut pid_bytes)?;

        let mut body = Vec::new();
        cursor.read_to_end(&mut body)?;
        if body.starts_with(&UTF8_BOM) {
            body.drain(..UTF8_BOM.len());
        }

        Ok(Self {
            destination,
            message_type,
            // GUIDs on the wire are .NET `Guid.ToByteArray()` layout
            // (mixed/little-endian), not the RFC 4122 big-endian form.
            rpid: Uuid::from_bytes_le(rpid_bytes),
            pid: pid_bytes.iter().any(|&b| b != 0).then(|| Uuid::from_bytes_le(pid_bytes)),
            data: body,
        })
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.message_type)
    }

    /// The body interpreted as a UTF-8 CLIXML string (PSRP message bodies
    /// are always text, never raw binary, save for the handful of types
    /// this pipeline never needs to render).
    pub fn body_str(&self) -> Result<&str, PsrpError> {
        std::str::from_utf8(&self.data).map_err(PsrpError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(destination: u32, message_type: u32, rpid: Uuid, pid: Option<Uuid>, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&destination.to_le_bytes());
        out.extend_from_slice(&message_type.to_le_bytes());
        out.extend_from_slice(&rpid.to_bytes_le());
        out.extend_from_slice(&pid.unwrap_or_nil().to_bytes_le());
        out.extend_from_slice(body);
        out
    }

    trait UuidOrNil {
        fn unwrap_or_nil(self) -> Uuid;
    }
    impl UuidOrNil for Option<Uuid> {
        fn unwrap_or_nil(self) -> Uuid {
            self.unwrap_or(Uuid::nil())
        }
    }

    #[test]
    fn parses_header_and_recognizes_known_type() {
        let rpid = Uuid::new_v4();
        let raw = header(0x0000_0001, 0x0004_1004, rpid, None, b"<Objs/>");
        let msg = PsrpMessage::parse(&raw).unwrap();
        assert_eq!(msg.destination, 1);
        assert_eq!(msg.message_type(), MessageType::PipelineOutput);
        assert_eq!(msg.rpid, rpid);
        assert_eq!(msg.pid, None);
        assert_eq!(msg.body_str().unwrap(), "<Objs/>");
    }

    #[test]
    fn unknown_message_type_falls_back_without_failing_header_parse() {
        let raw = header(0x0000_0002, 0xDEAD_BEEF, Uuid::new_v4(), None, b"");
        let msg = PsrpMessage::parse(&raw).unwrap();
        assert_eq!(msg.message_type(), MessageType::Unknown(0xDEAD_BEEF));
    }

    #[test]
    fn nonzero_pid_bytes_are_surfaced() {
        let pid = Uuid::new_v4();
        let raw = header(0x0000_0001, 0x0001_0002, Uuid::new_v4(), Some(pid), b"");
        let msg = PsrpMessage::parse(&raw).unwrap();
        assert_eq!(msg.pid, Some(pid));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = PsrpMessage::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, PsrpError::MessageHeaderTruncated(10)));
    }

    #[test]
    fn leading_bom_is_stripped_from_body() {
        let mut body = UTF8_BOM.to_vec();
        body.extend_from_slice(b"<Objs/>");
        let raw = header(0x0000_0001, 0x0001_0002, Uuid::new_v4(), None, &body);
        let msg = PsrpMessage::parse(&raw).unwrap();
        assert_eq!(msg.body_str().unwrap(), "<Objs/>");
    }

    #[test]
    fn guid_bytes_are_read_in_dotnet_mixed_endian_layout() {
        let rpid = Uuid::new_v4();
        let raw = header(0x0000_0001, 0x0001_0002, rpid, None, b"");
        let msg = PsrpMessage::parse(&raw).unwrap();
        assert_eq!(msg.rpid, rpid, "to_bytes_le/from_bytes_le must round-trip the same Uuid");
    }
}
