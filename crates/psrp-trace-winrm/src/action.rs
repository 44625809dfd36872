//! The SOAP `Action` dispatch table (§4.2).

/// A recognized WS-Management `Action` URI. Any action not in this set is
/// ignored entirely by [`crate::WsManDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsManAction {
    Create,
    CreateResponse,
    Delete,
    DeleteResponse,
    Command,
    CommandResponse,
    Receive,
    ReceiveResponse,
    Signal,
    Fault,
}

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_CREATE_RESPONSE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/CreateResponse";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_DELETE_RESPONSE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/DeleteResponse";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_COMMAND_RESPONSE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandResponse";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_RECEIVE_RESPONSE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/ReceiveResponse";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const ACTION_FAULT: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman/fault";

impl WsManAction {
    pub fn from_uri(uri: &str) -> Option<Self> {
        Some(match uri {
            ACTION_CREATE => Self::Create,
            ACTION_CREATE_RESPONSE => Self::CreateResponse,
            ACTION_DELETE => Self::Delete,
            ACTION_DELETE_RESPONSE => Self::DeleteResponse,
            ACTION_COMMAND => Self::Command,
            ACTION_COMMAND_RESPONSE => Self::CommandResponse,
            ACTION_RECEIVE => Self::Receive,
            ACTION_RECEIVE_RESPONSE => Self::ReceiveResponse,
            ACTION_SIGNAL => Self::Signal,
            ACTION_FAULT => Self::Fault,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_all_table_actions() {
        assert_eq!(WsManAction::from_uri(ACTION_CREATE), Some(WsManAction::Create));
        assert_eq!(WsManAction::from_uri(ACTION_RECEIVE_RESPONSE), Some(WsManAction::ReceiveResponse));
    }

    #[test]
    fn unknown_action_is_none() {
        assert_eq!(WsManAction::from_uri("http://example.com/nope"), None);
    }
}
