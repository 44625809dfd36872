//! Fixed namespace URIs and well-known constants from §6.

pub const NS_SOAP_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_WS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const NS_WS_TRANSFER: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
pub const NS_DMTF_WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
pub const NS_MS_WSMAN: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
pub const NS_WSMAN_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
pub const NS_POWERSHELL: &str = "http://schemas.microsoft.com/powershell";
pub const NS_WSMAN_FAULT: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsmanfault";

pub const PS_RESOURCE_URI: &str = "http://schemas.microsoft.com/powershell/Microsoft.PowerShell";

pub const CMD_STATE_DONE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";
