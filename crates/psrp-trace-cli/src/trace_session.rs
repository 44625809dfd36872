//! The OS ETW trace session: an external collaborator (§1, §6). Producing
//! fully-parsed [`RawTraceEvent`]s from a live trace requires decoding raw
//! ETW records against their provider manifests (TDH), which is out of
//! scope for this workspace; this module only models the *session
//! lifecycle* boundary (`start`/`stop`) a real implementation would plug
//! into, the way `ironposh-client-core` isolates `sspi` behind a crate
//! boundary instead of inlining raw FFI.

use std::sync::mpsc;

use psrp_trace_etw::{EventHeader, PowerShellTraceEvent};
use psrp_trace_soap::SoapChunkEvent;

/// `Microsoft-Windows-WinRM` provider GUID, per `remotepspy.etw.ETWWinRM`.
pub const WINRM_PROVIDER_GUID: &str = "A7975C8F-AC13-49F1-87DA-5A984A4AB417";
/// `Microsoft-Windows-PowerShell` provider GUID, per `remotepspy.etw.ETWPowerShell`.
pub const POWERSHELL_PROVIDER_GUID: &str = "A0C1853B-5C40-4B15-8766-3CF1C58F985A";

#[derive(Debug, thiserror::Error)]
pub enum TraceSessionError {
    #[error("ETW trace sessions are only supported on Windows")]
    UnsupportedPlatform,

    #[error("starting the ETW trace session failed: {0}")]
    StartFailed(String),

    #[error("stopping the ETW trace session failed: {0}")]
    StopFailed(String),

    #[error(
        "ETW session '{0}' started, but decoding its raw records into structured events requires a TDH manifest \
         decoder, which this crate does not implement"
    )]
    RecordDecodingUnavailable(String),
}

/// One fully-parsed event as a real trace session would hand it to a
/// capture loop (§4.1, §4.6's two provider shapes).
#[derive(Debug, Clone)]
pub enum RawTraceEvent {
    WinRmSoapChunk(SoapChunkEvent),
    PowerShellProvider(EventHeader, PowerShellTraceEvent),
}

/// Controls one ETW trace session's lifecycle. `start` hands back the
/// channel that structured events arrive on; the session is running for as
/// long as the receiver is alive, until `stop` is called.
pub trait TraceSession {
    fn start(&mut self) -> Result<mpsc::Receiver<RawTraceEvent>, TraceSessionError>;
    fn stop(&mut self) -> Result<(), TraceSessionError>;
}

/// Fallback used on non-Windows hosts, or when the crate is built without
/// the `windows-etw` feature: there is no real ETW backend available.
#[derive(Debug, Default)]
pub struct UnsupportedTraceSession;

impl TraceSession for UnsupportedTraceSession {
    fn start(&mut self) -> Result<mpsc::Receiver<RawTraceEvent>, TraceSessionError> {
        Err(TraceSessionError::UnsupportedPlatform)
    }

    fn stop(&mut self) -> Result<(), TraceSessionError> {
        Ok(())
    }
}

#[cfg(all(target_os = "windows", feature = "windows-etw"))]
mod windows_backend {
    use super::{RawTraceEvent, TraceSession, TraceSessionError};
    use std::mem::size_of;
    use std::sync::mpsc;
    use tracing::info;
    use windows::core::PCWSTR;
    use windows::Win32::System::Diagnostics::Etw::{ControlTraceW, StartTraceW, EVENT_TRACE_CONTROL_STOP, EVENT_TRACE_PROPERTIES, EVENT_TRACE_REAL_TIME_MODE};

    const PROPERTIES_BUF_LEN: usize = size_of::<EVENT_TRACE_PROPERTIES>() + 2 * 1024;

    /// Controls a real-time ETW session via `StartTraceW`/`ControlTraceW`
    /// for the named provider. Per this module's docs, it manages the
    /// kernel-side session only; it never attempts to decode the raw
    /// records the session captures, since that requires a TDH manifest
    /// decoder this crate does not implement.
    pub struct WindowsEtwSession {
        session_name: String,
        provider_guid: String,
        handle: Option<u64>,
    }

    impl WindowsEtwSession {
        pub fn new(session_name: impl Into<String>, provider_guid: impl Into<String>) -> Self {
            Self {
                session_name: session_name.into(),
                provider_guid: provider_guid.into(),
                handle: None,
            }
        }

        /// Build a zeroed `EVENT_TRACE_PROPERTIES` buffer big enough to hold
        /// the trailing `LoggerName`/`LogFileName` strings `StartTraceW`
        /// appends after the fixed struct.
        fn properties_buffer(&self) -> Vec<u8> {
            let mut buf = vec![0u8; PROPERTIES_BUF_LEN];
            #[allow(clippy::cast_possible_truncation)]
            let properties = buf.as_mut_ptr().cast::<EVENT_TRACE_PROPERTIES>();
            unsafe {
                (*properties).Wnode.BufferSize = PROPERTIES_BUF_LEN as u32;
                (*properties).LogFileMode = EVENT_TRACE_REAL_TIME_MODE;
                (*properties).LoggerNameOffset = size_of::<EVENT_TRACE_PROPERTIES>() as u32;
            }
            buf
        }
    }

    impl TraceSession for WindowsEtwSession {
        fn start(&mut self) -> Result<mpsc::Receiver<RawTraceEvent>, TraceSessionError> {
            info!(session = %self.session_name, provider = %self.provider_guid, "starting ETW trace session");

            let session_name_wide: Vec<u16> = self.session_name.encode_utf16().chain(std::iter::once(0)).collect();
            let mut properties = self.properties_buffer();
            #[allow(clippy::cast_ptr_alignment)]
            let properties_ptr = properties.as_mut_ptr().cast::<EVENT_TRACE_PROPERTIES>();

            let mut handle = 0u64;
            let status = unsafe { StartTraceW(&mut handle, PCWSTR(session_name_wide.as_ptr()), properties_ptr) };
            if status.0 != 0 {
                return Err(TraceSessionError::StartFailed(format!("StartTraceW failed with status {}", status.0)));
            }

            self.handle = Some(handle);
            // Enabling the provider (EnableTraceEx2) and consuming the
            // session's buffers (ProcessTrace + a TDH-based event decoder)
            // are both out of scope here; the session exists but nothing
            // will ever read from it.
            Err(TraceSessionError::RecordDecodingUnavailable(self.session_name.clone()))
        }

        fn stop(&mut self) -> Result<(), TraceSessionError> {
            let Some(handle) = self.handle.take() else {
                return Ok(());
            };
            info!(session = %self.session_name, "stopping ETW trace session");
            let mut properties = self.properties_buffer();
            #[allow(clippy::cast_ptr_alignment)]
            let properties_ptr = properties.as_mut_ptr().cast::<EVENT_TRACE_PROPERTIES>();
            let status = unsafe { ControlTraceW(handle, PCWSTR::null(), properties_ptr, EVENT_TRACE_CONTROL_STOP) };
            if status.0 != 0 {
                return Err(TraceSessionError::StopFailed(format!("ControlTraceW failed with status {}", status.0)));
            }
            Ok(())
        }
    }
}

#[cfg(all(target_os = "windows", feature = "windows-etw"))]
pub use windows_backend::WindowsEtwSession;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_session_reports_unsupported_platform() {
        let mut session = UnsupportedTraceSession;
        let err = session.start().unwrap_err();
        assert!(matches!(err, TraceSessionError::UnsupportedPlatform));
    }
}
