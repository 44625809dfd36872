mod config;
mod powershell_capture;
mod process_filter;
mod trace_session;
mod winrm_capture;

use std::io::{self, Write};
use std::thread;

use clap::Parser;
use tracing::{error, info, warn};

use config::{init_logging, Args, Provider};
use process_filter::{svchost_pids, ExcludedPids};
use psrp_trace_tracer::TracedLine;
use trace_session::{TraceSession, TraceSessionError, UnsupportedTraceSession, POWERSHELL_PROVIDER_GUID, WINRM_PROVIDER_GUID};

#[cfg(all(target_os = "windows", feature = "windows-etw"))]
use trace_session::WindowsEtwSession;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;
    let _span = tracing::span!(tracing::Level::INFO, "main").entered();

    let provider = args.provider.unwrap_or_default();
    info!(?provider, "starting PSRP trace capture");

    let mut excluded_pids = svchost_pids();
    excluded_pids.extend(args.exclude_pid.iter().copied());
    let excluded = ExcludedPids::new(excluded_pids);

    let mut session = make_session(provider);
    let events = match session.start() {
        Ok(events) => events,
        Err(TraceSessionError::RecordDecodingUnavailable(name)) => {
            warn!(session = name, "trace session started but cannot decode raw records; nothing will be captured");
            return Ok(());
        }
        Err(err) => {
            error!(%err, "could not start trace session");
            return Err(err.into());
        }
    };

    let capture_handle = thread::spawn(move || match provider {
        Provider::Winrm => winrm_capture::run(&events, &excluded),
        Provider::Powershell => powershell_capture::run(&events, &excluded),
    });

    println!("\nPress ENTER or CTRL+C to stop trace\n");
    let mut discard = String::new();
    let _ = io::stdin().read_line(&mut discard);

    session.stop()?;
    let _ = capture_handle.join();

    info!("trace capture stopped");
    Ok(())
}

fn make_session(provider: Provider) -> Box<dyn TraceSession> {
    let (name, guid) = match provider {
        Provider::Winrm => ("PSRP_monitor", WINRM_PROVIDER_GUID),
        Provider::Powershell => ("PSRP_monitor", POWERSHELL_PROVIDER_GUID),
    };

    #[cfg(all(target_os = "windows", feature = "windows-etw"))]
    {
        Box::new(WindowsEtwSession::new(name, guid))
    }
    #[cfg(not(all(target_os = "windows", feature = "windows-etw")))]
    {
        let _ = (name, guid);
        Box::new(UnsupportedTraceSession)
    }
}

/// Print the transcript lines a [`psrp_trace_tracer::CommandTracer`]
/// produced, respecting each line's newline-vs-inline choice (the prompt
/// string and `Write2` host calls are printed without a trailing newline).
pub(crate) fn print_traced_lines(lines: Vec<TracedLine>) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for line in lines {
        if line.newline {
            let _ = writeln!(handle, "{}", line.text);
        } else {
            let _ = write!(handle, "{}", line.text);
            let _ = handle.flush();
        }
    }
}
