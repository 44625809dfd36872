//! Command-line arguments and logging setup. Mirrors `powershell-sync`'s
//! `config.rs`: a `clap::Parser` args struct plus a small `init_logging`
//! that writes to a file at a verbosity-derived level.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// PSRP trace reconstruction tool.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub provider: Option<Provider>,

    /// Process IDs to exclude from capture, in addition to the
    /// auto-discovered `svchost.exe` PIDs.
    #[arg(long, value_delimiter = ',')]
    pub exclude_pid: Vec<u32>,

    /// Verbose logging (can be repeated for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Which ETW provider to capture PSRP traffic from.
#[derive(Subcommand, Default, Clone, Copy, Debug)]
pub enum Provider {
    /// Capture from the `Microsoft-Windows-WinRM` provider (default).
    #[default]
    Winrm,
    /// Capture from the `Microsoft-Windows-PowerShell` provider.
    Powershell,
}

/// Initialize logging with file output, the way `powershell-sync::config::init_logging` does.
pub fn init_logging(verbose_level: u8) -> anyhow::Result<()> {
    let log_file = std::fs::File::create("psrp-trace.log")?;

    let log_level = match verbose_level {
        0 => "psrp_trace_cli=info,psrp_trace_winrm=info,psrp_trace_etw=info,psrp_trace_psrp=warn,psrp_trace_tracer=info",
        1 => "psrp_trace_cli=debug,psrp_trace_winrm=debug,psrp_trace_etw=debug,psrp_trace_psrp=debug,psrp_trace_tracer=debug",
        _ => "trace",
    };
    let max_level = match verbose_level {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(log_level))
        .with_max_level(max_level)
        .with_target(false)
        .with_line_number(true)
        .with_file(true)
        .with_writer(log_file)
        .init();
    Ok(())
}
