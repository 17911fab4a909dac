mod config;
mod error;

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use push_subscriber::{
    ChannelSink, HostBindings, MemoryTokenSource, NotificationEvent, Supervisor,
};
use serde::Serialize;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use crate::config::{ListenConfig, Overrides};
use crate::error::ListenResult;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Hold an SSE push connection open and print notifications as JSON lines.
///
/// SIGHUP restarts the connection; SIGINT/SIGTERM stop it and exit.
#[derive(Parser)]
#[command(name = "push-listen", version)]
struct Cli {
    /// SSE endpoint URL
    #[arg(long, env = "PUSH_URL")]
    url: Option<String>,
    /// Bearer token (omit to connect anonymously)
    #[arg(long, env = "PUSH_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// YAML config file with timing and backoff overrides
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// User-Agent header sent with every connection
    #[arg(long)]
    user_agent: Option<String>,
}

/// One line of output per notification.
#[derive(Serialize)]
struct Printed<'a> {
    #[serde(flatten)]
    event: &'a NotificationEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ListenResult<()> {
    let file = match &cli.config {
        Some(path) => config::load(path).await?,
        None => ListenConfig::default(),
    };
    let settings = file.resolve(Overrides {
        url: cli.url,
        token: cli.token,
        user_agent: cli.user_agent,
    })?;

    let tokens = MemoryTokenSource::new(settings.token);
    let (sink, mut notifications) =
        ChannelSink::new(settings.supervisor.timing.sink_channel_capacity);
    let supervisor = Supervisor::spawn(
        settings.supervisor,
        HostBindings::new(tokens, sink.clone()),
    )?;
    supervisor.start().await?;

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();
    let mut sighup = signal(SignalKind::hangup()).ok();

    loop {
        tokio::select! {
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, stopping");
                break;
            }
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, stopping");
                break;
            }
            _ = recv_signal(&mut sighup) => {
                info!("received SIGHUP, restarting connection");
                supervisor.restart().await?;
            }
            event = notifications.recv() => match event {
                Some(event) => print_notification(&event)?,
                None => break,
            },
        }
    }

    supervisor.stop().await?;
    if sink.dropped() > 0 {
        info!(dropped = sink.dropped(), "notifications dropped while output was busy");
    }
    Ok(())
}

fn print_notification(event: &NotificationEvent) -> ListenResult<()> {
    let line = serde_json::to_string(&Printed {
        event,
        link: event.deep_link().map(|link| link.path()),
    })?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
