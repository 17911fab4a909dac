//! Connect to an SSE push endpoint and print notifications until Ctrl-C.
//!
//! ```sh
//! cargo run -p push-subscriber --example listen -- <URL> [TOKEN]
//! ```
//!
//! Or pass the token via environment variable:
//! ```sh
//! PUSH_TOKEN=... cargo run -p push-subscriber --example listen -- <URL>
//! ```
//!
//! Notification bodies go to stdout, everything else to stderr.

use push_subscriber::{
    ChannelSink, HostBindings, MemoryTokenSource, Supervisor, SupervisorConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let url = args.first().ok_or("usage: listen <URL> [TOKEN]")?;
    let token = args.get(1).cloned().or_else(|| std::env::var("PUSH_TOKEN").ok());

    let config = SupervisorConfig::new(url)?;
    let tokens = MemoryTokenSource::new(token);
    let (sink, mut notifications) = ChannelSink::new(config.timing.sink_channel_capacity);
    let supervisor = Supervisor::spawn(config, HostBindings::new(tokens, sink))?;

    eprintln!("listening on {url} ...");
    supervisor.start().await?;

    loop {
        tokio::select! {
            event = notifications.recv() => {
                let Some(event) = event else { break };
                eprintln!(
                    "[{}] {} id={} link={}",
                    event.kind,
                    event.title,
                    event.id,
                    event.deep_link().map_or_else(|| "-".to_string(), |l| l.path()),
                );
                println!("{}", event.body);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let status = supervisor.status().await?;
    eprintln!("stopping ({:?}, {} failed attempts)", status.state, status.attempt_count);
    supervisor.stop().await?;
    Ok(())
}
