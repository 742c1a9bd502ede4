use clap::Parser;
use ota_os::{
    Control, Error, EventHandler, EventLoop, OsConfig, OsResult, OtaEvent, OtaEventMsg, OtaOs,
    TimerCallback, TimerId,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of request-timer expiries to handle before shutting down
    #[arg(long, default_value_t = 3)]
    cycles: u32,

    /// Request timer delay in milliseconds
    #[arg(long, default_value_t = 500)]
    request_delay_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Re-arms the request timer on every expiry, then asks the loop to stop.
struct DemoAgent {
    os: Arc<OtaOs>,
    on_request_timer: TimerCallback,
    delay: Duration,
    remaining: u32,
}

impl DemoAgent {
    fn arm(&self) -> OsResult<()> {
        self.os.timers().start(
            TimerId::Request,
            "ota-request",
            self.delay,
            self.on_request_timer.clone(),
        )?;
        Ok(())
    }
}

impl EventHandler for DemoAgent {
    fn handle(&mut self, msg: OtaEventMsg) -> Control {
        match msg.event_id {
            OtaEvent::RequestTimer => {
                self.remaining = self.remaining.saturating_sub(1);
                info!(remaining = self.remaining, "Request timer expired.");
                if self.remaining == 0 {
                    if let Err(e) = self.os.send_event(OtaEvent::Shutdown) {
                        warn!(error = %e, "Failed to queue shutdown; exiting directly.");
                        return Control::Exit;
                    }
                } else if let Err(e) = self.arm() {
                    warn!(error = %e, "Failed to re-arm request timer.");
                    return Control::Exit;
                }
                Control::Continue
            }
            OtaEvent::Shutdown => Control::Exit,
            other => {
                debug!(event = %other, "Ignoring event.");
                Control::Continue
            }
        }
    }

    fn on_idle(&mut self) -> Control {
        debug!("Agent idle.");
        Control::Continue
    }
}

async fn run(cli: &Cli) -> OsResult<()> {
    let config = match &cli.config {
        Some(path) => OsConfig::from_file(path)?,
        None => OsConfig::default(),
    };
    debug!("config: {:?}", config);

    let os = Arc::new(OtaOs::with_runtime(config, Handle::current())?);
    let mut agent = DemoAgent {
        os: os.clone(),
        on_request_timer: os.timer_event_callback(OtaEvent::RequestTimer),
        delay: Duration::from_millis(cli.request_delay_ms),
        remaining: cli.cycles.max(1),
    };
    agent.arm()?;

    let poll_timeout = os.config().receive_timeout;
    let loop_os = os.clone();
    let stats = tokio::task::spawn_blocking(move || {
        EventLoop::new(loop_os.mailbox(), poll_timeout).run(&mut agent)
    })
    .await
    .map_err(|e| Error::internal(format!("Agent loop panicked: {}", e)))??;

    info!(
        dispatched = stats.dispatched,
        idle_polls = stats.idle_polls,
        "Agent loop finished."
    );
    os.shutdown()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
