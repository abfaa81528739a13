//! streambridge Demo Application
//!
//! Drives an `Orchestrator` from a plain loop standing in for a host's
//! per-frame update, and prints what arrived.
//!
//! ```text
//! streambridge-demo [URI] [CYCLES] [--loop]
//! ```
//!
//! Without a URI it plays a short simulated clip. Set `RUST_LOG` to adjust
//! log output.

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use streambridge_core::{BridgeConfig, Orchestrator};
use tracing::{info, warn};

const DEFAULT_URI: &str = "sim://demo?duration=2&width=320&height=180&fps=30";
const DEFAULT_CYCLES: u32 = 120;
const CYCLE_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(name = "streambridge-demo")]
#[command(about = "Play a stream through a headless host loop")]
struct Args {
    /// Media URI to play.
    #[arg(default_value = DEFAULT_URI)]
    uri: String,

    /// Number of host cycles to run.
    #[arg(default_value_t = DEFAULT_CYCLES)]
    cycles: u32,

    /// Restart from the beginning on end of stream.
    #[arg(long = "loop")]
    loop_playback: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streambridge_core=debug".parse()?)
                .add_directive("streambridge_demo=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = BridgeConfig::new(&args.uri);
    config.name = "demo".into();
    config.loop_playback = args.loop_playback;
    config.debug.enabled = true;

    let finishes = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let mut orchestrator = Orchestrator::new(config);
    {
        let finishes = Arc::clone(&finishes);
        orchestrator.on_finish(move || {
            finishes.fetch_add(1, Ordering::Relaxed);
            info!("finished");
        });
    }
    {
        let errors = Arc::clone(&errors);
        orchestrator.on_error(move |message| {
            errors.fetch_add(1, Ordering::Relaxed);
            warn!("playback error: {message}");
        });
    }
    orchestrator.bind_default_destination();
    orchestrator.start()?;

    let mut frames = 0u64;
    let mut events = 0usize;
    for _ in 0..args.cycles {
        let report = orchestrator.poll_cycle()?;
        events += report.events_processed;
        if let Some(frame) = report.frame {
            frames += 1;
            if frames == 1 {
                info!(width = frame.width, height = frame.height, "first frame");
            }
        }
        thread::sleep(CYCLE_INTERVAL);
    }

    let bridge = orchestrator.bridge();
    println!("uri:        {}", args.uri);
    println!("cycles:     {}", args.cycles);
    println!("frames:     {frames}");
    println!("resizes:    {}", orchestrator.frame_sync().resize_count());
    println!(
        "position:   {:.3}s / {:.3}s",
        bridge.position(),
        bridge.duration()
    );
    println!("events:     {events}");
    println!("finishes:   {}", finishes.load(Ordering::Relaxed));
    println!("errors:     {}", errors.load(Ordering::Relaxed));

    orchestrator.destroy()?;
    Ok(())
}
