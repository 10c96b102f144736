//! Entry point, grounded in `original_source/trunk/src/main.c`'s `main()`:
//! parse options, import a channels file if one was given, bring the engine
//! up, optionally replay a startup script, then drop into the interactive
//! command loop until `quit`.

use clap::Parser;
use dvbengine::config::{self, LogConfig};
use dvbengine::engine::Engine;
use dvbengine::error::Result;
use dvbengine::shell::Shell;
use dvbengine::store::Store;
use dvbengine::tuner::{FileTuner, NullTuner, TunerDevice};
use std::path::PathBuf;
use std::sync::Arc;

/// DVB transport-stream packet-dispatch and PSI/SI table-processing engine.
#[derive(Parser, Debug)]
#[command(name = "dvbengine", version, about)]
struct Args {
    /// DVB adapter index (`/dev/dvb/adapter<N>`), matching `-a` in the original.
    #[arg(short, long, default_value_t = 0)]
    adapter: u32,

    /// Increase log verbosity; repeat for more (`-v`, `-vv`, ...).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Default output MRL (`null://`, `udp://host:port`, `file://path`). The
    /// original required `-o` unconditionally; here it is optional because
    /// outputs can also be added interactively with `addoutput`.
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Import a DVB-T channels.conf before starting.
    #[arg(short = 't', long = "channels-terrestrial", value_name = "FILE")]
    channels_terrestrial: Option<PathBuf>,

    /// Import a DVB-S channels.conf before starting.
    #[arg(short = 's', long = "channels-satellite", value_name = "FILE")]
    channels_satellite: Option<PathBuf>,

    /// Import a DVB-C channels.conf before starting.
    #[arg(short = 'c', long = "channels-cable", value_name = "FILE")]
    channels_cable: Option<PathBuf>,

    /// Run this command script before dropping into the interactive shell.
    #[arg(short = 'f', long = "startup-script", value_name = "FILE")]
    startup_script: Option<PathBuf>,

    /// Replay a captured `.ts` file instead of a live adapter (demos/tests).
    #[arg(long, value_name = "FILE")]
    capture: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut log = LogConfig::default();
    if args.verbose > 0 {
        log.level = match args.verbose {
            1 => "info".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        };
    }
    dvbengine::logging::init(&log);

    let mut config = config::get();
    config.adapter = args.adapter;

    let store = Arc::new(Store::connect(&config.store_path()).await?);

    for (path, label) in [
        (&args.channels_terrestrial, "DVB-T"),
        (&args.channels_satellite, "DVB-S"),
        (&args.channels_cable, "DVB-C"),
    ] {
        if let Some(path) = path {
            tracing::info!(file = %path.display(), "importing {label} channels");
            let count = dvbengine::channels::import(&store, path).await?;
            tracing::info!(count, "channels imported");
        }
    }

    let device: Box<dyn TunerDevice> = match &args.capture {
        Some(path) => Box::new(FileTuner::new(path)),
        None => Box::new(NullTuner::default()),
    };

    let engine = Arc::new(Engine::new(device, store, config.adapter + 1, config.rewrite_cadence_ms).await?);

    if let Some(mrl) = &args.output {
        engine.add_manual_output("default", mrl, Vec::new())?;
    }

    let shell = Shell::new(engine.clone());

    if let Some(script) = &args.startup_script {
        if let Err(err) = shell.run_script(script).await {
            tracing::error!(%err, file = %script.display(), "startup script not found");
        }
    }

    std::fs::create_dir_all(&config.data_dir)?;
    shell.run(&config.history_path()).await?;

    engine.writeback().await?;
    drop(shell);
    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown()?,
        Err(_) => tracing::warn!("engine still shared at shutdown, skipping reader teardown"),
    }

    Ok(())
}
