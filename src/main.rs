use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::{error, info};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use tsumugi::live::{LiveReload, Shutdown, Supervisor};
use tsumugi::{
    Config, ConsoleNotifier, Credentials, DesktopNotifier, Environment, Mode, Notifier, Runner,
    TsumugiError, stages,
};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run, together with everything it depends on.
    #[arg(index = 1, default_value = stages::DEFAULT_TASK)]
    task: String,

    /// Route configuration, defaults to `tsumugi.toml` if present.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Print the task graph as a Mermaid diagram and exit.
    #[arg(long)]
    graph: bool,

    /// Print every task name and exit.
    #[arg(long)]
    list: bool,

    /// After the run, print the task graph colored by stage duration.
    #[arg(long)]
    timings: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let indicatif = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), TsumugiError> {
    let config = Config::load(args.config.as_deref())?;
    let credentials = Credentials::load()?;
    let blueprint = stages::blueprint(&config, &credentials)?;

    if args.list {
        for task in blueprint.tasks() {
            println!("{task}");
        }
        return Ok(());
    }

    if args.graph {
        print!("{blueprint}");
        return Ok(());
    }

    let plan = blueprint.plan(&args.task)?;

    let notifier: Arc<dyn Notifier> = if config.notifications.desktop {
        Arc::new(DesktopNotifier)
    } else {
        Arc::new(ConsoleNotifier)
    };

    // Serving implies a development session.
    let watching = plan.contains("serve");
    let mode = if watching { Mode::Watch } else { Mode::Build };
    let mut env = Environment::new(mode).with_notifier(notifier.clone());

    let live = if watching {
        let live = LiveReload::start(config.server.live_port)?;
        env = env.with_live_port(live.port());
        Some(Arc::new(live))
    } else {
        None
    };

    info!("running {} in {} mode", args.task, mode.as_str());

    let runner = Runner::new(Arc::new(blueprint), env);
    let report = runner.run(&args.task)?;
    info!(
        "finished, {:.2?} spent in stages:\n{}",
        report.diagnostics.busy(),
        report.diagnostics.summary().trim_end()
    );

    if args.timings {
        print!("{}", report.diagnostics.render_mermaid(runner.blueprint()));
    }

    if let Some(live) = live {
        let supervisor = Supervisor::new(
            stages::bindings(&config),
            Duration::from_millis(config.server.debounce_ms),
            config.dirs.dist.clone(),
        );

        let shutdown = supervisor.shutdown();
        std::thread::spawn(move || stop_on_ctrl_c(shutdown));

        supervisor.watch(Arc::new(runner), live, notifier)?;
    }

    Ok(())
}

fn stop_on_ctrl_c(shutdown: Shutdown) {
    let signalled = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .and_then(|rt| rt.block_on(tokio::signal::ctrl_c()));

    match signalled {
        Ok(()) => shutdown.trigger(),
        Err(e) => error!("couldn't listen for ctrl-c: {e}"),
    }
}
