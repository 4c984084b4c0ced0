// src/main.rs - plotter-host: inspect and stream G-code jobs to a pen plotter
use clap::{Parser, Subcommand};
use plotter_rs::gcode::InstructionContext;
use plotter_rs::job::Job;
use plotter_rs::plotter_shared::{Config, ToolRegistry, load_config};
use plotter_rs::streaming::{EngineEvent, EngineOptions, StreamingManager};
use plotter_rs::Tool;
use std::path::{Path, PathBuf};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "plotter-host", about = "Stream G-code jobs to a pen plotter.")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "plotter.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Parse a job and print its statistics
    Info {
        file: PathBuf,
        /// Ink of the tool loaded when the job starts, or "none"
        #[arg(long)]
        tool: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Stream a job to the plotter
    Stream {
        file: PathBuf,
        /// Serial port, defaults to the configured one
        #[arg(long, conflicts_with = "virtual_plotter")]
        port: Option<String>,
        /// Stream to a simulated plotter instead of a serial port
        #[arg(long = "virtual")]
        virtual_plotter: bool,
        /// Ink of the tool currently loaded, or "none"
        #[arg(long)]
        tool: Option<String>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_x: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_y: f64,
        /// Write estimated vs measured durations to this CSV file once done
        #[arg(long)]
        durations_csv: Option<PathBuf>,
    },
}

fn load(path: &Path) -> Result<Config, BoxError> {
    let path_str = path.to_str().ok_or("configuration path is not valid UTF-8")?;
    if !path.exists() && path == Path::new("plotter.toml") {
        tracing::warn!("No plotter.toml found, using default configuration");
        return Ok(Config::default());
    }
    tracing::info!("Loading configuration from: {}", path_str);
    Ok(load_config(path_str)?)
}

fn resolve_tool(name: Option<&str>, tools: &ToolRegistry) -> Result<Tool, BoxError> {
    match name {
        None => Ok(Tool::Undefined),
        Some("none") => Ok(Tool::None),
        Some(name) => {
            let ink = tools.ink_by_name(name).ok_or_else(|| format!("unknown ink '{}'", name))?;
            match tools.tool_by_ink(ink) {
                Tool::Undefined => Err(format!("no tool holds ink '{}'", name).into()),
                tool => Ok(tool),
            }
        }
    }
}

fn print_info(job: &Job, json: bool) -> Result<(), BoxError> {
    let summary = job.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("Job {}", summary.id);
    println!("  instructions:       {}", summary.instructions);
    println!(
        "  bounding box:       ({:.2}, {:.2}) -> ({:.2}, {:.2}), {:.2} x {:.2} mm",
        summary.min[0], summary.min[1], summary.max[0], summary.max[1], summary.width, summary.height
    );
    println!("  drawn distance:     {:.1} mm", summary.drawn_distance);
    println!("  estimated duration: {:.1} s", summary.estimated_duration);
    for ink in &summary.inks {
        println!(
            "  {:<20} {:>6} instructions {:>10.1} mm {:>8.1} s",
            ink.ink.name, ink.executed_instructions, ink.drawn_distance, ink.remaining_duration
        );
    }
    match job.check_compatibility() {
        Ok(()) => println!("  compatible with plotter"),
        Err(e) => println!("  NOT compatible: {}", e),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn stream(
    config: Config,
    tools: ToolRegistry,
    file: &Path,
    port: Option<String>,
    virtual_plotter: bool,
    tool: Option<String>,
    offset: [f64; 2],
    durations_csv: Option<PathBuf>,
) -> Result<(), BoxError> {
    let text = tokio::fs::read_to_string(file).await?;
    let initial_tool = resolve_tool(tool.as_deref(), &tools)?;

    let options = EngineOptions::from(&config.serial);
    let (manager, mut events) = StreamingManager::spawn(config.plotter.clone(), tools, options, config.serial.baud);

    if virtual_plotter {
        manager.connect_virtual().await?;
    } else {
        let port = port.unwrap_or_else(|| config.serial.port.clone());
        if port.is_empty() {
            return Err("no serial port given and none configured".into());
        }
        manager.connect(&port).await?;
    }
    if !initial_tool.is_undefined() {
        manager.set_initially_loaded_tool(initial_tool).await?;
    }

    let mut job = manager.parse_job(&text, false).await?;
    job.set_translation(offset);
    let job_id = manager.start_job(job).await?;

    let mut stopping = false;
    let outcome: Result<(), BoxError> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => {
                tracing::warn!("Interrupted, stopping job");
                stopping = true;
                if let Err(e) = manager.stop_job().await {
                    tracing::warn!("Failed to stop job: {}", e);
                }
            }
            event = events.recv() => match event {
                Some(EngineEvent::Progress(progress)) => tracing::debug!(
                    "{}/{} instructions, {:.0} mm drawn, {:.0}s remaining",
                    progress.executed_instructions,
                    progress.total_instructions,
                    progress.drawn_distance,
                    progress.remaining_duration
                ),
                Some(EngineEvent::StatusChanged(status)) => tracing::info!("Plotter status: {:?}", status),
                Some(EngineEvent::LoadedToolChanged(tool)) => tracing::info!("Loaded tool: {}", tool),
                Some(EngineEvent::DeviceError { instruction, message }) => {
                    tracing::warn!("Device error on '{}': {}", instruction, message)
                }
                Some(EngineEvent::JobCompleted(summary)) if summary.id == job_id => {
                    tracing::info!("Job done: {:.1} mm drawn", summary.drawn_distance);
                    break Ok(());
                }
                Some(EngineEvent::JobAborted { job_id: aborted, reason }) if aborted == job_id => {
                    break Err(format!("job aborted: {}", reason).into());
                }
                Some(_) => {}
                None => break Err("streaming engine stopped".into()),
            },
        }
    };

    if outcome.is_ok() {
        if let Some(path) = durations_csv {
            match manager.duration_report(job_id).await? {
                Some(report) => {
                    tokio::fs::write(&path, report).await?;
                    tracing::info!("Wrote duration report to {}", path.display());
                }
                None => tracing::warn!("No duration report available for job {}", job_id),
            }
        }
    }
    if let Err(e) = manager.disconnect().await {
        tracing::warn!("Disconnect failed: {}", e);
    }
    manager.shutdown().await;
    outcome
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Ports => {
            for port in StreamingManager::available_ports() {
                println!("{}", port);
            }
            Ok(())
        }
        Commands::Info { file, tool, json } => {
            let config = load(&cli.config)?;
            let tools = ToolRegistry::from_config(&config.inks, &config.tools)?;
            let initial_tool = resolve_tool(tool.as_deref(), &tools)?;
            let text = tokio::fs::read_to_string(&file).await?;
            let ctx = InstructionContext::new(&config.plotter, &tools);
            let job = Job::parse(&text, &initial_tool, false, &ctx);
            print_info(&job, json)
        }
        Commands::Stream { file, port, virtual_plotter, tool, offset_x, offset_y, durations_csv } => {
            let config = load(&cli.config)?;
            let tools = ToolRegistry::from_config(&config.inks, &config.tools)?;
            stream(config, tools, &file, port, virtual_plotter, tool, [offset_x, offset_y], durations_csv).await
        }
    }
}
