use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use retro_host::av::{AudioSink, NullAudio, NullVideo};
use retro_host::frontend::capture::{WavCapture, write_png};
use retro_host::frontend::{Frontend, StopReason};
use retro_host::input::NullInput;
use retro_host::{CoreHost, HostCallbacks, HostConfig};

#[derive(Debug, Parser)]
#[command(name = "retro-host")]
#[command(about = "Load a libretro core and run it headless")]
struct Cli {
    /// TOML host configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print what a core reports about itself.
    Info {
        core: PathBuf,
    },
    /// Run a core, optionally with content.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    core: PathBuf,
    content: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Run several frames per tick, unthrottled.
    #[arg(long)]
    fast_forward: bool,

    /// Do not sleep between frames.
    #[arg(long)]
    unthrottled: bool,

    /// Write the last frame to this PNG file on exit.
    #[arg(long)]
    capture_frame: Option<PathBuf>,

    /// Record the core's audio to this WAV file.
    #[arg(long)]
    capture_audio: Option<PathBuf>,

    #[arg(long)]
    system_dir: Option<PathBuf>,

    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Core option override, `key=value`; may be repeated.
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig> {
    match path {
        Some(path) => HostConfig::load(path),
        None => Ok(HostConfig::default()),
    }
}

fn info(config: HostConfig, core: PathBuf) -> Result<()> {
    let mut host = CoreHost::open(&core, config)
        .with_context(|| format!("failed to open core {}", core.display()))?;

    let system = host.system_info().clone();
    println!("library:        {} {}", system.library_name, system.library_version);
    println!("extensions:     {}", system.valid_extensions);
    println!("need_fullpath:  {}", system.need_fullpath);
    println!("block_extract:  {}", system.block_extract);

    host.init()?;
    println!("no content:     {}", host.supports_no_game());
    println!("pixel format:   {:?}", host.pixel_format());
    let options = host.core_options();
    if !options.is_empty() {
        println!("options:");
        for option in options {
            println!(
                "  {} = {} ({}; {})",
                option.key,
                option.default_choice(),
                option.description,
                option.choices.join("|")
            );
        }
    }
    host.deinit()?;
    Ok(())
}

fn run(mut config: HostConfig, args: RunArgs) -> Result<()> {
    let RunArgs {
        core,
        content,
        frames,
        fast_forward,
        unthrottled,
        capture_frame,
        capture_audio,
        system_dir,
        save_dir,
        options,
    } = args;

    if system_dir.is_some() {
        config.paths.system_dir = system_dir;
    }
    if save_dir.is_some() {
        config.paths.save_dir = save_dir;
    }
    config.frontend.unthrottled |= unthrottled;
    for option in options {
        let Some((key, value)) = option.split_once('=') else {
            bail!("core option `{option}` is not in KEY=VALUE form");
        };
        config.core_options.insert(key.trim().to_owned(), value.trim().to_owned());
    }

    let wav = capture_audio
        .as_ref()
        .map(|path| WavCapture::new(path, config.frontend.clone()));
    let audio: Box<dyn AudioSink> = match &wav {
        Some(wav) => Box::new(wav.clone()),
        None => Box::new(NullAudio),
    };

    let mut host = CoreHost::open(&core, config)
        .with_context(|| format!("failed to open core {}", core.display()))?;
    host.init()?;
    host.register(HostCallbacks {
        video: Box::new(NullVideo),
        audio,
        input: Box::new(NullInput),
    })?;

    let mut frontend = Frontend::new(host)?;
    let timing = frontend.start(content.as_deref())?;
    log::info!(
        "running {} at {:.3} fps",
        frontend.host().system_info().library_name,
        timing.fps
    );
    frontend.set_fast_forward(fast_forward);

    let reason = frontend.run(frames)?;
    match reason {
        StopReason::FrameLimit => log::info!("frame limit reached"),
        StopReason::ShutdownRequested => log::info!("core requested shutdown"),
        StopReason::Paused => log::info!("paused"),
    }
    println!("ran {} frames", frontend.host().frame_count());

    if let Some(path) = capture_frame {
        frontend.host().with_last_frame(|frame| match frame {
            Some(frame) => write_png(&path, &frame),
            None => bail!("core produced no frame to capture"),
        })?;
    }

    frontend.stop()?;

    if let Some(wav) = wav {
        let frames = wav.finish()?;
        println!("captured {frames} audio frames");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Info { core } => info(config, core),
        Command::Run(args) => run(config, args),
    }
}
