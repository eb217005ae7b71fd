//! altavoz-cli — play decoded WAV audio through the playback engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};

use altavoz::{Context, ContextOptions, Format, PlayerState};

#[derive(Parser)]
#[command(name = "altavoz")]
#[command(author, version, about = "Altavoz playback engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a WAV file through the default (or named) output device
    Play(PlayArgs),

    /// Display WAV file information
    Info(InfoArgs),
}

#[derive(clap::Args)]
struct PlayArgs {
    /// WAV file to play (8- or 16-bit integer PCM, mono or stereo)
    file: PathBuf,

    /// Loop playback until Ctrl-C
    #[arg(long)]
    looping: bool,

    /// Playback gain, 0.0..=1.0
    #[arg(long, default_value_t = 1.0)]
    gain: f32,

    /// Output device name (case-insensitive substring match)
    #[arg(long)]
    device: Option<String>,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// WAV file to inspect
    file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Play(args) => play(args),
        Commands::Info(args) => info(&args.file),
    }
}

/// Decode a WAV file into the engine's native PCM layout: 16-bit signed or
/// 8-bit unsigned interleaved samples.
fn load_wav(path: &Path) -> anyhow::Result<(Format, Vec<u8>)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.channels > 2 {
        bail!("{} channels are not supported (mono or stereo only)", spec.channels);
    }

    let bytes: Vec<u8> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let samples = reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("could not decode samples")?;
            samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
        }
        (hound::SampleFormat::Int, 8) => {
            let samples = reader
                .samples::<i8>()
                .collect::<Result<Vec<_>, _>>()
                .context("could not decode samples")?;
            samples.iter().map(|s| (i16::from(*s) + 128) as u8).collect()
        }
        _ => bail!("only 8- and 16-bit integer PCM WAV files are supported"),
    };

    let format = Format::new(
        f64::from(spec.sample_rate),
        spec.bits_per_sample as u8,
        spec.channels as u8,
    );
    Ok((format, bytes))
}

fn play(args: PlayArgs) -> anyhow::Result<()> {
    let (format, bytes) = load_wav(&args.file)?;

    let ctx = Context::new(ContextOptions {
        sample_rate: format.sample_rate,
        device_name: args.device,
    })
    .context("could not open audio context")?;
    tracing::info!(
        backend = ctx.backend_name(),
        rate = ctx.sample_rate(),
        "audio context ready"
    );

    let buffer = ctx.create_buffer(format, &bytes)?;
    let mut player = ctx.create_player(format)?;
    player.set_buffer(Some(&buffer))?;
    player.set_gain(args.gain);
    player.set_looping(args.looping);

    let finished = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&finished);
    player.set_finished_callback(move || done.store(true, Ordering::SeqCst));

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt = Arc::clone(&interrupted);
    ctrlc::set_handler(move || interrupt.store(true, Ordering::SeqCst))
        .context("could not install Ctrl-C handler")?;

    player.set_state(PlayerState::Playing)?;
    println!(
        "playing {} ({:.1} s{})",
        args.file.display(),
        buffer.duration().as_secs_f64(),
        if args.looping { ", looping" } else { "" }
    );

    while !finished.load(Ordering::SeqCst) && !interrupted.load(Ordering::SeqCst) {
        ctx.poll_events();
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

fn info(path: &Path) -> anyhow::Result<()> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    let spec = reader.spec();
    let frames = reader.duration();
    let seconds = f64::from(frames) / f64::from(spec.sample_rate);

    println!("{}", path.display());
    println!("  channels:     {}", spec.channels);
    println!("  sample rate:  {} Hz", spec.sample_rate);
    println!("  bit depth:    {}", spec.bits_per_sample);
    println!("  frames:       {}", frames);
    println!("  duration:     {:.3} s", seconds);
    Ok(())
}
