use anyhow::{Context, bail};
use clap::{Arg, ArgMatches, Command, value_parser};
use ffcamera::capture::{CameraUnit, SyntheticCameraProvider};
use ffcamera::codec::{CodecId, CodecRegistry};
use ffcamera::config::{Config, app_name, app_version};
use ffcamera::display::LogSurfaceProvider;
use ffcamera::pipeline::Recorder;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{panic, process, thread};
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn cli() -> Command {
    Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("File written by record and read by play.")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("codec")
                .long("codec")
                .value_name("CODEC")
                .help("rawvideo, mpeg2video or h264.")
                .global(true)
                .value_parser(value_parser!(CodecId)),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .global(true)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .global(true)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .global(true)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("stall-timeout-ms")
                .long("stall-timeout-ms")
                .value_name("MS")
                .help("Stop waiting for new data after this long.")
                .global(true)
                .value_parser(value_parser!(u64)),
        )
        .subcommand(
            Command::new("record")
                .about("Record the camera with a live preview of the file being written.")
                .arg(
                    Arg::new("seconds")
                        .short('s')
                        .long("seconds")
                        .default_value("5")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("unit")
                        .short('u')
                        .long("unit")
                        .default_value("rear")
                        .value_parser(value_parser!(CameraUnit)),
                ),
        )
        .subcommand(Command::new("play").about("Play back the recorded file."))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(codec) = matches.get_one::<CodecId>("codec") {
        config.codec = *codec;
        if !matches.contains_id("output") {
            config.output_path.set_extension(codec.extension());
        }
    }
    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output_path = output.clone();
    }
    if let Some(width) = matches.get_one::<u32>("width") {
        config.width = *width;
    }
    if let Some(height) = matches.get_one::<u32>("height") {
        config.height = *height;
    }
    if let Some(fps) = matches.get_one::<u32>("fps") {
        config.frame_rate = *fps;
    }
    if let Some(timeout) = matches.get_one::<u64>("stall-timeout-ms") {
        config.decoder.stall_timeout_ms = Some(*timeout);
    }
    Ok(config)
}

fn record(
    recorder: &mut Recorder,
    unit: CameraUnit,
    seconds: u64,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    recorder.start_camera(unit)?;
    recorder.start_recording()?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut last_status = Instant::now();
    while Instant::now() < deadline && !token.is_cancelled() {
        thread::sleep(POLL_INTERVAL);
        if last_status.elapsed() >= Duration::from_secs(1) {
            info!("{}", recorder.status());
            last_status = Instant::now();
        }
    }

    recorder.stop_recording();
    // let the preview catch up with the closed file
    while recorder.is_playing() && !token.is_cancelled() {
        thread::sleep(POLL_INTERVAL);
    }
    recorder.shutdown();
    Ok(())
}

fn play(recorder: &mut Recorder, token: &CancellationToken) -> anyhow::Result<()> {
    if !recorder.toggle_playback()? {
        bail!("playback did not start");
    }
    while recorder.is_playing() && !token.is_cancelled() {
        thread::sleep(POLL_INTERVAL);
    }
    recorder.shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let Some((command, sub)) = matches.subcommand() else {
        bail!("no command given");
    };
    // global flags are propagated to the subcommand wherever they were given
    let config = load_config(sub)?;

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    // first signal stops gracefully, the second one exits
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            process::exit(130);
        }
        warn!("interrupted, stopping");
        handler_token.cancel();
    })
    .context("failed to set Ctrl-C handler")?;

    info!(
        "{} {}: {} {}x{} @ {} fps, file {}",
        app_name(),
        app_version(),
        config.codec,
        config.width,
        config.height,
        config.frame_rate,
        config.output_path.display()
    );

    let mut recorder = Recorder::new(
        config.clone(),
        Arc::new(CodecRegistry::new()),
        Arc::new(SyntheticCameraProvider::with_format(config.camera_format)),
        Arc::new(LogSurfaceProvider::new(u64::from(config.frame_rate.max(1)))),
    );

    let result = match command {
        "record" => {
            let seconds = sub.get_one::<u64>("seconds").copied().unwrap_or(5);
            let unit = sub
                .get_one::<CameraUnit>("unit")
                .copied()
                .unwrap_or(CameraUnit::Rear);
            record(&mut recorder, unit, seconds, &token)
        }
        "play" => play(&mut recorder, &token),
        other => Err(anyhow::anyhow!("unknown command {}", other)),
    };

    for report in recorder.close_reports() {
        info!(
            "{} session: {} frames, {} bytes ({})",
            report.kind,
            report.frames,
            report.bytes,
            report.path.display()
        );
    }
    result
}
