use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};

use flipbook_app::extract::{ExtractOptions, extract_frames};
use flipbook_app::fetch::CancelToken;
use flipbook_app::media::PlayDirection;
use flipbook_app::media::video::{self, FfmpegGrabber};
use flipbook_app::playback::input::{InputEvent, InputRouter, Pointer};
use flipbook_app::playback::{FrameChanged, PlaybackController};
use flipbook_app::session::{LoadEvent, Session, UserGesture};
use flipbook_app::settings::{FetchMode, SourceMode, ViewerSettings};

const USAGE: &str = "\
Usage: flipbook [options]
       flipbook extract <video> <out-dir> [extract options]

  --config <path>     settings file (default: platform config dir)
  --base <path|url>   directory or URL holding frame_NNNN.<ext> files
  --ext <ext>         frame file extension
  --frames <n>        number of frames in the manifest
  --limit <n>         load at most n frames, cutting longer sources
  --video <path>      extract frames from a video with ffmpeg instead
  --workers <n>       fetch with n worker threads instead of batches
  --fps <n>           continuous playback rate
  --strict            warn below 98% loaded instead of 95%
  --save-config       write the effective settings back to the settings file

Extract options:
  --fps <n>           frames per second of video to capture (default 30)
  --scale <f>         output size relative to the video (default 1.0)
  --limit <n>         stop after n frames (default 2033)
  --ext <ext>         webp, png or jpg (default webp)
  --quality <q>       JPEG quality (default 90)
";

const COMMANDS: &str = "\
Commands: n/p step, s <i> seek, + / - hold, r release, w <dy> wheel,
          fps <n>, i info, q quit";

/// A parsed line of terminal input.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Input(InputEvent),
    Release,
    Fps(u32),
    Info,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let head = parts.next()?;
    let arg = parts.next();
    let command = match head {
        "n" | "next" => Command::Input(InputEvent::Click(PlayDirection::Forward)),
        "p" | "prev" => Command::Input(InputEvent::Click(PlayDirection::Backward)),
        "s" | "seek" => Command::Input(InputEvent::SliderInput(arg?.parse().ok()?)),
        "+" => Command::Input(InputEvent::ButtonDown {
            direction: PlayDirection::Forward,
            pointer: Pointer::Mouse,
        }),
        "-" => Command::Input(InputEvent::ButtonDown {
            direction: PlayDirection::Backward,
            pointer: Pointer::Mouse,
        }),
        "r" | "release" => Command::Release,
        "w" | "wheel" => Command::Input(InputEvent::Wheel {
            delta_y: arg?.parse().ok()?,
        }),
        "fps" => Command::Fps(arg?.parse().ok()?),
        "i" | "info" => Command::Info,
        "q" | "quit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

struct Args {
    config: Option<PathBuf>,
    save_config: bool,
    overrides: Vec<(String, String)>,
    strict: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut parsed = Args {
        config: None,
        save_config: false,
        overrides: Vec::new(),
        strict: false,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--strict" => parsed.strict = true,
            "--save-config" => parsed.save_config = true,
            "--config" => {
                let value = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--base" | "--ext" | "--frames" | "--limit" | "--video" | "--workers" | "--fps" => {
                let value = args.next().with_context(|| format!("{arg} needs a value"))?;
                parsed.overrides.push((arg, value));
            }
            other => bail!("unknown argument '{other}'\n\n{USAGE}"),
        }
    }
    Ok(Some(parsed))
}

struct ExtractArgs {
    video: PathBuf,
    out_dir: PathBuf,
    options: ExtractOptions,
}

fn parse_extract_args(mut args: impl Iterator<Item = String>) -> Result<Option<ExtractArgs>> {
    let mut positional = Vec::new();
    let mut options = ExtractOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--fps" | "--scale" | "--limit" | "--ext" | "--quality" => {
                let value = args.next().with_context(|| format!("{arg} needs a value"))?;
                let bad = || format!("bad value '{value}' for {arg}");
                match arg.as_str() {
                    "--fps" => options.fps = value.parse().with_context(bad)?,
                    "--scale" => options.scale = value.parse().with_context(bad)?,
                    "--limit" => options.limit = Some(value.parse().with_context(bad)?),
                    "--quality" => options.quality = value.parse().with_context(bad)?,
                    _ => options.extension = value.trim_start_matches('.').to_string(),
                }
            }
            other if other.starts_with("--") => bail!("unknown argument '{other}'\n\n{USAGE}"),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let [video, out_dir] = <[PathBuf; 2]>::try_from(positional)
        .map_err(|_| anyhow::anyhow!("extract needs <video> and <out-dir>\n\n{USAGE}"))?;
    Ok(Some(ExtractArgs {
        video,
        out_dir,
        options,
    }))
}

fn run_extract(args: &ExtractArgs) -> Result<()> {
    if !video::ffmpeg_available() {
        bail!("ffmpeg and ffprobe are required for extraction");
    }
    let meta = video::probe_video(&args.video).map_err(anyhow::Error::msg)?;
    let mut grabber = FfmpegGrabber::new(args.video.clone(), &meta);
    let summary = extract_frames(&mut grabber, &meta, &args.out_dir, &args.options)
        .with_context(|| format!("could not extract {}", args.video.display()))?;

    println!(
        "Extracted {} frames ({} failed, {:.2} MB) into {}",
        summary.extracted,
        summary.failed,
        summary.bytes as f64 / (1024.0 * 1024.0),
        args.out_dir.display()
    );
    println!(
        "Play with: flipbook --base {} --ext {} --frames {}",
        args.out_dir.display(),
        summary.manifest.extension,
        summary.manifest.frame_count
    );
    Ok(())
}

fn apply_overrides(settings: &mut ViewerSettings, args: &Args) -> Result<()> {
    for (flag, value) in &args.overrides {
        match flag.as_str() {
            "--base" => {
                settings.source_mode = SourceMode::Manifest;
                settings.frames_base = value.clone();
            }
            "--ext" => settings.frame_extension = value.trim_start_matches('.').to_string(),
            "--frames" => {
                let n: usize = value.parse().with_context(|| format!("bad frame count '{value}'"))?;
                settings.frame_count = n;
            }
            "--limit" => {
                let n: usize = value.parse().with_context(|| format!("bad frame limit '{value}'"))?;
                settings.max_frames = Some(n);
            }
            "--video" => {
                settings.source_mode = SourceMode::Video;
                settings.video_path = Some(PathBuf::from(value));
            }
            "--workers" => {
                settings.workers = value
                    .parse()
                    .with_context(|| format!("bad worker count '{value}'"))?;
                settings.fetch_mode = FetchMode::Workers;
            }
            "--fps" => {
                settings.playback_fps =
                    value.parse().with_context(|| format!("bad fps '{value}'"))?;
            }
            _ => {}
        }
    }
    if args.strict {
        settings.strict_verification = true;
    }
    Ok(())
}

/// Read stdin lines on a background thread.
///
/// While `loading` is set, lines are consumed on the reader thread and `q` cancels the load.
fn spawn_stdin_reader(cancel: CancelToken, loading: Arc<AtomicBool>) -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("flipbook-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let Some(line) = screen_line(line, &loading, &cancel) else {
                    continue;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

fn screen_line(line: String, loading: &AtomicBool, cancel: &CancelToken) -> Option<String> {
    if !loading.load(Ordering::Relaxed) {
        return Some(line);
    }
    if line.trim() == "q" {
        cancel.cancel();
    }
    None
}

fn print_loading(event: &LoadEvent) {
    let mut err = std::io::stderr();
    match event {
        LoadEvent::Started => {
            let _ = writeln!(err, "Loading frames... (q + Enter to cancel)");
        }
        LoadEvent::Progress(report) => {
            let eta = report.eta_text.as_deref().unwrap_or("estimating");
            let _ = write!(err, "\r{} - {eta}        ", report.status_text);
            let _ = err.flush();
        }
        LoadEvent::Stuck => {
            let _ = writeln!(err, "\nLoading seems stuck. Check the frame location and restart.");
        }
        LoadEvent::PartialLoad(warning) => {
            let _ = writeln!(err, "\nWarning: {warning}. Missing frames were filled in.");
        }
        LoadEvent::Ready { total } => {
            let _ = writeln!(err, "\nReady: {total} frames");
        }
        LoadEvent::Failed(reason) => {
            let _ = writeln!(err, "\nLoading failed: {reason}");
        }
    }
}

fn show(controller: &PlaybackController, changed: Option<FrameChanged>) {
    if changed.is_some() {
        println!("{}", controller.snapshot().counter_text);
    }
}

fn run_viewer(mut controller: PlaybackController, lines: &Receiver<String>) {
    let mut router = InputRouter::new();
    let mut held: Option<PlayDirection> = None;
    println!("{}", controller.snapshot().counter_text);
    eprintln!("{COMMANDS}");

    loop {
        let next = match controller.next_deadline() {
            Some(deadline) => lines.recv_deadline(deadline),
            None => lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let now = Instant::now();
        let line = match next {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                let changed = controller.tick(now);
                show(&controller, changed);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Catch up on frames that were due while waiting for input
        let changed = controller.tick(now);
        show(&controller, changed);

        let Some(command) = parse_command(&line) else {
            if !line.trim().is_empty() {
                eprintln!("Unknown command '{}'. {COMMANDS}", line.trim());
            }
            continue;
        };
        match command {
            Command::Input(event) => {
                if let InputEvent::ButtonDown { direction, .. } = event {
                    held = Some(direction);
                }
                let changed = router.route(&mut controller, event, now);
                show(&controller, changed);
            }
            Command::Release => {
                if let Some(direction) = held.take() {
                    let event = InputEvent::ButtonUp {
                        direction,
                        pointer: Pointer::Mouse,
                    };
                    let changed = router.route(&mut controller, event, now);
                    show(&controller, changed);
                }
            }
            Command::Fps(fps) => {
                controller.set_fps(fps);
                log::info!("Playback rate set to {} fps", controller.fps());
            }
            Command::Info => {
                let info = controller.snapshot();
                let size = controller
                    .current_frame()
                    .map(|f| format!("{}x{} ({} bytes)", f.width, f.height, f.byte_len()))
                    .unwrap_or_default();
                println!("{} {:?} {} fps {size}", info.counter_text, info.mode, info.fps);
            }
            Command::Quit => break,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = std::env::args().skip(1).peekable();
    if cli.peek().map(String::as_str) == Some("extract") {
        cli.next();
        let Some(args) = parse_extract_args(cli)? else {
            print!("{USAGE}");
            return Ok(());
        };
        return run_extract(&args);
    }

    let Some(args) = parse_args(cli)? else {
        print!("{USAGE}");
        return Ok(());
    };

    let mut settings = match &args.config {
        Some(path) => ViewerSettings::load_from(path),
        None => ViewerSettings::load(),
    };
    apply_overrides(&mut settings, &args)?;
    if args.save_config {
        match &args.config {
            Some(path) => settings.save_to(path),
            None => settings.save(),
        }
    }

    let session = Session::new(settings);
    let loading = Arc::new(AtomicBool::new(false));
    let lines = spawn_stdin_reader(session.cancel_token(), loading.clone())?;
    eprintln!("Press Enter to start loading.");
    match lines.recv() {
        Ok(line) if line.trim() == "q" => return Ok(()),
        Ok(_) => {}
        Err(_) => return Ok(()),
    }

    loading.store(true, Ordering::Relaxed);
    let loaded = session.begin(UserGesture::from_input(), print_loading);
    loading.store(false, Ordering::Relaxed);
    let controller = loaded.context("could not load frames")?;

    run_viewer(controller, &lines);
    log::info!("Viewer closed");
    Ok(())
}
