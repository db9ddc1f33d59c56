use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use penumbra::app::{run_headless, run_windowed, RunOptions, RunSummary, WindowInitError};
use penumbra::{init_logging, LoggingConfig, PipelineSettings};

const USAGE: &str = "Usage: penumbra [--headless] [--frames N] [--size WxH] [--settings FILE]";

fn main() {
    init_logging(LoggingConfig::default());
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let settings = match &options.settings {
        Some(path) => PipelineSettings::load(path)?,
        None => PipelineSettings::default(),
    };
    let run_options = RunOptions {
        frames: options.frames,
        size: options.size,
        settings,
    };

    let summary = if options.headless {
        run_headless(&run_options)?
    } else {
        match run_windowed(&run_options) {
            Ok(summary) => summary,
            Err(err) => {
                if err.downcast_ref::<WindowInitError>().is_some() {
                    eprintln!(
                        "{err}. Falling back to --headless mode (set DISPLAY or install a GPU driver to enable rendering)."
                    );
                    run_headless(&run_options)?
                } else {
                    return Err(err);
                }
            }
        }
    };

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let (width, height) = summary.size;
    println!(
        "Rendered {} frame(s) at {width}x{height}",
        summary.frames
    );
    if !summary.last_stages.is_empty() {
        let stages: Vec<String> = summary
            .last_stages
            .iter()
            .map(|stage| format!("{stage:?}"))
            .collect();
        println!("Last frame: {}", stages.join(" -> "));
    }
    println!("Live GPU resources after shutdown: {}", summary.live_resources);
}

#[derive(Debug, PartialEq)]
struct CliOptions {
    headless: bool,
    frames: Option<u64>,
    size: (u32, u32),
    settings: Option<PathBuf>,
}

impl CliOptions {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = CliOptions {
            headless: false,
            frames: None,
            size: RunOptions::default().size,
            settings: None,
        };
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--headless" => options.headless = true,
                "--frames" => {
                    let value = args.next().ok_or_else(|| anyhow!(USAGE))?;
                    options.frames = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid frame count `{value}`"))?,
                    );
                }
                "--size" => {
                    let value = args.next().ok_or_else(|| anyhow!(USAGE))?;
                    options.size = parse_size(&value)?;
                }
                "--settings" => {
                    let value = args.next().ok_or_else(|| anyhow!(USAGE))?;
                    options.settings = Some(PathBuf::from(value));
                }
                "-h" | "--help" => return Err(anyhow!(USAGE)),
                other => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
            }
        }
        Ok(options)
    }
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("invalid size `{value}`, expected WxH"))?;
    let width: u32 = width
        .parse()
        .with_context(|| format!("invalid width in `{value}`"))?;
    let height: u32 = height
        .parse()
        .with_context(|| format!("invalid height in `{value}`"))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("size `{value}` must be non-zero"));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_every_flag() {
        let options = CliOptions::parse(args(&[
            "--headless",
            "--frames",
            "5",
            "--size",
            "640x360",
            "--settings",
            "look.json",
        ]))
        .unwrap();
        assert_eq!(
            options,
            CliOptions {
                headless: true,
                frames: Some(5),
                size: (640, 360),
                settings: Some(PathBuf::from("look.json")),
            }
        );
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(parse_size("640").is_err());
        assert!(parse_size("0x10").is_err());
        assert_eq!(parse_size("8X4").unwrap(), (8, 4));
    }

    #[test]
    fn missing_value_prints_usage() {
        let err = CliOptions::parse(args(&["--frames"])).unwrap_err();
        assert!(err.to_string().starts_with("Usage:"));
    }
}
