use crate::error::Result;
use crate::timer::DEFAULT_INTERVAL;
use crate::tracker::{Viewport, DEFAULT_BASE_SAMPLE_WIDTH};
use clap::Parser;
use std::time::Duration;

const DEFAULT_ZOOM_FACTORS: [f32; 2] = [4.0, 1.0];
const MAX_ZOOM: f32 = 64.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub zoom_factors: Vec<f32>,
    pub base_sample_width: u32,
    pub interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zoom_factors: DEFAULT_ZOOM_FACTORS.to_vec(),
            base_sample_width: DEFAULT_BASE_SAMPLE_WIDTH,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Parser)]
#[command(name = "twinmag")]
#[command(about = "Cursor-following multi-zoom screen magnifier for wlroots compositors", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Zoom factor of each magnifier, comma separated (default: 4,1)
    #[arg(short, long, value_delimiter = ',', value_parser = parse_zoom, default_value = "4,1")]
    pub zoom: Vec<f32>,

    /// Width of the sampled screen region at 1x, in pixels
    #[arg(short, long, default_value_t = DEFAULT_BASE_SAMPLE_WIDTH)]
    pub base_width: u32,

    /// Update interval in milliseconds (default: 10)
    #[arg(short, long, default_value = "10")]
    pub interval: u64,

    /// Quiet mode
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            log::LevelFilter::Error
        } else if self.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        }
    }
}

fn parse_zoom(s: &str) -> std::result::Result<f32, String> {
    let zoom: f32 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid zoom factor: {}", s))?;

    if !zoom.is_finite() || zoom <= 0.0 {
        return Err(format!("Zoom factor must be positive, got: {}", s));
    }
    if zoom > MAX_ZOOM {
        return Err(format!("Zoom factor must be at most {}, got: {}", MAX_ZOOM, s));
    }

    Ok(zoom)
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        let mut config = Config::default();
        if !cli.zoom.is_empty() {
            config.zoom_factors = cli.zoom.clone();
        }
        config.base_sample_width = cli.base_width.clamp(16, 8192);
        config.interval = Duration::from_millis(cli.interval.clamp(1, 1000));
        config
    }

    /// One validated viewport per configured zoom factor.
    pub fn viewports(&self) -> Result<Vec<Viewport>> {
        self.zoom_factors
            .iter()
            .map(|&zoom| Viewport::new(zoom, self.base_sample_width))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zoom() {
        assert_eq!(parse_zoom("4").unwrap(), 4.0);
        assert_eq!(parse_zoom(" 1.5 ").unwrap(), 1.5);
        assert!(parse_zoom("0").is_err());
        assert!(parse_zoom("-2").is_err());
        assert!(parse_zoom("inf").is_err());
        assert!(parse_zoom("65").is_err());
        assert!(parse_zoom("x").is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["twinmag"]).unwrap();
        let config = Config::from_cli(&cli);
        assert_eq!(config.zoom_factors, vec![4.0, 1.0]);
        assert_eq!(config.base_sample_width, 400);
        assert_eq!(config.interval, Duration::from_millis(10));
        assert_eq!(cli.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_zoom_list() {
        let cli = Cli::try_parse_from(["twinmag", "-z", "2,8,1.5"]).unwrap();
        let config = Config::from_cli(&cli);
        assert_eq!(config.zoom_factors, vec![2.0, 8.0, 1.5]);

        let viewports = config.viewports().unwrap();
        assert_eq!(viewports.len(), 3);
        assert_eq!(viewports[1].zoom_factor(), 8.0);

        assert!(Cli::try_parse_from(["twinmag", "--zoom", "2,0"]).is_err());
    }

    #[test]
    fn test_clamping() {
        let cli = Cli::try_parse_from(["twinmag", "-i", "0", "-b", "1"]).unwrap();
        let config = Config::from_cli(&cli);
        assert_eq!(config.interval, Duration::from_millis(1));
        assert_eq!(config.base_sample_width, 16);
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["twinmag", "-v"]).unwrap();
        assert_eq!(cli.log_level(), log::LevelFilter::Trace);
        let cli = Cli::try_parse_from(["twinmag", "-q", "-v"]).unwrap();
        assert_eq!(cli.log_level(), log::LevelFilter::Error);
    }
}
