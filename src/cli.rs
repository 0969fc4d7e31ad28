use std::env;
use std::path::PathBuf;

/// Default level when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default REST API port.
pub const DEFAULT_API_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub log_level: String,
    /// `Some` only when `--api-port` was given.
    pub api_port: Option<u16>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            config: None,
            seed: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            api_port: None,
        }
    }
}

/// What the binary should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliOptions),
    Help,
}

pub fn parse_args() -> Result<Command, String> {
    parse_args_from(env::args().skip(1).collect())
}

pub fn parse_args_from(args: Vec<String>) -> Result<Command, String> {
    let mut opts = CliOptions::default();
    let mut i = 0usize;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--config" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --config (expected a TOML file path)")?;
                if opts.config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--seed" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --seed (expected a u64)")?;
                let seed = raw
                    .parse::<u64>()
                    .map_err(|e| format!("invalid --seed value \"{raw}\": {e}"))?;
                opts.seed = Some(seed);
            }
            "--log-level" => {
                i += 1;
                let level = args.next_or_err(i, "missing value for --log-level (expected e.g. info, debug)")?;
                opts.log_level = level.to_string();
            }
            "--api-port" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --api-port (expected a u16)")?;
                let port = raw
                    .parse::<u16>()
                    .map_err(|e| format!("invalid --api-port value \"{raw}\": {e}"))?;
                opts.api_port = Some(port);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(Command::Run(opts))
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("ess-modbus-sim: Modbus TCP simulator for two PV inverters and a battery rack");
    eprintln!();
    eprintln!("Usage: ess-modbus-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>       Load configuration from a TOML file");
    eprintln!("  --seed <u64>          Seed every random source (overrides the config)");
    eprintln!("  --log-level <level>   Default log level (default: info; RUST_LOG wins)");
    eprintln!("  --api-port <u16>      Serve the snapshot REST API on this port (api feature)");
    eprintln!("  --help                Show this help message");
}
