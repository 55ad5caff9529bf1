use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of pending events a session's outbox holds before collapsing.
pub const DEFAULT_OUTBOX_DEPTH: usize = 10;

/// Default number of pending state messages per connection before collapsing.
pub const DEFAULT_STATE_LANE_DEPTH: usize = 32;

/// Default upper bound for one inbound frame, in bytes.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4100)]
    pub port: u16,

    /// Path of the JSON document holding registered users. When omitted, users
    /// live in memory only and are lost on restart.
    #[arg(short, long, env)]
    store_path: Option<PathBuf>,

    /// Number of undelivered events a session may accumulate before its queue
    /// collapses into a single full-state snapshot
    #[arg(long, env, default_value_t = DEFAULT_OUTBOX_DEPTH)]
    pub outbox_depth: usize,

    /// Number of undelivered state messages a connection may accumulate before
    /// they collapse into a single full-state message
    #[arg(long, env, default_value_t = DEFAULT_STATE_LANE_DEPTH)]
    pub state_lane_depth: usize,

    /// Largest inbound frame accepted from a client, in bytes
    #[arg(long, env, default_value_t = DEFAULT_MAX_FRAME_LENGTH)]
    pub max_frame_length: usize,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    /// The `interface:port` pair the server binds to.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.interface(), self.port)
    }

    pub fn set_store_path(mut self, store_path: PathBuf) -> Self {
        self.store_path = Some(store_path);
        self
    }

    pub fn store_path(&self) -> Option<&PathBuf> {
        self.store_path.as_ref()
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }

    /// Internal-consistency faults abort the process only in development.
    pub fn panic_on_invariant_violation(&self) -> bool {
        self.runtime_env() == RustEnv::Development
    }
}
