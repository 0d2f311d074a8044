use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use sse::keepalive::{KeepaliveMode, DEFAULT_KEEPALIVE_INTERVAL_SECS};
use sse::registry::DEFAULT_DISCONNECTION_GRACE_MS;
use sse::EngineSettings;

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: String,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Milliseconds a superseded or refused connection is given to
    /// disconnect itself before it is force-closed
    #[arg(long, env, default_value_t = DEFAULT_DISCONNECTION_GRACE_MS)]
    pub disconnection_grace_ms: u64,

    /// Seconds between keepalive comment frames
    #[arg(long, env, default_value_t = DEFAULT_KEEPALIVE_INTERVAL_SECS)]
    pub keepalive_interval_secs: u64,

    /// When the keepalive loop should run
    #[arg(
        long,
        env,
        default_value_t = KeepaliveMode::Always,
        value_parser = clap::builder::PossibleValuesParser::new(["always", "behind-proxy", "never"])
            .map(|s| s.parse::<KeepaliveMode>().unwrap()),
    )]
    pub keepalive_mode: KeepaliveMode,

    /// Whether a reverse-proxy manager sits in front of this process
    /// (consulted when keepalive mode is behind-proxy)
    #[arg(long, env)]
    pub behind_proxy: bool,

    /// Reconnect interval in milliseconds advertised to newly admitted
    /// connections; clients use their own default when unset
    #[arg(long, env)]
    pub default_reconnect_interval_ms: Option<u64>,

    /// Seconds the shutdown sequence waits for the keepalive loop to wind
    /// down before proceeding anyway
    #[arg(long, env, default_value_t = 5)]
    pub shutdown_deadline_secs: u64,

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

    /// The engine settings this configuration describes.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            disconnection_grace_ms: self.disconnection_grace_ms,
            keepalive_interval_secs: self.keepalive_interval_secs,
            keepalive_mode: self.keepalive_mode,
            behind_proxy: self.behind_proxy,
            default_reconnect_interval_ms: self.default_reconnect_interval_ms,
        }
    }
}
