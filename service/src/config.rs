use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use events::{Channel, Error as ChannelError};
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default channel bridged when none is configured.
pub const DEFAULT_CHANNEL: &str = "salesforce";

/// Suffix appended to a channel name to form its recent-history list key.
pub const DEFAULT_HISTORY_KEY_SUFFIX: &str = "-recent";

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
    /// Sets the Redis URL used for both the pub/sub subscription and the history lists
    #[arg(short, long, env, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// A list of channel names to subscribe to and bridge to streaming clients.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = DEFAULT_CHANNEL
    )]
    stream_channels: Vec<String>,

    /// The channel served by `GET /stream/messages`. Defaults to the first
    /// entry of `stream_channels`, and is always bridged.
    #[arg(long, env)]
    stream_channel: Option<String>,

    /// Suffix appended to a channel name to find its recent-history list in Redis.
    #[arg(long, env, default_value = DEFAULT_HISTORY_KEY_SUFFIX)]
    history_key_suffix: String,

    /// Maximum number of live messages queued for one client before the oldest is dropped
    #[arg(long, env, default_value_t = 32)]
    pub session_queue_capacity: usize,

    /// Consecutive failed subscription attempts tolerated before the fault is escalated
    #[arg(long, env, default_value_t = 10)]
    pub subscription_max_retries: u32,

    /// Initial delay in milliseconds between subscription reconnect attempts
    #[arg(long, env, default_value_t = 1000)]
    subscription_backoff_base_ms: u64,

    /// Upper bound in milliseconds for the delay between reconnect attempts
    #[arg(long, env, default_value_t = 30000)]
    subscription_backoff_max_ms: u64,

    /// Seconds between keep-alive comments on idle streams (0 disables them)
    #[arg(long, env, default_value_t = 15)]
    keep_alive_secs: u64,

    /// Directory served under `/static`
    #[arg(long, env, default_value = "./static")]
    pub static_dir: PathBuf,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 3000)]
    pub port: u16,

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
    short = 'e',
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

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    pub fn history_key_suffix(&self) -> &str {
        &self.history_key_suffix
    }

    /// Every channel to bridge, in configuration order and without duplicates.
    /// The stream channel is included even when it is not listed. Spaces
    /// around list entries (`alerts, deploys`) are ignored; any other
    /// surrounding whitespace makes the name invalid.
    pub fn channels(&self) -> Result<Vec<Channel>, ChannelError> {
        let mut channels: Vec<Channel> = Vec::with_capacity(self.stream_channels.len() + 1);
        let names = self
            .stream_channels
            .iter()
            .chain(self.stream_channel.iter())
            .map(|name| name.trim_matches(' '))
            .filter(|name| !name.is_empty());

        for name in names {
            let channel = Channel::new(name)?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        if channels.is_empty() {
            return Err(ChannelError::invalid_channel(""));
        }
        Ok(channels)
    }

    /// The channel served by `GET /stream/messages`.
    pub fn stream_channel(&self) -> Result<Channel, ChannelError> {
        match &self.stream_channel {
            Some(name) => Channel::new(name.trim_matches(' ')),
            None => self
                .channels()?
                .into_iter()
                .next()
                .ok_or_else(|| ChannelError::invalid_channel("")),
        }
    }

    pub fn subscription_backoff_base(&self) -> Duration {
        Duration::from_millis(self.subscription_backoff_base_ms)
    }

    pub fn subscription_backoff_max(&self) -> Duration {
        Duration::from_millis(self.subscription_backoff_max_ms)
    }

    /// Interval between keep-alive comments, or `None` when disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("stream_bridge").chain(args.iter().copied());
        Config::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_defaults_bridge_the_salesforce_channel() {
        let config = parse(&[]);

        assert_eq!(config.channels().unwrap(), vec![Channel::new("salesforce").unwrap()]);
        assert_eq!(config.stream_channel().unwrap().as_str(), "salesforce");
        assert_eq!(config.history_key_suffix(), "-recent");
        assert_eq!(config.session_queue_capacity, 32);
    }

    #[test]
    fn test_list_spacing_is_ignored_but_control_whitespace_is_rejected() {
        let config = parse(&["--stream-channels", "alerts, deploys"]);
        let names: Vec<String> = config
            .channels()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, vec!["alerts", "deploys"]);

        let config = parse(&["--stream-channels", "alerts\r"]);
        assert!(config.channels().is_err());
    }

    #[test]
    fn test_stream_channel_is_always_bridged() {
        let config = parse(&[
            "--stream-channels",
            "alerts,metrics,alerts",
            "--stream-channel",
            "deploys",
        ]);

        let names: Vec<String> = config
            .channels()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, vec!["alerts", "metrics", "deploys"]);
        assert_eq!(config.stream_channel().unwrap().as_str(), "deploys");
    }

    #[test]
    fn test_stream_channel_defaults_to_first_bridged_channel() {
        let config = parse(&["--stream-channels", "metrics,alerts"]);
        assert_eq!(config.stream_channel().unwrap().as_str(), "metrics");
    }

    #[test]
    fn test_keep_alive_zero_disables_comments() {
        assert_eq!(parse(&["--keep-alive-secs", "0"]).keep_alive(), None);
        assert_eq!(
            parse(&["--keep-alive-secs", "5"]).keep_alive(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_backoff_durations_are_milliseconds() {
        let config = parse(&[
            "--subscription-backoff-base-ms",
            "250",
            "--subscription-backoff-max-ms",
            "4000",
        ]);
        assert_eq!(config.subscription_backoff_base(), Duration::from_millis(250));
        assert_eq!(config.subscription_backoff_max(), Duration::from_secs(4));
    }

    #[test]
    fn test_runtime_env_parses_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<RustEnv>(), Ok(RustEnv::Production));
        assert_eq!("staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
        assert!(parse(&["--runtime-env", "production"]).is_production());
    }
}
