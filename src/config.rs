use std::{env, fmt::Display, net::IpAddr, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::classifier::DEFAULT_KEYWORDS;

pub const DEFAULT_WHATSAPP_FROM: &str = "whatsapp:+14155238886";
pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";
pub const DEFAULT_RELAY_URL: &str = "https://api.callmebot.com/whatsapp.php";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Process configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub api_key: Option<String>,
    pub require_api_key: bool,
    pub log_path: PathBuf,
    pub log_codes: bool,
    pub keywords: Vec<String>,
    pub notify_timeout: Option<Duration>,
    pub transport: Transport,
}

/// The one outbound channel this deployment alerts through
#[derive(Debug, Clone)]
pub enum Transport {
    Twilio(TwilioConfig),
    Relay(RelayConfig),
    Clipboard(ClipboardConfig),
}

impl Transport {
    pub fn is_clipboard(&self) -> bool {
        matches!(self, Transport::Clipboard(_))
    }
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: String,
    pub api_base: Url,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: Url,
    pub phone: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct ClipboardConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl ClipboardConfig {
    /// Splits a command line such as `xclip -selection clipboard`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;

        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn platform_default() -> Self {
        let command = if cfg!(target_os = "macos") {
            "pbcopy"
        } else if cfg!(windows) {
            "clip"
        } else {
            "xclip -selection clipboard"
        };

        // non-empty literal always parses
        Self::parse(command).unwrap_or(Self {
            program: command.to_string(),
            args: Vec::new(),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests never have to touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let transport = match env.get("NOTIFIER").as_deref() {
            None => Transport::Twilio(twilio_config(&env)?),
            Some(name) => match name.trim().to_lowercase().as_str() {
                "twilio" | "whatsapp" => Transport::Twilio(twilio_config(&env)?),
                "relay" | "callmebot" => Transport::Relay(relay_config(&env)?),
                "clipboard" => Transport::Clipboard(clipboard_config(&env)?),
                other => {
                    return Err(ConfigError::Invalid {
                        key: "NOTIFIER",
                        reason: format!("unknown transport '{other}'"),
                    })
                }
            },
        };

        let require_api_key = env.flag("REQUIRE_API_KEY", true)?;
        let api_key = env.get("API_KEY");
        if require_api_key && api_key.is_none() {
            return Err(ConfigError::Missing("API_KEY"));
        }

        let keywords = match env.get("KEYWORDS") {
            Some(list) => list
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            None => Vec::new(),
        };
        let keywords = if keywords.is_empty() {
            DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
        } else {
            keywords
        };

        let notify_timeout = match env.get("NOTIFY_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("NOTIFY_TIMEOUT_SECS", &raw)?)),
            None => None,
        };

        let log_codes = env.flag("LOG_CODES", transport.is_clipboard())?;

        Ok(Self {
            host: env.parse_or("HOST", "0.0.0.0")?,
            port: env.parse_or("PORT", "10000")?,
            api_key,
            require_api_key,
            log_path: PathBuf::from(env.get_or("LOG_FILE", "captions_log.txt")),
            log_codes,
            keywords,
            notify_timeout,
            transport,
        })
    }
}

fn twilio_config<F>(env: &Env<F>) -> Result<TwilioConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(TwilioConfig {
        account_sid: env.required("TWILIO_SID")?,
        auth_token: env.required("TWILIO_AUTH")?,
        from: env.get_or("WHATSAPP_FROM", DEFAULT_WHATSAPP_FROM),
        to: env.required("WHATSAPP_TO")?,
        api_base: env.parse_or("TWILIO_API_BASE", DEFAULT_TWILIO_API_BASE)?,
    })
}

fn relay_config<F>(env: &Env<F>) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(RelayConfig {
        url: env.parse_or("RELAY_URL", DEFAULT_RELAY_URL)?,
        phone: env.required("RELAY_PHONE")?,
        api_key: env.required("RELAY_API_KEY")?,
    })
}

fn clipboard_config<F>(env: &Env<F>) -> Result<ClipboardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env.get("CLIPBOARD_COMMAND") {
        Some(command) => ClipboardConfig::parse(&command).ok_or(ConfigError::Invalid {
            key: "CLIPBOARD_COMMAND",
            reason: "empty command".to_string(),
        }),
        None => Ok(ClipboardConfig::platform_default()),
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse_value(key, &self.get_or(key, default))
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => {
                    warn!("Invalid {key} value: {raw}");
                    Err(ConfigError::Invalid {
                        key,
                        reason: format!("expected a boolean, got '{raw}'"),
                    })
                }
            },
        }
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}
