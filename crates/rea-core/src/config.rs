use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_FLATFOX_API_URL: &str = "https://flatfox.ch/api/v1/public-listing/";

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Empty means every Telegram user may manage their own alerts.
    pub telegram_allowed_users: Vec<i64>,

    // Storage
    pub data_dir: PathBuf,

    // Flatfox
    pub flatfox_api_url: String,
    pub flatfox_state: String,
    pub flatfox_page_size: usize,

    // Cycle
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub max_listings_per_shape: usize,
    pub max_concurrent_fetches: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_str = |key: &str| get(key).and_then(non_empty);

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"))?;

        let data_dir = PathBuf::from(env_str("REA_DATA_DIR").unwrap_or_else(|| "./data".into()));

        let flatfox_api_url =
            env_str("FLATFOX_API_URL").unwrap_or_else(|| DEFAULT_FLATFOX_API_URL.to_string());
        let flatfox_state = env_str("FLATFOX_STATE")
            .unwrap_or_else(|| "TI".to_string())
            .trim()
            .to_ascii_uppercase();
        let flatfox_page_size = positive("FLATFOX_PAGE_SIZE", env_str("FLATFOX_PAGE_SIZE"), 100)?;

        let poll_interval = Duration::from_secs(positive(
            "POLL_INTERVAL_SECS",
            env_str("POLL_INTERVAL_SECS"),
            3600,
        )?);
        let fetch_timeout = Duration::from_secs(positive(
            "FETCH_TIMEOUT_SECS",
            env_str("FETCH_TIMEOUT_SECS"),
            10,
        )?);
        let max_listings_per_shape = positive(
            "MAX_LISTINGS_PER_SHAPE",
            env_str("MAX_LISTINGS_PER_SHAPE"),
            50,
        )?;
        let max_concurrent_fetches = positive(
            "MAX_CONCURRENT_FETCHES",
            env_str("MAX_CONCURRENT_FETCHES"),
            4,
        )?;

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            data_dir,
            flatfox_api_url,
            flatfox_state,
            flatfox_page_size,
            poll_interval,
            fetch_timeout,
            max_listings_per_shape,
            max_concurrent_fetches,
        })
    }

    pub fn alerts_path(&self) -> PathBuf {
        self.data_dir.join("alerts.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("notified.jsonl")
    }

    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.telegram_allowed_users.is_empty() || self.telegram_allowed_users.contains(&user_id)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }

        env::set_var(key, val);
    }
}

/// Parse a strictly positive integer, falling back to `default` when unset.
fn positive<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} must be a positive integer, got {raw:?}")))?;
    if value == T::default() {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn parse_csv_i64(v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!("TELEGRAM_ALLOWED_USERS: {s:?} is not a user id"))
            })
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
