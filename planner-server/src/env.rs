use once_cell::sync::Lazy;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroize;

pub static CONF: Lazy<Config> = Lazy::new(|| Config::from_env().expect("Failed to load config"));

const THROTTLE_STORE_VAR: &str = "PLANNER_THROTTLE_STORE";
const THROTTLE_RECORD_RETENTION_DAYS_VAR: &str = "PLANNER_THROTTLE_RECORD_RETENTION_DAYS";
const MEMORY_STORE_PRUNE_FREQUENCY_SECS_VAR: &str = "PLANNER_MEMORY_STORE_PRUNE_FREQUENCY_SECS";

const DB_USERNAME_VAR: &str = "PLANNER_DB_USERNAME";
const DB_PASSWORD_VAR: &str = "PLANNER_DB_PASSWORD";
const DB_HOSTNAME_VAR: &str = "PLANNER_DB_HOSTNAME";
const DB_PORT_VAR: &str = "PLANNER_DB_PORT";
const DB_NAME_VAR: &str = "PLANNER_DB_NAME";
const DB_MAX_CONNECTIONS_VAR: &str = "PLANNER_DB_MAX_CONNECTIONS";
const DB_IDLE_TIMEOUT_SECS_VAR: &str = "PLANNER_DB_IDLE_TIMEOUT_SECS";

const IP_THROTTLE_MAX_ATTEMPTS_VAR: &str = "PLANNER_IP_THROTTLE_MAX_ATTEMPTS";
const IP_THROTTLE_BLOCK_MINS_VAR: &str = "PLANNER_IP_THROTTLE_BLOCK_MINS";
const SPAM_PREVENTION_MAX_ATTEMPTS_VAR: &str = "PLANNER_SPAM_PREVENTION_MAX_ATTEMPTS";
const SPAM_PREVENTION_BLOCK_MINS_VAR: &str = "PLANNER_SPAM_PREVENTION_BLOCK_MINS";

const ACTIX_WORKER_COUNT_VAR: &str = "PLANNER_ACTIX_WORKER_COUNT";
const HEALTH_ENDPOINT_KEY_VAR: &str = "PLANNER_HEALTH_ENDPOINT_KEY";
const THROTTLE_API_KEY_VAR: &str = "PLANNER_THROTTLE_API_KEY";
const LOG_LEVEL_VAR: &str = "PLANNER_LOG_LEVEL";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleStoreBackend {
    Postgres,
    Memory,
}

impl FromStr for ThrottleStoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Zeroize)]
pub struct DbConfig {
    pub db_username: String,
    pub db_password: String,
    pub db_hostname: String,
    pub db_port: u16,
    pub db_name: String,
    #[zeroize(skip)]
    pub db_max_connections: u32,
    #[zeroize(skip)]
    pub db_idle_timeout: Duration,
}

impl DbConfig {
    pub fn database_uri(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_username, self.db_password, self.db_hostname, self.db_port, self.db_name,
        )
    }
}

#[derive(Zeroize)]
pub struct ConfigInner {
    #[zeroize(skip)]
    pub throttle_store: ThrottleStoreBackend,
    /// `None` when the throttle store is not backed by Postgres.
    pub db: Option<DbConfig>,

    /// Only used with the in-memory store. The job scheduler prunes the Postgres store.
    #[zeroize(skip)]
    pub memory_store_retention: Duration,
    #[zeroize(skip)]
    pub memory_store_prune_frequency: Duration,

    #[zeroize(skip)]
    pub ip_throttle_max_attempts: i32,
    #[zeroize(skip)]
    pub ip_throttle_block_duration: Duration,
    #[zeroize(skip)]
    pub spam_prevention_max_attempts: i32,
    #[zeroize(skip)]
    pub spam_prevention_block_duration: Duration,

    #[zeroize(skip)]
    pub actix_worker_count: usize,

    pub health_endpoint_key: String,
    pub throttle_api_key: String,

    #[zeroize(skip)]
    pub log_level: String,
}

pub struct Config {
    inner: UnsafeCell<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        // Safe as long as `unsafe Config::zeroize()` hasn't been called
        unsafe { &*self.inner.get() }
    }
}

// Safe to be shared across threads as long as `unsafe Config::zeroize()` hasn't been called
unsafe impl Sync for Config {}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let throttle_store = match std::env::var(THROTTLE_STORE_VAR) {
            Ok(s) => s
                .parse()
                .map_err(|_| ConfigError::invalid(THROTTLE_STORE_VAR))?,
            Err(_) => ThrottleStoreBackend::Postgres,
        };

        let db = match throttle_store {
            ThrottleStoreBackend::Postgres => Some(DbConfig {
                db_username: env_var(DB_USERNAME_VAR)?,
                db_password: env_var(DB_PASSWORD_VAR)?,
                db_hostname: env_var(DB_HOSTNAME_VAR)?,
                db_port: env_var(DB_PORT_VAR)?,
                db_name: env_var(DB_NAME_VAR)?,
                db_max_connections: env_var_or(DB_MAX_CONNECTIONS_VAR, 48),
                db_idle_timeout: Duration::from_secs(env_var_or(DB_IDLE_TIMEOUT_SECS_VAR, 30)),
            }),
            ThrottleStoreBackend::Memory => None,
        };

        let ip_throttle_max_attempts = env_var_or(IP_THROTTLE_MAX_ATTEMPTS_VAR, 5);
        let spam_prevention_max_attempts = env_var_or(SPAM_PREVENTION_MAX_ATTEMPTS_VAR, 5);

        if ip_throttle_max_attempts < 1 {
            return Err(ConfigError::invalid(IP_THROTTLE_MAX_ATTEMPTS_VAR));
        }

        if spam_prevention_max_attempts < 1 {
            return Err(ConfigError::invalid(SPAM_PREVENTION_MAX_ATTEMPTS_VAR));
        }

        let inner = ConfigInner {
            throttle_store,
            db,

            memory_store_retention: Duration::from_secs(
                env_var_or(THROTTLE_RECORD_RETENTION_DAYS_VAR, 7) * 86400,
            ),
            memory_store_prune_frequency: Duration::from_secs(
                env_var_or::<u64>(MEMORY_STORE_PRUNE_FREQUENCY_SECS_VAR, 3600).max(1),
            ),

            ip_throttle_max_attempts,
            ip_throttle_block_duration: Duration::from_secs(
                env_var_or(IP_THROTTLE_BLOCK_MINS_VAR, 15) * 60,
            ),
            spam_prevention_max_attempts,
            spam_prevention_block_duration: Duration::from_secs(
                env_var_or(SPAM_PREVENTION_BLOCK_MINS_VAR, 60) * 60,
            ),

            actix_worker_count: env_var_or(ACTIX_WORKER_COUNT_VAR, num_cpus::get()),

            health_endpoint_key: env_var_or(HEALTH_ENDPOINT_KEY_VAR, String::new()),
            throttle_api_key: env_var_or(THROTTLE_API_KEY_VAR, String::new()),

            log_level: env_var_or(LOG_LEVEL_VAR, String::from("info")),
        };

        Ok(Config {
            inner: UnsafeCell::new(inner),
        })
    }

    /// # Safety
    ///
    /// Safe only if the Config isn't being used by other threads or across an async
    /// boundary. Generally, this should only be used at the end of the main function once
    /// all threads have been joined.
    pub unsafe fn zeroize(&self) {
        unsafe {
            (*self.inner.get()).zeroize();
        }
    }
}

fn env_var<T: FromStr>(key: &'static str) -> Result<T, ConfigError> {
    let var = std::env::var(key).map_err(|_| ConfigError::missing(key))?;
    let var: T = var.parse().map_err(|_| ConfigError::invalid(key))?;
    Ok(var)
}

fn env_var_or<T: FromStr>(key: &'static str, default: T) -> T {
    let Ok(var) = std::env::var(key) else {
        return default;
    };

    var.parse().unwrap_or(default)
}

#[derive(Clone, Copy, Debug)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidVar(&'static str),
}

impl ConfigError {
    fn missing(var_name: &'static str) -> Self {
        Self::MissingVar(var_name)
    }

    fn invalid(var_name: &'static str) -> Self {
        Self::InvalidVar(var_name)
    }
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVar(key) => write!(f, "Missing environment variable '{}'", key),
            Self::InvalidVar(key) => write!(f, "Environment variable '{}' is invalid", key),
        }
    }
}
