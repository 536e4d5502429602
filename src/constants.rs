/// Source kinds understood by the `[source] kind` config key
pub const OPENWEATHER_SOURCE: &str = "openweather";
pub const USERS_SOURCE: &str = "users";

pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const USERS_BASE_URL: &str = "https://jsonplaceholder.typicode.com/users";

// Pipeline defaults
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 2_000;
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UNITS: &str = "metric";

// Destination protocols
pub const SQLITE_PROTOCOL: &str = "sqlite";
pub const LIBSQL_PROTOCOL: &str = "libsql";
pub const POSTGRES_PROTOCOL: &str = "postgresql";

/// Columns every destination table carries in addition to the dataset's own.
pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";

// Environment variables read by the binary only
pub const API_KEY_ENV: &str = "ETL_API_KEY";
pub const WEATHER_API_KEY_ENV: &str = "WEATHER_API_KEY";
pub const DB_PASSWORD_ENV: &str = "DB_PASSWORD";
pub const DB_HOST_ENV: &str = "DB_HOST";
pub const DB_PORT_ENV: &str = "DB_PORT";
pub const DB_USER_ENV: &str = "DB_USER";
pub const DB_NAME_ENV: &str = "DB_NAME";

/// Get all supported source kinds
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![OPENWEATHER_SOURCE, USERS_SOURCE]
}

/// Destination protocols compiled into this build
pub fn get_supported_protocols() -> Vec<&'static str> {
    let mut protocols = vec![SQLITE_PROTOCOL];
    if cfg!(feature = "postgres") {
        protocols.push(POSTGRES_PROTOCOL);
    }
    if cfg!(feature = "db") {
        protocols.push(LIBSQL_PROTOCOL);
    }
    protocols
}
