use atlas_common::{env_flag, env_or, env_string_or};

pub const DEFAULT_PORT: u16 = 13027;
pub const DEFAULT_MONGODB_URL: &str = "mongodb://localhost:27017/test?retryWrites=true&w=majority";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 100 * 1024;

#[derive(Clone, Debug)]
pub struct EventLogConfig {
    pub port: u16,
    pub mongo: MongoSettings,
    pub body_limit: usize,
    pub error_status: ErrorStatusMode,
}

#[derive(Clone, Debug)]
pub struct MongoSettings {
    pub url: String,
    /// Used only when the URL does not name a database.
    pub database: String,
    pub collection: String,
    pub app_name: String,
}

/// Status code policy for failed ingestions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorStatusMode {
    /// 400 for validation failures, 503 for store failures.
    Corrected,
    /// Error bodies go out with 200, as older device firmware expects.
    Legacy,
}

impl EventLogConfig {
    pub fn from_env() -> Self {
        let error_status = if env_flag("LEGACY_ERROR_STATUS", false) {
            ErrorStatusMode::Legacy
        } else {
            ErrorStatusMode::Corrected
        };

        Self {
            port: env_or("PORT", DEFAULT_PORT),
            mongo: MongoSettings {
                url: env_string_or("MONGODB_URL", DEFAULT_MONGODB_URL),
                database: env_string_or("MONGODB_DATABASE", "test"),
                collection: env_string_or("MONGODB_COLLECTION", "evententries"),
                app_name: env_string_or("MONGODB_APP_NAME", "event-log-service"),
            },
            body_limit: env_or("BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT_BYTES),
            error_status,
        }
    }
}
