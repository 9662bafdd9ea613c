// src/config.rs

use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,

    /// Endpoint of the external free-text grading service.
    pub grader_url: String,
    pub grader_api_key: Option<String>,
    pub grader_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86400);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let grader_url = env::var("GRADER_URL").expect("GRADER_URL must be set");

        let grader_api_key = env::var("GRADER_API_KEY").ok();

        let grader_timeout_secs = env::var("GRADER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            grader_url,
            grader_api_key,
            grader_timeout_secs,
        }
    }
}
