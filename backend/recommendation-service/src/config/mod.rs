use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub llm: LlmConfig,
    pub models: ModelConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: String,
    pub audience: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: String,
}

/// Flat shape `envy` deserializes straight from the process environment
/// (one field per var, spec §6); `Config` below groups it for call sites.
#[derive(Debug, Clone, Deserialize)]
struct EnvConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_database_url")]
    database_url: String,
    #[serde(default = "default_db_pool_min")]
    db_pool_min: u32,
    #[serde(default = "default_db_pool_max")]
    db_pool_max: u32,
    #[serde(default = "default_redis_host")]
    redis_host: String,
    #[serde(default = "default_redis_port")]
    redis_port: u16,
    #[serde(default = "default_redis_db")]
    redis_db: i64,
    #[serde(default = "default_jwt_secret")]
    jwt_secret: String,
    #[serde(default = "default_jwt_algorithm")]
    jwt_algorithm: String,
    #[serde(default = "default_jwt_audience")]
    jwt_audience: String,
    #[serde(default = "default_ai_enabled")]
    ai_enabled: bool,
    #[serde(default)]
    openai_api_key: String,
    #[serde(default = "default_openai_model")]
    openai_model: String,
    #[serde(default = "default_openai_max_tokens")]
    openai_max_tokens: u32,
    #[serde(default = "default_openai_timeout")]
    openai_timeout: u64,
    #[serde(default = "default_openai_temperature")]
    openai_temperature: f32,
    #[serde(default = "default_model_path")]
    model_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_url() -> String {
    "postgres://localhost/marketplace".to_string()
}
fn default_db_pool_min() -> u32 {
    2
}
fn default_db_pool_max() -> u32 {
    10
}
fn default_redis_host() -> String {
    "localhost".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_redis_db() -> i64 {
    0
}
fn default_jwt_secret() -> String {
    "dev-secret".to_string()
}
fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}
fn default_jwt_audience() -> String {
    "marketplace-clients".to_string()
}
fn default_ai_enabled() -> bool {
    true
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_max_tokens() -> u32 {
    800
}
fn default_openai_timeout() -> u64 {
    30
}
fn default_openai_temperature() -> f32 {
    0.2
}
fn default_model_path() -> String {
    "trained_models".to_string()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let raw: EnvConfig = envy::from_env()?;

        Ok(Config {
            app: AppConfig { host: raw.host, port: raw.port },
            database: DatabaseConfig {
                url: raw.database_url,
                pool_min: raw.db_pool_min,
                pool_max: raw.db_pool_max,
            },
            redis: RedisConfig {
                host: raw.redis_host,
                port: raw.redis_port,
                db: raw.redis_db,
            },
            jwt: JwtConfig {
                secret: raw.jwt_secret,
                algorithm: raw.jwt_algorithm,
                audience: raw.jwt_audience,
            },
            llm: LlmConfig {
                enabled: raw.ai_enabled,
                api_key: raw.openai_api_key,
                model: raw.openai_model,
                max_tokens: raw.openai_max_tokens,
                timeout_secs: raw.openai_timeout,
                temperature: raw.openai_temperature,
            },
            models: ModelConfig { model_path: raw.model_path },
        })
    }
}
