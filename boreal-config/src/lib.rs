use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "BOREAL_LOG_LEVEL", default = "info")]
    pub log_level: String,

    #[envconfig(from = "BOREAL_DATABASE_URL", default = "postgres://localhost/boreal")]
    pub database_url: String,
    #[envconfig(from = "BOREAL_DATABASE_MAX_CONNECTIONS", default = "8")]
    pub database_max_connections: u32,
    /// Statement timeout applied to every index statement, in milliseconds.
    /// Unset means no timeout.
    #[envconfig(from = "BOREAL_STATEMENT_TIMEOUT_MS")]
    pub statement_timeout_ms: Option<u64>,

    /// When true, blobs go to S3 (credentials and endpoint from the
    /// standard AWS environment variables); otherwise a local directory.
    #[envconfig(from = "BOREAL_S3_BLOBS", default = "false")]
    pub s3_blobs: bool,
    #[envconfig(from = "BOREAL_S3_BUCKET")]
    pub s3_bucket: Option<String>,
    #[envconfig(from = "BOREAL_BLOB_DIR", default = "./data/blobs")]
    pub blob_dir: String,

    /// Records per partition buffer before the ingestor flushes.
    #[envconfig(from = "BOREAL_FLUSH_THRESHOLD", default = "1000")]
    pub flush_threshold: usize,
    /// Seconds a partition buffer may sit idle before the sweep flushes it.
    #[envconfig(from = "BOREAL_IDLE_TIMEOUT_SECS", default = "300")]
    pub idle_timeout_secs: u64,
    /// Seconds one broker poll may block.
    #[envconfig(from = "BOREAL_POLL_TIMEOUT_SECS", default = "5")]
    pub poll_timeout_secs: u64,

    /// Records per exported result chunk.
    #[envconfig(from = "BOREAL_EXPORT_CHUNK_SIZE", default = "1000")]
    pub export_chunk_size: usize,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
}
