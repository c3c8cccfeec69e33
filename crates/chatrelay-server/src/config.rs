//! Server configuration.

use clap::Parser;
use std::path::PathBuf;

use chatrelay_store::StoreConfig;

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 4000;

/// Default store directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "chatrelay-server")]
#[command(about = "WebSocket relay for live chat updates")]
#[command(version)]
pub struct Args {
    /// Address to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory of the document store
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Use a temporary store, discarded on exit
    #[arg(long, default_value_t = false)]
    pub temporary: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Path to the store directory.
    pub data_path: PathBuf,

    /// Discard the store on exit.
    pub temporary: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl ServerConfig {
    /// Create a configuration storing data under `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_path: data_path.into(),
            temporary: false,
        }
    }

    /// Set the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use a temporary store.
    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Store configuration derived from this server configuration.
    pub fn store_config(&self) -> StoreConfig {
        if self.temporary {
            StoreConfig::temporary()
        } else {
            StoreConfig::new(self.data_path.clone())
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig::new(args.data_dir)
            .with_host(args.host)
            .with_port(args.port)
            .with_temporary(args.temporary)
    }
}
