//! Startup and shutdown banners around a blocking main loop

use tracing::info;

const RULE: &str = "========================================";

/// Banner details for a binary
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub name: String,
    /// Gateway URL (or other remote) shown at startup
    pub endpoint: Option<String>,
}

impl RunConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// A binary whose main loop blocks until shutdown
pub trait BinaryRunner {
    fn run(&mut self) -> anyhow::Result<()>;

    fn config(&self) -> &RunConfig;

    /// One-line summary printed after the loop exits
    fn stats(&self) -> Option<String> {
        None
    }

    fn print_banner(&self) {
        let config = self.config();
        info!("{}", RULE);
        info!("{} starting", config.name);
        match &config.endpoint {
            Some(endpoint) => info!("Connecting to {}", endpoint),
            None => info!("No endpoint configured"),
        }
        info!("Ctrl+C or SIGTERM to stop");
        info!("{}", RULE);
    }

    fn print_shutdown(&self, stats: Option<&str>) {
        info!("{}", RULE);
        info!("{} stopped", self.config().name);
        if let Some(stats) = stats {
            info!("{}", stats);
        }
        info!("{}", RULE);
    }

    /// Banner, main loop, shutdown banner; the loop's result is returned as is
    fn execute(&mut self) -> anyhow::Result<()> {
        self.print_banner();
        let result = self.run();
        let stats = self.stats();
        self.print_shutdown(stats.as_deref());
        result
    }
}
