use anyhow::Result;
use muse::bin_common::{
    config_path_from_args, parse_args, BinaryRunner, ConfigType, RunConfig,
};
use muse::muse_gateway::{
    init_tracing, CreateMessage, DispatchRouter, Gateway, GatewayConfig, GatewayError, RestClient,
    ShutdownManager,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{error, info, warn};

struct MuseApp {
    run_config: RunConfig,
    gateway: Gateway<DispatchRouter>,
    shutdown: ShutdownManager,
    messages_seen: Rc<Cell<u64>>,
}

impl BinaryRunner for MuseApp {
    fn run(&mut self) -> Result<()> {
        let result = self.gateway.run(&self.shutdown.flag());
        self.gateway.shutdown();

        match result {
            Err(GatewayError::SessionRejected(reason)) => {
                error!("Gateway refused the session: {}", reason);
                Err(GatewayError::SessionRejected(reason).into())
            }
            other => Ok(other?),
        }
    }

    fn config(&self) -> &RunConfig {
        &self.run_config
    }

    fn stats(&self) -> Option<String> {
        Some(format!("Messages seen: {}", self.messages_seen.get()))
    }
}

fn build_router(config: &GatewayConfig, messages_seen: Rc<Cell<u64>>) -> DispatchRouter {
    let rest = RestClient::new(&config.gateway.api_url, &config.token);
    let own_id: Rc<RefCell<Option<String>>> = Rc::default();
    let ready_id = own_id.clone();

    let router: DispatchRouter = DispatchRouter::new();
    router
        .on("READY", move |_, data| {
            let user = data["user"]["id"].as_str().map(str::to_string);
            info!(
                "Ready as {} (session {})",
                user.as_deref().unwrap_or("unknown"),
                data["session_id"].as_str().unwrap_or_default()
            );
            *ready_id.borrow_mut() = user;
        })
        .on("RESUMED", |_, _| {
            info!("Session resumed");
        })
        .on("MESSAGE_CREATE", move |transport, data| {
            messages_seen.set(messages_seen.get() + 1);

            let author = data["author"]["id"].as_str();
            if author.is_none() || author == own_id.borrow().as_deref() {
                return;
            }
            let (Some(content), Some(channel_id)) =
                (data["content"].as_str(), data["channel_id"].as_str())
            else {
                return;
            };

            if content.trim() == "!ping" {
                info!("Ping from {} in {}", author.unwrap_or_default(), channel_id);
                let sent = rest.send_message(
                    transport,
                    channel_id,
                    &CreateMessage::text("pong"),
                    |_, response| {
                        if !response.is_success() {
                            warn!(
                                "Reply failed (status {}): {}",
                                response.status,
                                response.text()
                            );
                        }
                    },
                );
                if let Err(e) = sent {
                    warn!("Could not send reply: {}", e);
                }
            }
        })
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = parse_args();
    let config_path = config_path_from_args(&args, ConfigType::Gateway);
    let config = GatewayConfig::load(&config_path)?;

    init_tracing(&config.log_level);
    config.log();

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler()?;

    let messages_seen = Rc::new(Cell::new(0));
    let router = build_router(&config, messages_seen.clone());
    let gateway = Gateway::new(&config, router)?;

    let mut app = MuseApp {
        run_config: RunConfig::new("Muse").with_endpoint(config.gateway.url.clone()),
        gateway,
        shutdown,
        messages_seen,
    };
    app.execute()
}
