//! The gateway loop: one transport tick, then one session tick

use crate::domain::ConnectionProperties;
use crate::error::{GatewayError, Result};
use crate::infrastructure::GatewayConfig;
use crate::session::{DispatchHandler, GatewaySession};
use muse_transport::{Transport, WsHandler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct Gateway<H> {
    transport: Transport,
    session: GatewaySession,
    handler: H,
    poll_timeout: Duration,
}

impl<H: DispatchHandler<Transport>> Gateway<H> {
    pub fn new(config: &GatewayConfig, handler: H) -> Result<Self> {
        config.validate()?;

        let transport = Transport::new(config.transport_config())?;
        let properties =
            ConnectionProperties::current(&config.identity.browser, &config.identity.device);
        let session = GatewaySession::new(
            config.token.clone(),
            config.gateway.intents,
            properties,
            config.gateway.url.clone(),
        )
        .with_reconnect_interval(config.reconnect_interval());

        Ok(Self::from_parts(transport, session, handler, config.poll_timeout()))
    }

    pub fn from_parts(
        transport: Transport,
        session: GatewaySession,
        handler: H,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            handler,
            poll_timeout,
        }
    }

    pub fn session(&self) -> &GatewaySession {
        &self.session
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// One reactor tick followed by reconnect and heartbeat checks.
    pub fn tick(&mut self) -> Result<()> {
        let mut hooks = SessionHooks {
            session: &mut self.session,
            handler: &mut self.handler,
        };
        self.transport.poll(&mut hooks, self.poll_timeout)?;
        self.session.tick(&mut self.transport, Instant::now());
        Ok(())
    }

    /// Tick until `keep_running` clears or the session halts.
    ///
    /// Returns `SessionRejected` when the gateway refused our Identify.
    pub fn run(&mut self, keep_running: &AtomicBool) -> Result<()> {
        info!("Gateway loop starting ({})", self.session.gateway_url());

        while keep_running.load(Ordering::Acquire) && self.session.is_running() {
            self.tick()?;
        }

        if !self.session.is_running() {
            return Err(GatewayError::SessionRejected(
                "invalid session before any session was established".to_string(),
            ));
        }

        info!("Gateway loop stopped");
        Ok(())
    }

    /// Close the link and abandon in-flight requests.
    pub fn shutdown(&mut self) {
        self.transport.shutdown();
    }
}

/// Splits the gateway's borrows so the transport can call back into the
/// session and handler during `poll`
struct SessionHooks<'a, H> {
    session: &'a mut GatewaySession,
    handler: &'a mut H,
}

impl<H: DispatchHandler<Transport>> WsHandler for SessionHooks<'_, H> {
    fn on_connect(&mut self, transport: &mut Transport) {
        info!("Gateway connected");
        self.handler.on_connect(transport);
    }

    fn on_disconnect(&mut self, transport: &mut Transport) {
        warn!("Gateway disconnected");
        self.handler.on_disconnect(transport);
    }

    fn on_message(&mut self, transport: &mut Transport, message: &[u8]) {
        if let Some(dispatch) = self.session.handle_message(transport, message, Instant::now()) {
            self.handler
                .on_dispatch(transport, &dispatch.event, &dispatch.data);
        }
    }
}
