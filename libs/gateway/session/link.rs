use muse_transport::{Transport, TransportError};

/// What the session needs from the connection underneath it
pub trait GatewayLink {
    fn is_open(&self) -> bool;

    /// Start connecting; replaces any existing connection.
    fn open(&mut self, url: &str) -> Result<(), TransportError>;

    fn close(&mut self);

    /// Send one text message.
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
}

impl GatewayLink for Transport {
    fn is_open(&self) -> bool {
        self.is_ws_open()
    }

    fn open(&mut self, url: &str) -> Result<(), TransportError> {
        self.ws_open(url)
    }

    fn close(&mut self) {
        self.ws_close();
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.ws_send(text.as_bytes())
    }
}
