use crate::Transport;

/// Receiver of WebSocket session notifications
///
/// All methods run synchronously inside [`Transport::poll`], and receive the
/// transport back so they can send frames or issue requests.
pub trait WsHandler {
    /// Called once each time the session reaches Open
    fn on_connect(&mut self, _transport: &mut Transport) {}

    /// Called each time the session leaves Connecting or Open
    fn on_disconnect(&mut self, _transport: &mut Transport) {}

    /// Called with each complete, non-empty message
    fn on_message(&mut self, transport: &mut Transport, message: &[u8]);
}
