// Релеи: websocket клиент и хаб в памяти процесса

pub mod local;
pub mod ws;

pub use local::{LocalRelay, LocalRelayEndpoint};
pub use ws::WsRelay;

use crate::error::Result;
use crate::signaling::SignalingMessage;

/// Исходящая сторона релея. Входящие сообщения и жизненный цикл
/// соединения приходят в очередь участника как `RelayEvent`.
pub trait SignalingRelay: Send + Sync {
    /// Ставит сообщение в очередь на отправку, не дожидаясь доставки
    fn send(&self, msg: &SignalingMessage) -> Result<()>;
}
