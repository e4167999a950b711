use crate::error::{Error, Result};
use crate::logger::log;
use crate::mesh::{MeshEvent, MeshSender, RelayEvent};
use crate::peer::types::ParticipantId;
use crate::relay::SignalingRelay;
use crate::signaling::{encode_text, SignalingMessage};
use crate::utils::relay_url_with_id;
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket клиент релея. Участник регистрируется параметром `?id=`.
#[derive(Debug, Clone)]
pub struct WsRelay {
    tx: mpsc::UnboundedSender<Message>,
}

impl WsRelay {
    /// Подключается к релею и запускает задачи чтения и записи.
    /// Входящие кадры и закрытие соединения уходят в `inbox`.
    pub async fn connect(url: &str, id: &ParticipantId, inbox: MeshSender) -> Result<Self> {
        let url = relay_url_with_id(url, id.as_str());
        log(&format!("Connecting to relay: {url}"));

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::RelayUnavailable(format!("failed to connect: {e}")))?;
        log("Connected to relay");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        // Open уходит раньше любого входящего сообщения
        let _ = inbox.send(MeshEvent::Relay(RelayEvent::Open));
        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, inbox));

        Ok(Self { tx })
    }

    /// Закрывает соединение после отправки уже поставленных сообщений
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send relay frame: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        debug!("Relay sender task terminated");
    }

    async fn receiver_task<S>(mut read: S, inbox: MeshSender)
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        let reason = loop {
            let bytes = match read.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(bytes))) => bytes,
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by relay".into());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Relay socket error: {}", e);
                    let _ = inbox.send(MeshEvent::Relay(RelayEvent::Error(e.to_string())));
                    break e.to_string();
                }
                None => break "relay stream ended".into(),
            };
            if inbox.send(MeshEvent::Relay(RelayEvent::Message(bytes))).is_err() {
                // участник завершился
                debug!("Relay receiver task terminated");
                return;
            }
        };

        log(&format!("Relay connection closed: {reason}"));
        let _ = inbox.send(MeshEvent::Relay(RelayEvent::Closed(reason)));
    }
}

impl SignalingRelay for WsRelay {
    fn send(&self, msg: &SignalingMessage) -> Result<()> {
        let text = encode_text(msg)?;
        debug!("-> relay: {}", text);
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::RelayUnavailable("relay connection closed".into()))
    }
}
