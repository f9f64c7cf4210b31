//! Consumes session events: updates shared state, logs, relays, and answers
//! `!ping`.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wagw_whatsapp::{ClientEvent, InboundMessage, LoginQr, MessagingAdapter, Poll, SessionState};

use crate::qr;
use crate::relay::WebhookRelay;

pub const PING_COMMAND: &str = "!ping";
pub const PONG_REPLY: &str = "pong";

/// What `!ping` sends and where.
#[derive(Debug, Clone)]
pub struct PingAction {
    pub chat_id: String,
    pub poll: Poll,
}

#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<SessionState>,
    adapter: Arc<dyn MessagingAdapter>,
    relay: WebhookRelay,
    ping: Option<PingAction>,
}

impl Dispatcher {
    pub fn new(
        state: Arc<SessionState>,
        adapter: Arc<dyn MessagingAdapter>,
        relay: WebhookRelay,
        ping: Option<PingAction>,
    ) -> Self {
        Self {
            state,
            adapter,
            relay,
            ping,
        }
    }

    /// Process events until every sender is dropped. Session events are
    /// applied in order; each message is handled on its own task.
    pub async fn run(self, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Event channel closed, dispatcher stopping");
    }

    pub async fn handle_event(&self, event: ClientEvent) {
        self.state.apply(&event).await;

        match event {
            ClientEvent::Qr(qr) => log_qr(&qr),
            ClientEvent::Ready => info!("Client is ready!"),
            ClientEvent::Disconnected(reason) => warn!(%reason, "Client disconnected"),
            ClientEvent::Message(message) => {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.handle_message(message).await });
            }
        }
    }

    /// Media download, relay and `!ping` for one message.
    pub async fn handle_message(&self, message: InboundMessage) {
        info!(
            id = %message.key.id,
            from = %message.from,
            to = message.to.as_deref().unwrap_or(""),
            from_me = message.from_me(),
            message_type = %message.message_type,
            body = %message.body,
            "Message received"
        );

        if message.has_media {
            match self.adapter.download_media(&message).await {
                Ok(Some(media)) => info!(
                    mimetype = %media.mimetype,
                    filename = media.filename.as_deref().unwrap_or(""),
                    "Media downloaded successfully"
                ),
                Ok(None) => warn!(id = %message.key.id, "Failed to download media"),
                Err(e) => error!(id = %message.key.id, "Error downloading media: {}", e),
            }
        }

        if self.relay.should_relay(&message) {
            self.relay.forward(&message).await;
        }

        if message.body == PING_COMMAND {
            if let Some(ping) = &self.ping {
                self.answer_ping(ping, &message).await;
            }
        }
    }

    async fn answer_ping(&self, ping: &PingAction, message: &InboundMessage) {
        if let Err(e) = self.adapter.send_poll(&ping.chat_id, &ping.poll).await {
            error!(chat_id = %ping.chat_id, "Failed to send poll: {}", e);
            return;
        }
        if let Err(e) = self.adapter.reply(message, PONG_REPLY).await {
            error!("Failed to reply to !ping: {}", e);
        }
        if let Err(e) = self.adapter.send_text(&ping.chat_id, PONG_REPLY).await {
            error!(chat_id = %ping.chat_id, "Failed to send pong: {}", e);
        }
    }
}

fn log_qr(qr: &LoginQr) {
    let Some(code) = qr.code.as_deref() else {
        info!("QR RECEIVED as an image only, open /qrcode to scan it");
        return;
    };
    match qr::render_terminal(code) {
        Ok(block) => info!("QR RECEIVED, scan it with WhatsApp:\n{}", block),
        Err(e) => warn!("QR RECEIVED but could not be rendered: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use chrono::Utc;
    use wagw_whatsapp::{MessageKey, MockMessagingAdapter, SentMessage, WhatsAppError};

    const GROUP: &str = "120363401688020574@g.us";

    fn sent() -> SentMessage {
        SentMessage {
            key: MessageKey {
                remote_jid: GROUP.into(),
                from_me: true,
                id: "OUT".into(),
                participant: None,
            },
            timestamp: None,
        }
    }

    fn inbound(from: &str, body: &str, has_media: bool) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: from.into(),
                from_me: false,
                id: "IN".into(),
                participant: None,
            },
            from: from.into(),
            to: None,
            body: body.into(),
            message_type: "conversation".into(),
            has_media,
            push_name: None,
            timestamp: Utc::now(),
        }
    }

    fn ping_action() -> PingAction {
        PingAction {
            chat_id: GROUP.into(),
            poll: Poll {
                question: "Q?".into(),
                options: vec!["a".into(), "b".into()],
                allow_multiple_answers: false,
            },
        }
    }

    fn dispatcher(mock: MockMessagingAdapter, state: Arc<SessionState>) -> Dispatcher {
        let relay = WebhookRelay::new(
            &RelayConfig {
                enabled: false,
                ..Default::default()
            },
            reqwest::Client::new(),
        );
        Dispatcher::new(state, Arc::new(mock), relay, Some(ping_action()))
    }

    #[tokio::test]
    async fn test_events_update_state() {
        let state = Arc::new(SessionState::new());
        let d = dispatcher(MockMessagingAdapter::new(), state.clone());

        d.handle_event(ClientEvent::Qr(LoginQr::from_code("2@abc")))
            .await;
        assert_eq!(state.latest_qr().await.unwrap().payload(), "2@abc");

        d.handle_event(ClientEvent::Ready).await;
        assert!(state.is_ready());
        assert!(state.latest_qr().await.is_none());
    }

    #[tokio::test]
    async fn test_ping_sends_poll_reply_and_pong() {
        let mut mock = MockMessagingAdapter::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_send_poll()
            .withf(|chat, poll| chat == GROUP && poll.question == "Q?")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(sent()));
        mock.expect_reply()
            .withf(|msg, text| msg.key.id == "IN" && text == "pong")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(sent()));
        mock.expect_send_text()
            .withf(|chat, text| chat == GROUP && text == "pong")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(sent()));

        let d = dispatcher(mock, Arc::new(SessionState::new()));
        d.handle_message(inbound("5511@c.us", "!ping", false)).await;
    }

    #[tokio::test]
    async fn test_ping_stops_when_poll_fails() {
        let mut mock = MockMessagingAdapter::new();
        mock.expect_send_poll()
            .times(1)
            .returning(|_, _| Err(WhatsAppError::not_ready()));
        mock.expect_reply().times(0);
        mock.expect_send_text().times(0);

        let d = dispatcher(mock, Arc::new(SessionState::new()));
        d.handle_message(inbound(GROUP, "!ping", false)).await;
    }

    #[tokio::test]
    async fn test_ping_disabled() {
        let mut mock = MockMessagingAdapter::new();
        mock.expect_send_poll().times(0);

        let relay = WebhookRelay::new(&RelayConfig::default(), reqwest::Client::new());
        let d = Dispatcher::new(Arc::new(SessionState::new()), Arc::new(mock), relay, None);
        d.handle_message(inbound("5511@c.us", "!ping", false)).await;
    }

    #[tokio::test]
    async fn test_media_is_downloaded() {
        let mut mock = MockMessagingAdapter::new();
        mock.expect_download_media()
            .withf(|msg| msg.key.id == "IN")
            .times(1)
            .returning(|_| {
                Ok(Some(wagw_whatsapp::MessageMedia::new(
                    "image/png",
                    "aGVsbG8=",
                    Some("a.png".into()),
                )))
            });

        let d = dispatcher(mock, Arc::new(SessionState::new()));
        d.handle_message(inbound("5511@c.us", "", true)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_download_does_not_hold_back_ready() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let mut mock = MockMessagingAdapter::new();
        mock.expect_download_media().times(1).returning(move |_| {
            let _ = release_rx.recv_timeout(std::time::Duration::from_secs(5));
            Ok(None)
        });

        let state = Arc::new(SessionState::new());
        let d = dispatcher(mock, state.clone());
        let (tx, rx) = mpsc::channel(4);
        let running = tokio::spawn(d.run(rx));

        tx.send(ClientEvent::Message(inbound("5511@c.us", "", true)))
            .await
            .unwrap();
        tx.send(ClientEvent::Ready).await.unwrap();

        let became_ready = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !state.is_ready() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;
        release_tx.send(()).unwrap();
        assert!(became_ready.is_ok(), "Ready was held back by the download");

        drop(tx);
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let state = Arc::new(SessionState::new());
        let d = dispatcher(MockMessagingAdapter::new(), state.clone());
        let (tx, rx) = mpsc::channel(4);
        tx.send(ClientEvent::Ready).await.unwrap();
        drop(tx);

        d.run(rx).await;
        assert!(state.is_ready());
    }
}
