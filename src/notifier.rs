use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode, Url};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    config::{ClipboardConfig, Config, RelayConfig, Transport, TwilioConfig},
    models::{AlertKind, AlertMessage},
};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    #[error("transport responded {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("clipboard command failed: {0}")]
    Clipboard(#[from] std::io::Error),

    #[error("clipboard command exited with {0}")]
    ClipboardExit(std::process::ExitStatus),
}

/// Outcome of one best-effort delivery
#[derive(Debug)]
pub enum Delivery {
    Sent,
    /// The transport has nothing to do for this kind of alert
    Skipped,
    Failed(NotifyError),
}

impl From<Result<(), NotifyError>> for Delivery {
    fn from(result: Result<(), NotifyError>) -> Self {
        match result {
            Ok(()) => Delivery::Sent,
            Err(e) => Delivery::Failed(e),
        }
    }
}

/// A single outbound alert channel.
///
/// `notify` never fails the caller; every transport error comes back as
/// `Delivery::Failed` for the caller to log.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, alert: &AlertMessage) -> Delivery;
}

/// Builds the notifier for the configured transport.
pub fn from_config(config: &Config) -> Result<Arc<dyn Notifier>, reqwest::Error> {
    let notifier: Arc<dyn Notifier> = match &config.transport {
        Transport::Twilio(twilio) => Arc::new(TwilioNotifier::new(
            twilio.clone(),
            http_client(config.notify_timeout)?,
        )),
        Transport::Relay(relay) => Arc::new(RelayNotifier::new(
            relay.clone(),
            http_client(config.notify_timeout)?,
        )),
        Transport::Clipboard(clipboard) => Arc::new(ClipboardNotifier::new(clipboard.clone())),
    };

    Ok(notifier)
}

/// No timeout unless one is configured
fn http_client(timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

async fn check_status(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected { status, body })
}

/// Hosted messaging API (Twilio WhatsApp)
pub struct TwilioNotifier {
    config: TwilioConfig,
    client: Client,
}

impl TwilioNotifier {
    pub fn new(config: TwilioConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Any path on the base is kept as a prefix
    fn messages_url(&self) -> Result<Url, NotifyError> {
        let mut base = self.config.api_base.clone();
        if !base.path().ends_with('/') {
            let prefix = format!("{}/", base.path());
            base.set_path(&prefix);
        }

        let path = format!(
            "2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );
        Ok(base.join(&path)?)
    }

    fn recipient(&self) -> String {
        if self.config.to.starts_with("whatsapp:") {
            self.config.to.clone()
        } else {
            format!("whatsapp:{}", self.config.to)
        }
    }

    async fn send(&self, alert: &AlertMessage) -> Result<(), NotifyError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("From", &self.config.from)
            .append_pair("To", &self.recipient())
            .append_pair("Body", &alert.rendered_text)
            .finish();

        let response = self
            .client
            .post(self.messages_url()?)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn notify(&self, alert: &AlertMessage) -> Delivery {
        self.send(alert).await.into()
    }
}

/// Webhook relay that takes the message as a query parameter (CallMeBot)
pub struct RelayNotifier {
    config: RelayConfig,
    client: Client,
}

impl RelayNotifier {
    pub fn new(config: RelayConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn request_url(&self, text: &str) -> Result<Url, NotifyError> {
        Ok(Url::parse_with_params(
            self.config.url.as_str(),
            &[
                ("phone", self.config.phone.as_str()),
                ("text", text),
                ("apikey", self.config.api_key.as_str()),
            ],
        )?)
    }

    async fn send(&self, alert: &AlertMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .get(self.request_url(&alert.rendered_text)?)
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn notify(&self, alert: &AlertMessage) -> Delivery {
        self.send(alert).await.into()
    }
}

/// Pipes detected codes into a local clipboard program
pub struct ClipboardNotifier {
    config: ClipboardConfig,
}

impl ClipboardNotifier {
    pub fn new(config: ClipboardConfig) -> Self {
        Self { config }
    }

    async fn copy(&self, text: &str) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // a program that exits early reports through its exit status below
            if let Err(e) = stdin.write_all(text.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
            // dropping stdin closes the pipe so the program can exit
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(NotifyError::ClipboardExit(status));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for ClipboardNotifier {
    fn name(&self) -> &'static str {
        "clipboard"
    }

    async fn notify(&self, alert: &AlertMessage) -> Delivery {
        match alert.kind {
            AlertKind::Code => self.copy(&alert.subject).await.into(),
            AlertKind::Keyword => Delivery::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use axum::{
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Router,
    };
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(HeaderMap, String)>>>,
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    async fn spawn_server(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn fake_twilio(
        State(captured): State<Captured>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        captured.requests.lock().unwrap().push((headers, body));
        StatusCode::CREATED
    }

    async fn fake_relay(
        State(captured): State<Captured>,
        Query(query): Query<HashMap<String, String>>,
    ) -> &'static str {
        captured.queries.lock().unwrap().push(query);
        "Message queued"
    }

    /// Fake servers are on loopback; ignore any proxy in the environment
    fn local_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    fn twilio_config(addr: SocketAddr) -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "token".to_string(),
            from: "whatsapp:+14155238886".to_string(),
            to: "+15550001111".to_string(),
            api_base: Url::parse(&format!("http://{addr}")).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_twilio_posts_form() {
        let captured = Captured::default();
        let app = Router::new()
            .route("/2010-04-01/Accounts/:sid/Messages.json", post(fake_twilio))
            .with_state(captured.clone());
        let addr = spawn_server(app).await;

        let notifier = TwilioNotifier::new(twilio_config(addr), local_client());
        let delivery = notifier.notify(&AlertMessage::code("4821")).await;
        assert!(matches!(delivery, Delivery::Sent));

        let requests = captured.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (headers, body) = &requests[0];

        assert!(headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic ")));

        let fields: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(fields["From"], "whatsapp:+14155238886");
        assert_eq!(fields["To"], "whatsapp:+15550001111");
        assert_eq!(fields["Body"], "🔢 Attendance Code Detected: 4821");
    }

    #[test]
    fn test_twilio_base_path_is_kept() {
        let mut config = twilio_config("127.0.0.1:1".parse().unwrap());
        config.api_base = Url::parse("https://proxy.example/twilio").unwrap();
        let notifier = TwilioNotifier::new(config, local_client());

        assert_eq!(
            notifier.messages_url().unwrap().as_str(),
            "https://proxy.example/twilio/2010-04-01/Accounts/AC123/Messages.json"
        );

        let mut config = twilio_config("127.0.0.1:1".parse().unwrap());
        config.api_base = Url::parse("https://api.twilio.com").unwrap();
        let notifier = TwilioNotifier::new(config, local_client());

        assert_eq!(
            notifier.messages_url().unwrap().as_str(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn test_twilio_rejection_is_failure() {
        let app = Router::new().route(
            "/2010-04-01/Accounts/:sid/Messages.json",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad credentials") }),
        );
        let addr = spawn_server(app).await;

        let notifier = TwilioNotifier::new(twilio_config(addr), local_client());
        let delivery = notifier.notify(&AlertMessage::code("4821")).await;

        match delivery {
            Delivery::Failed(NotifyError::Rejected { status, body }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "bad credentials");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_transport_is_failure() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = TwilioNotifier::new(twilio_config(addr), local_client());
        let delivery = notifier.notify(&AlertMessage::code("4821")).await;

        assert!(matches!(delivery, Delivery::Failed(NotifyError::Http(_))));
    }

    #[tokio::test]
    async fn test_relay_sends_query() {
        let captured = Captured::default();
        let app = Router::new()
            .route("/whatsapp.php", get(fake_relay))
            .with_state(captured.clone());
        let addr = spawn_server(app).await;

        let config = RelayConfig {
            url: Url::parse(&format!("http://{addr}/whatsapp.php")).unwrap(),
            phone: "+15550002222".to_string(),
            api_key: "relay-key".to_string(),
        };
        let notifier = RelayNotifier::new(config, local_client());
        let alert = AlertMessage::keyword("the code is", "The code is & 12 percent");
        let delivery = notifier.notify(&alert).await;
        assert!(matches!(delivery, Delivery::Sent));

        let queries = captured.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0]["phone"], "+15550002222");
        assert_eq!(queries[0]["apikey"], "relay-key");
        assert_eq!(queries[0]["text"], alert.rendered_text);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clipboard_copies_codes_only() {
        let notifier = ClipboardNotifier::new(ClipboardConfig::parse("cat").unwrap());

        assert!(matches!(
            notifier.notify(&AlertMessage::code("4821")).await,
            Delivery::Sent
        ));
        assert!(matches!(
            notifier.notify(&AlertMessage::keyword("attendance", "attendance")).await,
            Delivery::Skipped
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clipboard_failures() {
        let failing = ClipboardNotifier::new(ClipboardConfig::parse("false").unwrap());
        assert!(matches!(
            failing.notify(&AlertMessage::code("4821")).await,
            Delivery::Failed(NotifyError::ClipboardExit(_))
        ));

        let missing =
            ClipboardNotifier::new(ClipboardConfig::parse("no-such-clipboard-program").unwrap());
        assert!(matches!(
            missing.notify(&AlertMessage::code("4821")).await,
            Delivery::Failed(NotifyError::Clipboard(_))
        ));
    }
}
