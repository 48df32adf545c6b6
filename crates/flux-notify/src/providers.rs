use crate::endpoint::{ensure_public_resolution, validate_endpoint_url};
use crate::error::NotifyError;
use crate::message;
use anyhow::Result;
use async_trait::async_trait;
use flux_alert::{AlertEvent, AlertNotificationResult, NotificationProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, warn};
use url::Url;

/// 校验失败时记录日志并视为未配置
fn configured_endpoint(provider: &str, raw: &str) -> Option<Url> {
    match validate_endpoint_url(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(provider = %provider, error = %e, "Notification endpoint rejected");
            None
        }
    }
}

/// 通知用 HTTP 客户端：不跟随重定向，3xx 按失败处理
fn http_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder().redirect(reqwest::redirect::Policy::none())
}

/// 只连接已检查过的地址，避免发送时被重新解析到内网
fn pinned_client(url: &Url, addrs: &[SocketAddr]) -> Result<reqwest::Client> {
    let mut builder = http_client_builder();
    if let Some(domain) = url.domain() {
        if !addrs.is_empty() {
            builder = builder.resolve_to_addrs(domain, addrs);
        }
    }
    Ok(builder.build().map_err(NotifyError::from)?)
}

async fn post_json(
    provider: &str,
    endpoint: Option<&Url>,
    headers: &HashMap<String, String>,
    body: &serde_json::Value,
) -> Result<AlertNotificationResult> {
    let url = endpoint.ok_or_else(|| NotifyError::NotConfigured(provider.to_string()))?;
    let addrs = ensure_public_resolution(url).await?;
    let client = pinned_client(url, &addrs)?;

    let mut request = client.post(url.clone());
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = request.json(body).send().await.map_err(NotifyError::from)?;
    let status = response.status();
    debug!(provider = %provider, status = %status, "Notification request completed");

    if status.is_success() {
        Ok(AlertNotificationResult::success(provider))
    } else {
        Ok(AlertNotificationResult::failure(
            provider,
            format!("{} failed with status: {}", provider, status),
        ))
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// 以 JSON 形式推送完整事件
pub struct WebhookProvider {
    config: WebhookConfig,
    endpoint: Option<Url>,
    enabled: bool,
}

impl WebhookProvider {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            endpoint: configured_endpoint("webhook", &config.url),
            config,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn build_message(&self, event: &AlertEvent) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(event).map_err(NotifyError::from)?)
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn name(&self) -> &str {
        "webhook"
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, event: &AlertEvent) -> Result<AlertNotificationResult> {
        let body = self.build_message(event)?;
        post_json(
            self.name(),
            self.endpoint.as_ref(),
            &self.config.headers,
            &body,
        )
        .await
    }
}

// ============================================================================
// Slack 通知
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
}

pub struct SlackProvider {
    config: SlackConfig,
    endpoint: Option<Url>,
}

impl SlackProvider {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            endpoint: configured_endpoint("slack", &config.webhook_url),
            config,
        }
    }

    fn build_message(&self, event: &AlertEvent) -> serde_json::Value {
        let mut fields = vec![
            serde_json::json!({
                "title": "Severity",
                "value": event.severity.to_string(),
                "short": true
            }),
            serde_json::json!({
                "title": "Time",
                "value": event.fired_at.to_rfc3339(),
                "short": true
            }),
        ];
        let mut labels: Vec<_> = event.labels.iter().collect();
        labels.sort();
        for (key, value) in labels {
            fields.push(serde_json::json!({ "title": key, "value": value, "short": true }));
        }

        let mut body = serde_json::json!({
            "attachments": [{
                "color": message::slack_color(event.severity),
                "title": format!("{} {}", message::emoji(event.severity), message::title(event)),
                "text": event.message,
                "fields": fields
            }]
        });
        if let Some(channel) = &self.config.channel {
            body["channel"] = serde_json::Value::String(channel.clone());
        }
        body
    }
}

#[async_trait]
impl NotificationProvider for SlackProvider {
    fn name(&self) -> &str {
        "slack"
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn send(&self, event: &AlertEvent) -> Result<AlertNotificationResult> {
        let body = self.build_message(event);
        post_json(
            self.name(),
            self.endpoint.as_ref(),
            &HashMap::new(),
            &body,
        )
        .await
    }
}

// ============================================================================
// Microsoft Teams 通知
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsConfig {
    pub webhook_url: String,
}

pub struct TeamsProvider {
    endpoint: Option<Url>,
}

impl TeamsProvider {
    pub fn new(config: TeamsConfig) -> Self {
        Self {
            endpoint: configured_endpoint("teams", &config.webhook_url),
        }
    }

    fn build_message(&self, event: &AlertEvent) -> serde_json::Value {
        let mut facts = vec![
            serde_json::json!({ "name": "Severity", "value": event.severity.to_string() }),
            serde_json::json!({ "name": "Status", "value": format!("{:?}", event.status) }),
            serde_json::json!({ "name": "Fired at", "value": event.fired_at.to_rfc3339() }),
        ];
        let mut labels: Vec<_> = event.labels.iter().collect();
        labels.sort();
        for (key, value) in labels {
            facts.push(serde_json::json!({ "name": key, "value": value }));
        }

        serde_json::json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": message::theme_color(event.severity),
            "summary": message::title(event),
            "sections": [{
                "activityTitle": message::title(event),
                "text": event.message,
                "facts": facts
            }]
        })
    }
}

#[async_trait]
impl NotificationProvider for TeamsProvider {
    fn name(&self) -> &str {
        "teams"
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn send(&self, event: &AlertEvent) -> Result<AlertNotificationResult> {
        let body = self.build_message(event);
        post_json(
            self.name(),
            self.endpoint.as_ref(),
            &HashMap::new(),
            &body,
        )
        .await
    }
}

// ============================================================================
// Telegram 通知
// ============================================================================

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

pub struct TelegramProvider {
    config: TelegramConfig,
    endpoint: Option<Url>,
}

impl TelegramProvider {
    pub fn new(config: TelegramConfig) -> Self {
        let endpoint = if config.bot_token.is_empty() || config.chat_id.is_empty() {
            None
        } else {
            configured_endpoint(
                "telegram",
                &format!(
                    "{}/bot{}/sendMessage",
                    config.api_base.trim_end_matches('/'),
                    config.bot_token
                ),
            )
        };

        Self {
            config,
            endpoint,
        }
    }

    fn build_message(&self, event: &AlertEvent) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": format!("{} {}", message::emoji(event.severity), message::plain_text(event)),
            "disable_web_page_preview": true
        })
    }
}

#[async_trait]
impl NotificationProvider for TelegramProvider {
    fn name(&self) -> &str {
        "telegram"
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn send(&self, event: &AlertEvent) -> Result<AlertNotificationResult> {
        let body = self.build_message(event);
        post_json(
            self.name(),
            self.endpoint.as_ref(),
            &HashMap::new(),
            &body,
        )
        .await
    }
}

// ============================================================================
// 邮件通知
// ============================================================================

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
}

pub struct EmailProvider {
    config: EmailConfig,
}

impl EmailProvider {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, event: &AlertEvent) -> Result<lettre::Message> {
        use lettre::message::header::ContentType;
        use lettre::message::Mailbox;

        let mut builder = lettre::Message::builder()
            .from(self.config.from.parse::<Mailbox>()?)
            .subject(message::title(event))
            .header(ContentType::TEXT_PLAIN);
        for to in &self.config.to {
            builder = builder.to(to.parse::<Mailbox>()?);
        }

        Ok(builder.body(message::plain_text(event))?)
    }
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn name(&self) -> &str {
        "email"
    }

    fn is_configured(&self) -> bool {
        use lettre::message::Mailbox;

        !self.config.smtp_host.is_empty()
            && self.config.from.parse::<Mailbox>().is_ok()
            && !self.config.to.is_empty()
            && self.config.to.iter().all(|to| to.parse::<Mailbox>().is_ok())
    }

    async fn send(&self, event: &AlertEvent) -> Result<AlertNotificationResult> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

        if !self.is_configured() {
            return Err(NotifyError::NotConfigured(self.name().to_string()).into());
        }

        let email = self.build_message(event)?;
        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
            .map_err(|e| NotifyError::Email(e.to_string()))?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        match mailer.send(email).await {
            Ok(_) => Ok(AlertNotificationResult::success(self.name())),
            Err(e) => Ok(AlertNotificationResult::failure(
                self.name(),
                format!("Email send failed: {}", e),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_alert::AlertSeverity;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    fn event() -> AlertEvent {
        AlertEvent::new(
            "alert-1",
            "high-cpu",
            AlertSeverity::Critical,
            "cpu at 97%",
            HashMap::from([("service".to_string(), "api".to_string())]),
        )
    }

    #[test]
    fn test_invalid_endpoints_are_not_configured() {
        let webhook = WebhookProvider::new(WebhookConfig {
            url: "http://169.254.169.254/latest".to_string(),
            ..Default::default()
        });
        assert!(!webhook.is_configured());

        let slack = SlackProvider::new(SlackConfig {
            webhook_url: "https://hooks.slack.com/services/T/B/X".to_string(),
            channel: None,
        });
        assert!(slack.is_configured());

        let teams = TeamsProvider::new(TeamsConfig {
            webhook_url: String::new(),
        });
        assert!(!teams.is_configured());

        let telegram = TelegramProvider::new(TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: String::new(),
            api_base: default_telegram_api(),
        });
        assert!(!telegram.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_without_network() {
        let webhook = WebhookProvider::new(WebhookConfig {
            url: "http://localhost:9000/hook".to_string(),
            ..Default::default()
        });
        let err = tokio_test::assert_err!(webhook.send(&event()).await);
        assert!(err.to_string().contains("not configured"));
    }

    /// 本地 HTTP 服务：`/hook` 返回 302 指向 `/internal`，记录收到的路径
    async fn redirecting_server() -> (Url, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let paths = Arc::new(Mutex::new(Vec::new()));

        let seen = paths.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let mut len = 0;
                while !buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf[len..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => len += n,
                    }
                }

                let request = String::from_utf8_lossy(&buf[..len]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("").to_string();
                seen.lock().await.push(path.clone());

                let response = if path == "/hook" {
                    format!(
                        "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:{}/internal\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        port
                    )
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        let url = Url::parse(&format!("http://127.0.0.1:{}/hook", port)).unwrap();
        (url, paths)
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let (url, paths) = redirecting_server().await;

        let result = tokio_test::assert_ok!(
            post_json(
                "webhook",
                Some(&url),
                &HashMap::new(),
                &serde_json::json!({ "alert": "high-cpu" }),
            )
            .await
        );

        assert!(!result.success);
        assert!(result.error.unwrap_or_default().contains("302"));
        assert_eq!(*paths.lock().await, vec!["/hook".to_string()]);
    }

    #[test]
    fn test_slack_payload() {
        let slack = SlackProvider::new(SlackConfig {
            webhook_url: "https://hooks.slack.com/services/T/B/X".to_string(),
            channel: Some("#alerts".to_string()),
        });
        let body = slack.build_message(&event());

        assert_eq!(body["channel"], "#alerts");
        let attachment = &body["attachments"][0];
        assert_eq!(attachment["color"], "danger");
        assert_eq!(attachment["text"], "cpu at 97%");
        assert!(attachment["title"]
            .as_str()
            .unwrap()
            .ends_with("[CRITICAL] high-cpu"));
        assert_eq!(attachment["fields"][2]["title"], "service");
    }

    #[test]
    fn test_teams_payload() {
        let teams = TeamsProvider::new(TeamsConfig {
            webhook_url: "https://example.webhook.office.com/webhookb2/x".to_string(),
        });
        let body = teams.build_message(&event());

        assert_eq!(body["@type"], "MessageCard");
        assert_eq!(body["themeColor"], "D70000");
        assert_eq!(body["sections"][0]["facts"][3]["name"], "service");
    }

    #[test]
    fn test_telegram_endpoint_and_payload() {
        let telegram = TelegramProvider::new(TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-100200".to_string(),
            api_base: default_telegram_api(),
        });
        assert_eq!(
            telegram.endpoint.as_ref().map(Url::as_str),
            Some("https://api.telegram.org/bot123:abc/sendMessage")
        );

        let body = telegram.build_message(&event());
        assert_eq!(body["chat_id"], "-100200");
        assert!(body["text"].as_str().unwrap().contains("cpu at 97%"));
    }

    #[test]
    fn test_webhook_payload_is_event_json() {
        let webhook = WebhookProvider::new(WebhookConfig {
            url: "https://alerts.example.com/hook".to_string(),
            ..Default::default()
        });
        let event = event();
        let body = webhook.build_message(&event).unwrap();

        assert_eq!(body["id"], event.id.as_str());
        assert_eq!(body["alert_name"], "high-cpu");
        assert_eq!(body["severity"], "CRITICAL");
    }

    #[test]
    fn test_email_configuration_and_message() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: "alert".to_string(),
            password: "secret".to_string(),
            from: "Alerts <alert@example.com>".to_string(),
            to: vec!["ops@example.com".to_string(), "oncall@example.com".to_string()],
        };
        let email = EmailProvider::new(config.clone());
        assert!(email.is_configured());
        assert!(email.build_message(&event()).is_ok());

        let broken = EmailProvider::new(EmailConfig {
            to: vec!["not-an-address".to_string()],
            ..config
        });
        assert!(!broken.is_configured());
    }
}
