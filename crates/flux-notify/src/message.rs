use flux_alert::{AlertEvent, AlertSeverity};

/// 通知标题，例如 `[WARNING] high-cpu`
pub fn title(event: &AlertEvent) -> String {
    format!("[{}] {}", event.severity, event.alert_name)
}

/// 纯文本正文（邮件、Telegram）
pub fn plain_text(event: &AlertEvent) -> String {
    let mut text = format!(
        "{}\n\n{}\n\nStatus: {:?}\nFired at: {}",
        title(event),
        event.message,
        event.status,
        event.fired_at.to_rfc3339()
    );

    let mut labels: Vec<_> = event.labels.iter().collect();
    labels.sort();
    if !labels.is_empty() {
        text.push_str("\nLabels:");
        for (key, value) in labels {
            text.push_str(&format!("\n  {}={}", key, value));
        }
    }

    text
}

/// Slack attachment 颜色
pub fn slack_color(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Info => "good",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Critical => "danger",
    }
}

/// Teams MessageCard 主题色
pub fn theme_color(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Info => "0076D7",
        AlertSeverity::Warning => "FFA500",
        AlertSeverity::Critical => "D70000",
    }
}

pub fn emoji(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Info => "ℹ️",
        AlertSeverity::Warning => "⚠️",
        AlertSeverity::Critical => "🚨",
    }
}
