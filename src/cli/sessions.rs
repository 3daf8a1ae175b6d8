//! HTTP client for a running service's session endpoints.

use crate::api::SessionSummary;
use crate::config::Config;
use anyhow::{bail, Context, Result};

use super::args::SessionsCliArgs;

pub struct SessionsClient {
    client: reqwest::Client,
    base_url: String,
}

impl SessionsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}. Is the service running?"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Service returned {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse sessions response")
    }
}

pub fn render_sessions_table(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No live recruitments.".to_string();
    }

    let mut out = format!(
        "{:<20} {:<15} {:<12} {:>7}  {}\n",
        "INITIATOR", "PHASE", "MODE", "PARTY", "TITLE"
    );
    for s in sessions {
        let party = match s.total_party_size {
            Some(total) => format!("{}/{}", s.participants.len(), total),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<20} {:<15} {:<12} {:>7}  {}\n",
            s.initiator.to_string(),
            s.phase.as_str(),
            s.mode.map(|m| m.as_str()).unwrap_or("-"),
            party,
            s.title.as_deref().unwrap_or("-"),
        ));
    }
    out
}

pub async fn handle_sessions_command(args: SessionsCliArgs) -> Result<()> {
    let base_url = match args.url {
        Some(url) => url,
        None => format!("http://{}", Config::load()?.api.bind),
    };

    let sessions = SessionsClient::new(base_url).list().await?;
    print!("{}", render_sessions_table(&sessions));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::UserId;
    use crate::session::{GameMode, SessionPhase};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_render_sessions_table() {
        assert_eq!(render_sessions_table(&[]), "No live recruitments.");

        let table = render_sessions_table(&[SessionSummary {
            id: Uuid::new_v4(),
            initiator: UserId(42),
            phase: SessionPhase::Active,
            mode: Some(GameMode::Casual),
            title: Some("late night".to_string()),
            participants: vec![UserId(42), UserId(43)],
            total_party_size: Some(3),
            remaining_slots: 1,
            voice_channel: None,
            created_at: Utc::now(),
        }]);
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with("42 "));
        assert!(row.contains("active"));
        assert!(row.contains("casual"));
        assert!(row.contains("2/3"));
        assert!(row.ends_with("late night"));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = SessionsClient::new("http://127.0.0.1:3838/");
        assert_eq!(client.base_url, "http://127.0.0.1:3838");
    }
}
