use std::time::Duration;

use {
    anyhow::{Context, Result, bail},
    serde_json::{Value, json},
};

use {relay_config::RelayConfig, relay_whatsapp::SessionStateStore};

fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(90))
        .build()?)
}

fn endpoint(url: &str, path: &str) -> String {
    format!("{}{path}", url.trim_end_matches('/'))
}

pub async fn health(url: &str) -> Result<()> {
    let body: Value = client()?
        .get(endpoint(url, "/health"))
        .send()
        .await
        .with_context(|| format!("gateway not reachable at {url}"))?
        .json()
        .await
        .context("gateway returned a malformed health response")?;

    println!("{}", render_health(&body));
    Ok(())
}

fn render_health(body: &Value) -> String {
    let field = |key: &str| match &body[key] {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    };
    [
        format!("status:     {}", field("status")),
        format!("state:      {}", field("state")),
        format!("initializing: {}", field("initializing")),
        format!(
            "reconnects: {}/{}",
            field("reconnectAttempts"),
            field("maxAttempts")
        ),
        format!("provider:   {}", field("type")),
    ]
    .join("\n")
}

pub async fn test_send(url: &str, phone: &str, message: &str) -> Result<()> {
    let response = client()?
        .post(endpoint(url, "/send-message"))
        .json(&json!({ "phone": phone, "message": message }))
        .send()
        .await
        .with_context(|| format!("gateway not reachable at {url}"))?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let error = body["error"].as_str().unwrap_or("unknown error");
        match body["details"].as_str() {
            Some(details) => bail!("send failed ({status}): {error}: {details}"),
            None => bail!("send failed ({status}): {error}"),
        }
    }

    println!(
        "sent to {} after {} attempt(s), message id {}",
        body["chatId"].as_str().unwrap_or(phone),
        body["attempts"],
        body["messageId"].as_str().unwrap_or("-"),
    );
    Ok(())
}

pub async fn cleanup(config: &RelayConfig) -> Result<()> {
    let store = SessionStateStore::from_config(&config.session);
    if !store.cleanup().await {
        bail!("some session data could not be removed, see the log for details");
    }
    println!(
        "session data removed from {}, the next start needs a fresh pairing",
        store.data_dir().display()
    );
    Ok(())
}
