use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::grimoire::{GrimoireSnapshot, SessionAnnouncement};

const CASTER_RESOURCE: &str = "caster";
const GRIMOIRE_RESOURCE: &str = "grimoire";
const SESSION_RESOURCE: &str = "session";

/// Connect-time grimoire fetch result. Both fields are optional; an empty
/// body is a valid "nothing relayed yet" answer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrimoireFetch {
    pub is_active: Option<bool>,
    pub grimoire: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SecretKeyResponse {
    secret_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveSecretBody<'a> {
    secret_key: &'a str,
    channel_id: &'a str,
}

/// Client side of the external backend service. Reads are awaited once per
/// trigger with no retry; writes are meant to be spawned fire-and-forget by
/// callers, with failures logged and swallowed.
#[derive(Debug, Clone)]
pub struct EbsClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl EbsClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            base_url,
            token,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, resource: &str, tail: &str) -> String {
        if tail.is_empty() {
            format!("{}/{}", self.base_url, resource)
        } else {
            format!("{}/{}/{}", self.base_url, resource, tail)
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetches the stored secret key for a channel. `Ok(None)` means no key
    /// has been configured yet, which is a normal first-run outcome.
    pub async fn fetch_secret_key(&self, channel_id: &str) -> Result<Option<String>> {
        let url = self.url(CASTER_RESOURCE, channel_id);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("secret key fetch failed: {url}"))?
            .error_for_status()
            .context("secret key fetch was rejected")?;
        let body = response
            .json::<SecretKeyResponse>()
            .await
            .context("secret key response was not valid json")?;
        Ok(body.secret_key)
    }

    pub async fn save_secret_key(&self, secret_key: &str, channel_id: &str) -> Result<()> {
        let url = self.url(CASTER_RESOURCE, "");
        self.authorized(self.http.post(&url))
            .json(&SaveSecretBody {
                secret_key,
                channel_id,
            })
            .send()
            .await
            .with_context(|| format!("secret key save failed: {url}"))?
            .error_for_status()
            .context("secret key save was rejected")?;
        Ok(())
    }

    /// One-shot grimoire fetch at viewer connect time. Failures are reported
    /// to the caller, which logs and leaves the default state in place.
    pub async fn fetch_grimoire(&self, channel_id: &str) -> Result<GrimoireFetch> {
        let url = self.url(GRIMOIRE_RESOURCE, channel_id);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("grimoire fetch failed: {url}"))?
            .error_for_status()
            .context("grimoire fetch was rejected")?;
        response
            .json::<GrimoireFetch>()
            .await
            .context("grimoire response was not valid json")
    }

    pub async fn push_grimoire(&self, secret_key: &str, snapshot: &GrimoireSnapshot) -> Result<()> {
        let url = self.url(GRIMOIRE_RESOURCE, secret_key);
        self.http
            .post(&url)
            .json(snapshot)
            .send()
            .await
            .with_context(|| format!("grimoire push failed: {url}"))?
            .error_for_status()
            .context("grimoire push was rejected")?;
        Ok(())
    }

    pub async fn push_session(
        &self,
        secret_key: &str,
        announcement: &SessionAnnouncement,
    ) -> Result<()> {
        let url = self.url(SESSION_RESOURCE, secret_key);
        self.http
            .post(&url)
            .json(announcement)
            .send()
            .await
            .with_context(|| format!("session push failed: {url}"))?
            .error_for_status()
            .context("session push was rejected")?;
        Ok(())
    }

    /// Best-effort unload beacon: announces the session inactive with the
    /// last known players and never surfaces a failure.
    pub async fn send_unload_beacon(&self, secret_key: &str, snapshot: &GrimoireSnapshot) {
        let announcement = SessionAnnouncement {
            session: snapshot.session.clone(),
            player_id: snapshot.player_id.clone(),
            is_active: false,
            players: Some(snapshot.players.clone()),
        };
        if let Err(err) = self.push_session(secret_key, &announcement).await {
            warn!(?err, "unload beacon was lost");
        }
    }
}
