use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::error::BotError;

static SPOTIFY_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:open\.spotify\.com|spotify\.link|spoti\.fi)/[^\s<>]+").unwrap()
});

/// First Spotify link found in `text`, with trailing punctuation removed.
pub fn extract_spotify_link(text: &str) -> Option<String> {
    SPOTIFY_LINK.find(text).map(|found| {
        found
            .as_str()
            .trim_end_matches(|ch: char| matches!(ch, '.' | ',' | ')' | '!' | '?' | '"' | '\''))
            .to_string()
    })
}

pub fn is_short_link(url: &str) -> bool {
    let rest = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    rest.starts_with("spotify.link/") || rest.starts_with("spoti.fi/")
}

/// Expands share links (`spotify.link`, `spoti.fi`) into the
/// `open.spotify.com` URL they redirect to.
#[derive(Clone)]
pub struct LinkExpander {
    client: Client,
}

impl LinkExpander {
    pub fn new() -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(format!("tunedrop/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| BotError::LinkHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub async fn expand(&self, url: &str) -> Result<String, BotError> {
        if !is_short_link(url) {
            return Ok(url.to_string());
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| BotError::LinkHttp(err.to_string()))?;
        let final_url = response.url().clone();
        if final_url.host_str() != Some("open.spotify.com") {
            return Err(BotError::LinkHttp(format!(
                "short link did not redirect to open.spotify.com: {final_url}"
            )));
        }
        let mut expanded = final_url;
        expanded.set_query(None);
        Ok(expanded.to_string())
    }
}

/// Turns a link found in a message into the link handed to the resolver.
#[async_trait]
pub trait Expander: Send + Sync {
    /// Never fails: a link that cannot be expanded is returned unchanged.
    async fn expand_or_keep(&self, url: &str) -> String;
}

#[async_trait]
impl Expander for LinkExpander {
    async fn expand_or_keep(&self, url: &str) -> String {
        match self.expand(url).await {
            Ok(expanded) => expanded,
            Err(err) => {
                tracing::warn!(url, error = %err, "could not expand short link");
                url.to_string()
            }
        }
    }
}
