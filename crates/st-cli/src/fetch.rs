use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use st_runtime::{GitHubFetcher, HostError, HttpClient, HttpResponse};

const USER_AGENT: &str = concat!("st-cli/", env!("CARGO_PKG_VERSION"));

pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait(?Send)]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, token: Option<&str>) -> Result<HttpResponse, HostError> {
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostError::new(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HostError::new(e.to_string()))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

pub fn github_fetcher() -> Result<GitHubFetcher<ReqwestClient>, String> {
    Ok(GitHubFetcher::new(ReqwestClient::new()?, now_ms))
}
