//! GitHub-backed source refresh over a pluggable HTTP client.

use async_trait::async_trait;

use st_core::source::CONFIG_FILE;
use st_core::{GitHubRef, Source, SourceManifest};

use crate::error::HostError;
use crate::host::SourceFetcher;

/// Status and body of a completed GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait(?Send)]
pub trait HttpClient {
    /// GET `url`, sending `token` as a bearer credential when present.
    async fn get(&self, url: &str, token: Option<&str>) -> Result<HttpResponse, HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid GitHub URL")]
    InvalidUrl,
    #[error("File not found (404). Check URL or token permissions.")]
    NotFound,
    #[error("Access denied. Check your GitHub token.")]
    AccessDenied,
    #[error("HTTP {status}: {text}")]
    Status { status: u16, text: String },
    #[error("Invalid config format")]
    InvalidConfig,
    #[error(transparent)]
    Transport(#[from] HostError),
}

/// Refreshes sources from raw GitHub content.
pub struct GitHubFetcher<C> {
    client: C,
    now_ms: fn() -> i64,
}

impl<C: HttpClient> GitHubFetcher<C> {
    pub fn new(client: C, now_ms: fn() -> i64) -> Self {
        Self { client, now_ms }
    }

    async fn get_file(&self, repo: &GitHubRef, file: &str, token: Option<&str>) -> Result<String, FetchError> {
        let url = repo.raw_file_url(file);
        log::debug!("fetching {}", url);

        let response = self.client.get(&url, token).await?;
        match response.status {
            _ if response.is_success() => Ok(response.body),
            404 => Err(FetchError::NotFound),
            401 | 403 => Err(FetchError::AccessDenied),
            status => Err(FetchError::Status {
                status,
                text: response.status_text,
            }),
        }
    }

    /// Manifest plus script bodies, in manifest order.
    pub async fn fetch(&self, source: &Source) -> Result<(SourceManifest, Vec<String>), FetchError> {
        let repo = GitHubRef::parse(&source.url).ok_or(FetchError::InvalidUrl)?;
        let token = source.token.as_deref().filter(|token| !token.is_empty());

        let text = self.get_file(&repo, CONFIG_FILE, token).await?;
        let manifest = SourceManifest::parse(&text).map_err(|e| {
            log::debug!("manifest for {} rejected: {}", repo.display(), e);
            FetchError::InvalidConfig
        })?;

        let mut codes = Vec::with_capacity(manifest.scripts.len());
        for script in &manifest.scripts {
            codes.push(self.get_file(&repo, &script.file, token).await?);
        }
        Ok((manifest, codes))
    }
}

#[async_trait(?Send)]
impl<C: HttpClient> SourceFetcher for GitHubFetcher<C> {
    async fn refresh(&self, mut source: Source) -> Source {
        let result = self.fetch(&source).await;
        let now = (self.now_ms)();

        let applied = match result {
            Ok((manifest, codes)) => source
                .apply_manifest(manifest, codes, now)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match applied {
            Ok(()) => log::info!(
                "source {} refreshed: {} scripts, version {}",
                source.url,
                source.scripts.len(),
                source.version
            ),
            Err(error) => source.record_error(error, now),
        }
        source
    }
}
