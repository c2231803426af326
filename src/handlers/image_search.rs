use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    capability::{Capabilities, SEARCH_IMAGES},
    handler::{ExecuteResult, Handler, HandlerError, HandlerRequest, HandlerResult, HandlerSource},
    initializer::{HandlerEnv, RegistrationError},
    provider::ProviderId,
};

use super::endpoint_url;

const DEFAULT_PER_PAGE: u64 = 10;
const MAX_PER_PAGE: u64 = 50;

/// One image in the merged result shape shared by every image source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub id: String,
    pub url: String,
    pub thumb: String,
    pub author: String,
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct UnsplashSearch {
    #[serde(default)]
    results: Vec<UnsplashPhoto>,
}

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    id: String,
    urls: UnsplashUrls,
    user: UnsplashUser,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    regular: String,
    thumb: String,
}

#[derive(Debug, Deserialize)]
struct UnsplashUser {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PexelsSearch {
    #[serde(default)]
    photos: Vec<PexelsPhoto>,
}

#[derive(Debug, Deserialize)]
struct PexelsPhoto {
    id: u64,
    photographer: String,
    src: PexelsSrc,
}

#[derive(Debug, Deserialize)]
struct PexelsSrc {
    large: String,
    tiny: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageService {
    Unsplash,
    Pexels,
}

impl ImageService {
    fn provider(&self) -> ProviderId {
        match self {
            ImageService::Unsplash => ProviderId::Unsplash,
            ImageService::Pexels => ProviderId::Pexels,
        }
    }

    fn search_path(&self) -> &'static str {
        match self {
            ImageService::Unsplash => "/search/photos",
            ImageService::Pexels => "/search",
        }
    }

    fn authorization(&self, api_key: &str) -> String {
        match self {
            ImageService::Unsplash => format!("Client-ID {}", api_key),
            ImageService::Pexels => api_key.to_string(),
        }
    }

    fn parse(&self, body: &str) -> HandlerResult<Vec<ImageResult>> {
        let invalid = |e: serde_json::Error| HandlerError::InvalidResponse(e.to_string());
        let source = self.provider().to_string();
        let images = match self {
            ImageService::Unsplash => serde_json::from_str::<UnsplashSearch>(body)
                .map_err(invalid)?
                .results
                .into_iter()
                .map(|photo| ImageResult {
                    id: photo.id,
                    url: photo.urls.regular,
                    thumb: photo.urls.thumb,
                    author: photo.user.name,
                    source: source.clone(),
                })
                .collect(),
            ImageService::Pexels => serde_json::from_str::<PexelsSearch>(body)
                .map_err(invalid)?
                .photos
                .into_iter()
                .map(|photo| ImageResult {
                    id: photo.id.to_string(),
                    url: photo.src.large,
                    thumb: photo.src.tiny,
                    author: photo.photographer,
                    source: source.clone(),
                })
                .collect(),
        };
        Ok(images)
    }
}

/// Stock photo search. Aggregation over several services merges results.
pub struct ImageSearchHandler {
    id: String,
    name: String,
    service: ImageService,
    client: Client,
    base_url: String,
    priority: i32,
    capabilities: Capabilities,
}

impl ImageSearchHandler {
    pub fn new(service: ImageService, client: Client, base_url: impl Into<String>) -> Self {
        let (id, name, priority) = match service {
            ImageService::Unsplash => ("unsplash-images", "Unsplash", 60),
            ImageService::Pexels => ("pexels-images", "Pexels", 50),
        };
        Self {
            id: id.to_string(),
            name: name.to_string(),
            service,
            client,
            base_url: base_url.into(),
            priority,
            capabilities: Capabilities::from(&[SEARCH_IMAGES][..]),
        }
    }
}

#[async_trait]
impl Handler for ImageSearchHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn provider_id(&self) -> Option<ProviderId> {
        Some(self.service.provider())
    }

    fn source(&self) -> HandlerSource {
        HandlerSource::Integration
    }

    #[instrument(level = "debug", skip(self, request), fields(handler = %self.id))]
    async fn execute(&self, request: HandlerRequest) -> HandlerResult<ExecuteResult> {
        let api_key = request
            .context
            .api_key
            .as_ref()
            .ok_or_else(|| HandlerError::MissingApiKey(self.service.provider()))?;
        let query = request.prompt.trim();
        if query.is_empty() {
            return Err(HandlerError::InvalidRequest("empty search query".to_string()));
        }
        let per_page = request
            .param_u64("count")
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        let response = self
            .client
            .get(format!("{}{}", self.base_url, self.service.search_path()))
            .header(
                "Authorization",
                self.service.authorization(api_key.expose_secret()),
            )
            .query(&[("query", query.to_string()), ("per_page", per_page.to_string())])
            .send()
            .await
            .map_err(|e| HandlerError::Api(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HandlerError::Api(e.to_string()))?;
        if !status.is_success() {
            return Err(HandlerError::from_status(status.as_u16(), body));
        }

        let images = self.service.parse(&body)?;
        debug!(count = images.len(), "images found");
        let data = serde_json::to_value(images)
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        Ok(ExecuteResult::success(data))
    }
}

pub fn build_unsplash(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let base_url = endpoint_url("unsplash-images", &env.endpoints.unsplash.url)?;
    Ok(Arc::new(ImageSearchHandler::new(
        ImageService::Unsplash,
        env.http.clone(),
        base_url,
    )))
}

pub fn build_pexels(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let base_url = endpoint_url("pexels-images", &env.endpoints.pexels.url)?;
    Ok(Arc::new(ImageSearchHandler::new(
        ImageService::Pexels,
        env.http.clone(),
        base_url,
    )))
}
