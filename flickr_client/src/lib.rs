//! Client for the Flickr photo search API.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const FLICKR_REST_URL: &str = "https://api.flickr.com/services/rest";

// Fixed query parameters of the `flickr.photos.search` call.
const SEARCH_METHOD: &str = "flickr.photos.search";
const SAFE_SEARCH: &str = "1";
const EXTRAS_MEDIUM_URL: &str = "url_m";
const RESPONSE_FORMAT: &str = "json";
const NO_JSON_CALLBACK: &str = "1";

pub const DEFAULT_PER_PAGE: u32 = 21;
pub const DEFAULT_PAGE_CAP: u32 = 40;

/// Half extents of the search bounding box, in degrees.
pub const BBOX_HALF_WIDTH: f64 = 1.0;
pub const BBOX_HALF_HEIGHT: f64 = 1.0;

const LON_RANGE: (f64, f64) = (-180.0, 180.0);
const LAT_RANGE: (f64, f64) = (-90.0, 90.0);

/// Box around a coordinate as `"minLon,minLat,maxLon,maxLat"`, clamped to
/// the global latitude/longitude ranges.
pub fn bbox_string(latitude: f64, longitude: f64) -> String {
    let min_lon = (longitude - BBOX_HALF_WIDTH).max(LON_RANGE.0);
    let min_lat = (latitude - BBOX_HALF_HEIGHT).max(LAT_RANGE.0);
    let max_lon = (longitude + BBOX_HALF_WIDTH).min(LON_RANGE.1);
    let max_lat = (latitude + BBOX_HALF_HEIGHT).min(LAT_RANGE.1);
    format!("{},{},{},{}", min_lon, min_lat, max_lon, max_lat)
}

#[derive(Debug, Error)]
pub enum FlickrError {
    #[error("Network Error: {0}")]
    NetworkError(String),
    #[error("Parse Error: {0}")]
    ParseError(String),
    #[error("Flickr API Error: {0}")]
    ServiceError(String),
}

/// One page of search results: the service's total page count and the
/// medium-size URL of every entry on the page that carries one.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub total_pages: u32,
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    stat: String,
    code: Option<i64>,
    message: Option<String>,
    photos: Option<PhotosBlock>,
}

#[derive(Debug, Deserialize)]
struct PhotosBlock {
    pages: u32,
    #[serde(default)]
    photo: Vec<PhotoEntry>,
}

#[derive(Debug, Deserialize)]
struct PhotoEntry {
    url_m: Option<String>,
}

pub struct FlickrClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    per_page: u32,
    page_cap: u32,
    timeout: Option<Duration>,
    rng: Mutex<StdRng>,
}

impl FlickrClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, FLICKR_REST_URL.to_string())
    }

    /// Create a client against a custom API base URL. Mainly used for testing.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        FlickrClient {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            per_page: DEFAULT_PER_PAGE,
            page_cap: DEFAULT_PAGE_CAP,
            timeout: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn set_per_page(&mut self, per_page: u32) {
        self.per_page = per_page;
    }

    /// Ceiling on the page drawn by [`FlickrClient::random_album`].
    pub fn set_page_cap(&mut self, page_cap: u32) {
        self.page_cap = page_cap.max(1);
    }

    /// Per-request timeout. The transport default applies when unset.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Reseed the page-selection RNG for reproducible album picks.
    pub fn seed_rng(&self, seed: u64) {
        *self.lock_rng() = StdRng::seed_from_u64(seed);
    }

    fn lock_rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pick_page(&self, total_pages: u32) -> u32 {
        let limit = total_pages.min(self.page_cap).max(1);
        self.lock_rng().gen_range(1..=limit)
    }

    /// Issue one geographic search request. The bounding box is recomputed
    /// from the given coordinate on every call, never cached.
    pub async fn search(
        &self,
        latitude: f64,
        longitude: f64,
        page: Option<u32>,
    ) -> Result<SearchPage, FlickrError> {
        let mut params = vec![
            ("method", SEARCH_METHOD.to_string()),
            ("api_key", self.api_key.clone()),
            ("bbox", bbox_string(latitude, longitude)),
            ("safe_search", SAFE_SEARCH.to_string()),
            ("extras", EXTRAS_MEDIUM_URL.to_string()),
            ("format", RESPONSE_FORMAT.to_string()),
            ("nojsoncallback", NO_JSON_CALLBACK.to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        if let Some(page) = page {
            params.push(("page", page.to_string()));
        }

        let mut request = self.client.get(&self.base_url).query(&params);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlickrError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FlickrError::NetworkError(format!(
                "Search request returned status {}",
                response.status()
            )));
        }

        let body = response
            .json::<SearchResponse>()
            .await
            .map_err(|e| FlickrError::ParseError(e.to_string()))?;

        if body.stat != "ok" {
            let code = body
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string());
            let message = body
                .message
                .unwrap_or_else(|| "no message".to_string());
            return Err(FlickrError::ServiceError(format!(
                "code {}: {}",
                code, message
            )));
        }

        let photos = body.photos.ok_or_else(|| {
            FlickrError::ParseError("Response is missing the 'photos' object".to_string())
        })?;

        // Entries without a medium-size URL are skipped.
        let photo_urls = photos.photo.into_iter().filter_map(|p| p.url_m).collect();

        Ok(SearchPage {
            total_pages: photos.pages,
            photo_urls,
        })
    }

    /// Two-step random album fetch: one request to learn the page count,
    /// then a second for a page drawn uniformly from
    /// `[1, min(pages, page_cap)]`. A search that reports zero pages yields
    /// an empty album without a second request.
    pub async fn random_album(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<SearchPage, FlickrError> {
        let first = self.search(latitude, longitude, None).await?;
        if first.total_pages == 0 {
            return Ok(SearchPage {
                total_pages: 0,
                photo_urls: Vec::new(),
            });
        }
        let page = self.pick_page(first.total_pages);
        self.search(latitude, longitude, Some(page)).await
    }

    /// Download the image bytes behind a photo URL.
    pub async fn download_photo(&self, url: &str) -> Result<Vec<u8>, FlickrError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlickrError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FlickrError::NetworkError(format!(
                "Image request returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FlickrError::NetworkError(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
