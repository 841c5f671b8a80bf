//! Query-string director.
//!
//! Maps `GET /<path>?w=200&h=300&crop=true` to `<base_url>/<path>` with the
//! transform encoded in the query:
//!
//! | Param | Meaning |
//! |---|---|
//! | `w`, `h` | Bounding box; omitted or 0 keeps the original |
//! | `crop` | Fill the box exactly instead of fitting inside it |
//! | `format` | Force `jpeg`, `png`, `gif` or `webp` output |
//! | `q` | Lossy quality, 1–100 |
//! | `sharpen` | Sharpen after downscaling |
//! | `blur` | Gaussian blur sigma, 0–8 |
//! | `o` | Whole [`Options`] as compact JSON; the params above override it |
//!
//! Deadlines and the decode buffer budget always come from the server's
//! defaults; a client cannot loosen them.

use crate::imaging::{Format, Options, Quality};
use crate::proxy::{Direction, Director};
use axum::extract::Query;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct ThumbnailQuery {
    #[serde(rename = "w")]
    width: Option<u32>,
    #[serde(rename = "h")]
    height: Option<u32>,
    crop: Option<bool>,
    format: Option<String>,
    #[serde(rename = "q")]
    quality: Option<u32>,
    sharpen: Option<bool>,
    blur: Option<f64>,
    #[serde(rename = "o")]
    options: Option<String>,
}

pub struct QueryDirector {
    base: Url,
    defaults: Options,
}

impl QueryDirector {
    /// Request paths are resolved below `base`.
    pub fn new(mut base: Url, defaults: Options) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base, defaults }
    }

    fn origin(&self, path: &str) -> Option<Url> {
        let url = self.base.join(path.trim_start_matches('/')).ok()?;
        // `..` segments or an absolute URL in the path must not escape.
        url.as_str().starts_with(self.base.as_str()).then_some(url)
    }

    fn options(&self, query: ThumbnailQuery) -> Option<Options> {
        let mut options = match query.options {
            Some(json) => Options::from_json(&json).ok()?,
            None => self.defaults.clone(),
        };
        options.max_buffer_pixels = self.defaults.max_buffer_pixels;
        options.max_queue_duration = self.defaults.max_queue_duration;
        options.max_processing_duration = self.defaults.max_processing_duration;

        if let Some(width) = query.width {
            options.width = width;
        }
        if let Some(height) = query.height {
            options.height = height;
        }
        if let Some(crop) = query.crop {
            options.crop = crop;
        }
        if let Some(name) = query.format {
            options.save.format = Some(Format::from_name(&name)?);
        }
        if let Some(quality) = query.quality {
            options.save.quality = Quality::new(quality);
        }
        if let Some(sharpen) = query.sharpen {
            options.sharpen = sharpen;
        }
        if let Some(sigma) = query.blur {
            options.blur_sigma = sigma;
        }
        Some(options)
    }
}

impl Director for QueryDirector {
    fn direct(&self, request: &Parts) -> Direction {
        if request.method != Method::GET && request.method != Method::HEAD {
            return Direction::Respond(StatusCode::METHOD_NOT_ALLOWED);
        }
        let Ok(Query(query)) = Query::<ThumbnailQuery>::try_from_uri(&request.uri) else {
            debug!(uri = %request.uri, "Unparseable query");
            return Direction::Respond(StatusCode::BAD_REQUEST);
        };
        let Some(options) = self.options(query) else {
            debug!(uri = %request.uri, "Bad transform options");
            return Direction::Respond(StatusCode::BAD_REQUEST);
        };
        let Some(origin) = self.origin(request.uri.path()) else {
            debug!(uri = %request.uri, "Path escapes origin");
            return Direction::Respond(StatusCode::BAD_REQUEST);
        };
        Direction::Fetch { origin, options }
    }
}
