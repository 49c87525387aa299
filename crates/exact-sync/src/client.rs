// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Annotation, Error, Image, ImageID, ImageSetID, ImageSourceType, Settings,
    api::NewAnnotation,
    gateway::{Gateway, Page, Query, Resource},
    retry::{create_retry_policy, log_retry_configuration},
};
use log::{Level, debug, error, log_enabled, trace};
use reqwest::{
    Method, RequestBuilder,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{path::Path, time::Duration};
use url::Url;

const USER_AGENT: &str = concat!("exact-sync/", env!("CARGO_PKG_VERSION"));

/// Bulk create answers either with the created list or with a page of it.
#[derive(Deserialize)]
#[serde(untagged)]
enum CreatedAnnotations {
    List(Vec<Annotation>),
    Page(Page<Annotation>),
}

/// HTTP client for the EXACT REST API.
///
/// The client authenticates every request with HTTP basic auth and relies on
/// the reqwest retry policy from [`crate::retry`] for rate limiting. It holds
/// no session state, so it is cheap to clone and safe to share between
/// concurrent requests.
///
/// # Examples
///
/// ```rust,no_run
/// use exact_sync::{Client, Settings, SyncOptions, Synchronizer};
///
/// # async fn example() -> Result<(), exact_sync::Error> {
/// let settings = Settings::load(None)?;
/// let client = Client::new(&settings)?.with_credentials("user", "secret");
/// let sync = Synchronizer::new(client, SyncOptions::try_from(&settings)?);
/// let target = sync.get_target("Team", "Images").await?;
/// println!("{} annotation types", target.annotation_types().len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .finish()
    }
}

impl Client {
    /// Creates a client for the server named in the settings.
    ///
    /// No request is sent until the first gateway call.
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        log_retry_configuration(settings);

        let url = Url::parse(&format!("{}/", settings.server.trim_end_matches('/')))?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidParameters(format!(
                "Server URL cannot be used as a base: {}",
                settings.server
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.timeout))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .retry(create_retry_policy(settings.max_retries))
            .build()?;

        Ok(Client {
            http,
            url,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Returns a new client authenticating as the given user.
    pub fn with_credentials(&self, username: &str, password: &str) -> Self {
        Client {
            username: Some(username.to_owned()),
            password: Some(password.to_owned()),
            ..self.clone()
        }
    }

    /// The server root URL.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self
            .http
            .request(method, url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);

        match &self.username {
            Some(username) => req.basic_auth(username, self.password.as_deref()),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, Error> {
        let body = self.send(req).await?;
        match serde_json::from_slice(&body) {
            Ok(result) => Ok(result),
            Err(err) => {
                error!("Invalid JSON Response: {}", String::from_utf8_lossy(&body));
                Err(err.into())
            }
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Vec<u8>, Error> {
        let res = req.send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if log_enabled!(Level::Trace) {
            trace!("Response [{}]: {}", status, String::from_utf8_lossy(&body));
        }

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(Error::RemoteError(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ))
        }
    }

    fn trace_body<B: Serialize>(method: &str, url: &Url, body: &B) -> Result<(), Error> {
        if log_enabled!(Level::Trace) {
            trace!(
                "{} {}: {}",
                method,
                url,
                serde_json::to_string_pretty(body)?
            );
        }
        Ok(())
    }
}

impl Gateway for Client {
    async fn list<R: Resource>(&self, query: &Query) -> Result<Page<R>, Error> {
        let url = self.endpoint(R::ENDPOINT)?;
        debug!("GET {} {:?}", url, query.params());
        let req = self.request(Method::GET, url).query(query.params());
        self.send_json(req).await
    }

    async fn retrieve<R: Resource>(&self, id: u64) -> Result<R, Error> {
        let url = self.endpoint(&format!("{}{}/", R::ENDPOINT, id))?;
        debug!("GET {}", url);
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn create<R: Resource, B: Serialize + Sync>(&self, body: &B) -> Result<R, Error> {
        let url = self.endpoint(R::ENDPOINT)?;
        Self::trace_body("POST", &url, body)?;
        let req = self.request(Method::POST, url).json(body);
        self.send_json(req).await
    }

    async fn update<R: Resource>(&self, id: u64, patch: &serde_json::Value) -> Result<R, Error> {
        let url = self.endpoint(&format!("{}{}/", R::ENDPOINT, id))?;
        Self::trace_body("PATCH", &url, patch)?;
        let req = self.request(Method::PATCH, url).json(patch);
        self.send_json(req).await
    }

    async fn delete<R: Resource>(&self, id: u64) -> Result<(), Error> {
        let url = self.endpoint(&format!("{}{}/", R::ENDPOINT, id))?;
        debug!("DELETE {}", url);
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn upload_image(
        &self,
        image_set: ImageSetID,
        path: &Path,
        source: ImageSourceType,
    ) -> Result<Image, Error> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidParameters(format!("Invalid image path {:?}", path)))?
            .to_owned();
        let bytes = tokio::fs::read(path).await?;
        debug!("Uploading {} ({} bytes)", filename, bytes.len());

        let form = Form::new()
            .text("image_type", source.code().to_string())
            .text("image_set", image_set.to_string())
            .part("file_path", Part::bytes(bytes).file_name(filename));

        let url = self.endpoint(Image::ENDPOINT)?;
        let req = self.request(Method::POST, url).multipart(form);
        let page: Page<Image> = self.send_json(req).await?;
        page.results
            .into_iter()
            .next()
            .ok_or(Error::InvalidResponse)
    }

    async fn download_image(&self, id: ImageID, target: &Path) -> Result<(), Error> {
        let url = self.endpoint(&format!("{}{}/download/", Image::ENDPOINT, id))?;
        debug!("GET {} -> {:?}", url, target);
        let req = self
            .request(Method::GET, url)
            .query(&[("original_image", "true")]);
        let body = self.send(req).await?;
        tokio::fs::write(target, body).await?;
        Ok(())
    }

    async fn create_annotations(&self, body: &[NewAnnotation]) -> Result<Vec<Annotation>, Error> {
        let url = self.endpoint(Annotation::ENDPOINT)?;
        Self::trace_body("POST", &url, &body)?;
        let req = self.request(Method::POST, url).json(body);
        let created: CreatedAnnotations = self.send_json(req).await?;
        match created {
            CreatedAnnotations::List(list) => Ok(list),
            CreatedAnnotations::Page(page) => Ok(page.results),
        }
    }

    async fn delete_annotations(&self, ids: &str) -> Result<(), Error> {
        let url = self.endpoint(&format!("{}{}/multiple_delete/", Annotation::ENDPOINT, ids))?;
        debug!("DELETE {}", url);
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}
