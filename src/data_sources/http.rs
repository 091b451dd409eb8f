use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::time::Duration;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use thiserror::Error;
use crate::data_sources::data_source::{BoxError, DataSource};

#[derive(Debug, Error)]
pub enum HttpSourceError {
    #[error("invalid endpoint url '{0}'")]
    InvalidEndpoint(String, #[source] url::ParseError),
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed with status {status}: {body}")]
    UnsuccessfulStatus { url: Url, status: StatusCode, body: String },
    #[error("{}", unsupported_content_type_message(.0, .1))]
    UnsupportedContentType(String, Option<&'static str>), // Optional feature name can be provided
    #[error("failed to parse response body with Content-Type: {0}")]
    ContentParse(String, #[source] BoxError),
}

fn unsupported_content_type_message(content_type: &str, feature: &Option<&'static str>) -> String {
    match feature {
        Some(feature) => format!("content type '{content_type}' is supported only with feature '{feature}', which is disabled"),
        None => format!("unsupported content type: {content_type}"),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

/// Connection settings for [`HttpDataSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HttpSourceConfig {
    pub host: String,
    pub port: u16,
    #[cfg_attr(feature = "serde", serde(default))]
    pub scheme: Scheme,
    /// Prepended to every request path, e.g. `/api`
    #[cfg_attr(feature = "serde", serde(default))]
    pub root_path_prefix: Option<String>,
    #[cfg_attr(feature = "serde", serde(default = "default_timeout_ms"))]
    pub connect_timeout_ms: u64,
    #[cfg_attr(feature = "serde", serde(default = "default_timeout_ms"))]
    pub op_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl HttpSourceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HttpSourceConfig {
            host: host.into(),
            port,
            scheme: Scheme::Http,
            root_path_prefix: None,
            connect_timeout_ms: default_timeout_ms(),
            op_timeout_ms: default_timeout_ms(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            root_path_prefix: self.root_path_prefix.clone(),
        }
    }

    /// Client with the configured timeouts. `name` becomes the user agent.
    pub fn client(&self, name: &str) -> Result<Client, HttpSourceError> {
        Client::builder()
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .timeout(Duration::from_millis(self.op_timeout_ms))
            .user_agent(name)
            .build()
            .map_err(HttpSourceError::Client)
    }
}

/// Base address requests are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub root_path_prefix: Option<String>,
}

impl Endpoint {
    /// Join the root path prefix and `path` onto the endpoint base.
    pub fn url(&self, path: &str) -> Result<Url, HttpSourceError> {
        let prefix = self.root_path_prefix.as_deref().unwrap_or("").trim_matches('/');
        let path = path.trim_start_matches('/');
        let raw = if prefix.is_empty() {
            format!("{}://{}:{}/{}", self.scheme, self.host, self.port, path)
        } else {
            format!("{}://{}:{}/{}/{}", self.scheme, self.host, self.port, prefix, path)
        };
        Url::parse(&raw).map_err(|e| HttpSourceError::InvalidEndpoint(raw, e))
    }
}

/// Builds the request for each refresh. Returning `None` skips the call and the
/// refresh counts as producing no value.
pub trait RequestFactory: Send + Sync {
    fn request(&self, client: &Client, url: Url) -> Option<RequestBuilder>;
}

/// Plain `GET` of the resolved url.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetRequest;

impl RequestFactory for GetRequest {
    fn request(&self, client: &Client, url: Url) -> Option<RequestBuilder> {
        Some(client.get(url))
    }
}

impl<F> RequestFactory for F
where
    F: Fn(&Client, Url) -> Option<RequestBuilder> + Send + Sync,
{
    fn request(&self, client: &Client, url: Url) -> Option<RequestBuilder> {
        self(client, url)
    }
}

/// Turns a response body into a value.
pub trait Marshaller<Data>: Send + Sync {
    /// `content_type` is the raw `Content-Type` header, if the response had one.
    fn marshal(&self, content_type: Option<&str>, body: &[u8]) -> Result<Data, HttpSourceError>;
}

/// [`DataSource`] that loads one value per refresh over HTTP.
///
/// Any non-2xx response fails the refresh.
pub struct HttpDataSource<Data, M, R = GetRequest> {
    name: String,
    client: Client,
    endpoint: Endpoint,
    path: String,
    requests: R,
    marshaller: M,
    _data: PhantomData<fn() -> Data>,
}

impl<Data, M: Marshaller<Data>> HttpDataSource<Data, M, GetRequest> {
    /// # Errors
    /// [`HttpSourceError::Client`] if the http client can't be built.
    pub fn new(config: &HttpSourceConfig, path: impl Into<String>, marshaller: M, name: impl Into<String>) -> Result<Self, HttpSourceError> {
        let name = name.into();
        Ok(HttpDataSource {
            client: config.client(&name)?,
            endpoint: config.endpoint(),
            path: path.into(),
            requests: GetRequest,
            marshaller,
            name,
            _data: PhantomData,
        })
    }

    /// Same as [`new`](Self::new) with a caller supplied client.
    pub fn with_client(client: Client, endpoint: Endpoint, path: impl Into<String>, marshaller: M, name: impl Into<String>) -> Self {
        HttpDataSource {
            name: name.into(),
            client,
            endpoint,
            path: path.into(),
            requests: GetRequest,
            marshaller,
            _data: PhantomData,
        }
    }
}

impl<Data, M: Marshaller<Data>, R: RequestFactory> HttpDataSource<Data, M, R> {
    /// Replace the default `GET` with a custom request.
    pub fn request_factory<R2: RequestFactory>(self, requests: R2) -> HttpDataSource<Data, M, R2> {
        HttpDataSource {
            name: self.name,
            client: self.client,
            endpoint: self.endpoint,
            path: self.path,
            requests,
            marshaller: self.marshaller,
            _data: PhantomData,
        }
    }

    async fn fetch(&self) -> Result<Option<Data>, BoxError> {
        let url = self.endpoint.url(&self.path)?;
        let Some(request) = self.requests.request(&self.client, url.clone()) else {
            tracing::debug!(source = %self.name, %url, "request factory skipped the call");
            return Ok(None);
        };

        let response = request.send().await.map_err(|e| {
            tracing::error!(source = %self.name, %url, error = %e, "http request failed");
            e
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(source = %self.name, %url, %status, %body, "http request returned an error status");
            return Err(HttpSourceError::UnsuccessfulStatus { url, status, body }.into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;
        Ok(Some(self.marshaller.marshal(content_type.as_deref(), &body)?))
    }
}

impl<Data, M, R> DataSource<Data> for HttpDataSource<Data, M, R>
where
    M: Marshaller<Data>,
    R: RequestFactory,
{
    async fn produce(&self) -> Result<Option<Data>, BoxError> {
        self.fetch().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(feature = "serde")]
pub mod serde_marshaller {
    use std::marker::PhantomData;
    use serde::de::DeserializeOwned;
    use crate::data_sources::http::{HttpSourceError, Marshaller};
    use crate::data_sources::http::HttpSourceError::{ContentParse, UnsupportedContentType};

    /// Body formats understood by [`SerdeMarshaller`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Format {
        Json,
        Toml,
        Yaml,
    }

    impl Format {
        /// Format for a `Content-Type` header value, parameters such as `charset` are ignored.
        pub fn from_content_type(content_type: &str) -> Option<Format> {
            let mime = content_type.split(';').next().unwrap_or("").trim();
            match mime.to_ascii_lowercase().as_str() {
                "application/json" | "text/json" => Some(Format::Json),
                // NOTE: as of 21.06.2024 no MIME type for TOML is registered officially
                "application/toml" | "text/toml" => Some(Format::Toml),
                "application/yaml" | "application/x-yaml" | "text/yaml" => Some(Format::Yaml),
                _ => None,
            }
        }

        fn mime(self) -> &'static str {
            match self {
                Format::Json => "application/json",
                Format::Toml => "application/toml",
                Format::Yaml => "application/yaml",
            }
        }
    }

    /// Deserializes bodies with serde, choosing the format from the `Content-Type` header.
    pub struct SerdeMarshaller<Data> {
        fallback: Option<Format>,
        _data: PhantomData<fn() -> Data>,
    }

    impl<Data> Default for SerdeMarshaller<Data> {
        fn default() -> Self {
            SerdeMarshaller { fallback: None, _data: PhantomData }
        }
    }

    impl<Data> SerdeMarshaller<Data> {
        /// Format used when the response has no `Content-Type` or one that is not recognized.
        pub fn with_fallback(fallback: Format) -> Self {
            SerdeMarshaller { fallback: Some(fallback), _data: PhantomData }
        }
    }

    impl<Data: DeserializeOwned> Marshaller<Data> for SerdeMarshaller<Data> {
        fn marshal(&self, content_type: Option<&str>, body: &[u8]) -> Result<Data, HttpSourceError> {
            let format = match content_type.and_then(Format::from_content_type).or(self.fallback) {
                Some(format) => format,
                None => return Err(UnsupportedContentType(content_type.unwrap_or("<none>").to_string(), None)),
            };

            match format {
                Format::Json => from_json(body),
                Format::Toml => from_toml(body),
                Format::Yaml => from_yaml(body),
            }
        }
    }

    fn parse_error(format: Format, err: impl std::error::Error + Send + Sync + 'static) -> HttpSourceError {
        ContentParse(format.mime().to_string(), Box::new(err))
    }

    fn disabled(format: Format, feature: &'static str) -> HttpSourceError {
        UnsupportedContentType(format.mime().to_string(), Some(feature))
    }

    #[cfg(feature = "json")]
    fn from_json<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, HttpSourceError> {
        serde_json::from_slice(body).map_err(|e| parse_error(Format::Json, e))
    }

    #[cfg(not(feature = "json"))]
    fn from_json<Data>(_body: &[u8]) -> Result<Data, HttpSourceError> {
        Err(disabled(Format::Json, "json"))
    }

    #[cfg(feature = "toml")]
    fn from_toml<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, HttpSourceError> {
        let text = std::str::from_utf8(body).map_err(|e| parse_error(Format::Toml, e))?;
        toml::from_str(text).map_err(|e| parse_error(Format::Toml, e))
    }

    #[cfg(not(feature = "toml"))]
    fn from_toml<Data>(_body: &[u8]) -> Result<Data, HttpSourceError> {
        Err(disabled(Format::Toml, "toml"))
    }

    #[cfg(feature = "yaml")]
    fn from_yaml<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, HttpSourceError> {
        serde_yaml::from_slice(body).map_err(|e| parse_error(Format::Yaml, e))
    }

    #[cfg(not(feature = "yaml"))]
    fn from_yaml<Data>(_body: &[u8]) -> Result<Data, HttpSourceError> {
        Err(disabled(Format::Yaml, "yaml"))
    }

}
