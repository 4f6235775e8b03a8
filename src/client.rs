use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::{Credentials, load_credentials};
use crate::error::{Error, Result, error_from_status};
use crate::util::endpoint;

/// The BepiColombo WebMUST instance, used when no URL is given.
pub const DEFAULT_URL: &str = "https://bepicolombo.esac.esa.int/webclient-must/mustlink";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// Providers owned by this pseudo-user are internal to WebMUST.
const SCRIPTING_ENGINE: &str = "SCRIPTING ENGINE";

/// The logged-in user as reported by WebMUST.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserInfo {
    pub login: String,
    /// Every other field of the user record, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(rename = "maxDuration")]
    max_duration: &'a str,
}

#[derive(Deserialize)]
struct LoginReply {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Deserialize)]
struct ProviderEntry {
    name: String,
    #[serde(default)]
    user: Option<String>,
}

/// Configures and opens a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    url: Option<String>,
    config_file: Option<PathBuf>,
    credentials: Option<Credentials>,
    timeout: Option<Duration>,
    proxy: Option<String>,
    provider: Option<String>,
}

impl ClientBuilder {
    /// Base URL of the WebMUST instance. Defaults to [`DEFAULT_URL`].
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// YAML file holding the credentials. Defaults to the first `mustlink.yml`
    /// found in `$APPDATA`, `$XDG_CONFIG_HOME` or `~/.config`.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Use these credentials instead of reading a file.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Per-request timeout. Defaults to 60 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Route traffic through a SOCKS5 proxy given as `host:port`.
    /// Host names are resolved by the proxy.
    pub fn proxy(mut self, host_port: impl Into<String>) -> Self {
        self.proxy = Some(host_port.into());
        self
    }

    /// Provider used by queries that are not given one explicitly.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Resolves credentials, logs in and loads the provider list.
    ///
    /// Credentials are resolved before any network traffic; a configuration
    /// error means no request was sent.
    pub fn build(self) -> Result<Client> {
        let credentials = match self.credentials {
            Some(c) => c,
            None => load_credentials(self.config_file.as_deref())?,
        };

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mustlink-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("mustlink-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT));

        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(format!("socks5h://{proxy}"))
                .map_err(|e| Error::InvalidArgument(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build()?;
        let url = self
            .url
            .unwrap_or_else(|| DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let base =
            Url::parse(&url).map_err(|e| Error::InvalidArgument(format!("invalid url {url}: {e}")))?;

        let token = login(&http, &base, &credentials)?;

        let mut client = Client {
            url,
            base,
            token,
            user: UserInfo::default(),
            providers: Vec::new(),
            default_provider: None,
            http,
        };
        client.user = client.fetch_user()?;
        client.providers = client.fetch_providers()?;

        if let Some(provider) = self.provider {
            client.set_default_provider(&provider)?;
        }

        Ok(client)
    }
}

/// An authenticated session with one WebMUST instance.
///
/// Every query blocks until the server answers or the timeout fires. Nothing
/// is retried and nothing is cached between calls.
#[derive(Clone)]
pub struct Client {
    url: String,
    base: Url,
    token: String,
    user: UserInfo,
    providers: Vec<String>,
    default_provider: Option<String>,

    http: HttpClient,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("user", &self.user.login)
            .field("providers", &self.providers)
            .field("default_provider", &self.default_provider)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Opens a session against `url` (or [`DEFAULT_URL`]) with credentials
    /// from `config_file` (or the default search path).
    pub fn new(url: Option<&str>, config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(url) = url {
            builder = builder.url(url);
        }
        if let Some(path) = config_file {
            builder = builder.config_file(path);
        }
        builder.build()
    }

    /// Equivalent to `Client::new(None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The user that logged in when the client was built.
    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    /// Names of the data providers visible to this user, e.g. `BEPICRUISE`.
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Sets the provider used when a query is given `None`.
    pub fn set_default_provider(&mut self, provider: &str) -> Result<()> {
        let provider = self.check_provider(provider)?;
        self.default_provider = Some(provider.to_string());
        Ok(())
    }

    fn check_provider<'a>(&self, provider: &'a str) -> Result<&'a str> {
        if self.providers.iter().any(|p| p == provider) {
            Ok(provider)
        } else {
            Err(Error::UnknownProvider(provider.to_string()))
        }
    }

    pub(crate) fn resolve_provider(&self, provider: Option<&str>) -> Result<String> {
        match provider {
            Some(p) => self.check_provider(p).map(str::to_string),
            None => self.default_provider.clone().ok_or_else(|| {
                Error::InvalidArgument("a provider must be specified".to_string())
            }),
        }
    }

    fn fetch_user(&self) -> Result<UserInfo> {
        let user: UserInfo = self.get_json(&self.endpoint(&["usermanagement", "userinfo"])?, &[])?;
        info!("user {} currently logged in", user.login);
        Ok(user)
    }

    fn fetch_providers(&self) -> Result<Vec<String>> {
        let entries: Vec<ProviderEntry> = self.get_json(&self.endpoint(&["dataproviders"])?, &[])?;
        let providers: Vec<String> = entries
            .into_iter()
            .filter(|p| p.user.as_deref().is_some_and(|u| u != SCRIPTING_ENGINE))
            .map(|p| p.name)
            .collect();
        info!("{} providers found", providers.len());
        Ok(providers)
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, &self.token)
    }

    /// URL of a resource below the base URL.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.base, segments)
    }

    /// GETs `endpoint` with `query` appended and decodes the JSON reply.
    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &Url,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut url = endpoint.clone();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        self.fetch_json(url)
    }

    /// GETs a fully built URL with an authenticated request.
    pub(crate) fn fetch_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let resp = self.apply_auth(self.http.get(url.as_str())).send()?;
        read_json(resp, url.as_str())
    }
}

fn login(http: &HttpClient, base: &Url, credentials: &Credentials) -> Result<String> {
    let url = endpoint(base, &["auth", "login"])?;
    let body = LoginRequest {
        username: credentials.login(),
        password: credentials.password(),
        max_duration: "false",
    };
    debug!("POST {} as {}", url, credentials.login());
    let resp = http.post(url.as_str()).json(&body).send()?;
    let reply: LoginReply = read_json(resp, url.as_str())?;
    let token = reply
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::parse(url.as_str(), "login reply carries no token"))?;
    debug!("token retrieved");
    Ok(token)
}

fn read_json<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    let text = resp.text()?;
    if !status.is_success() {
        return Err(error_from_status(status, url, &text));
    }
    serde_json::from_str::<T>(&text).map_err(|e| Error::parse(url, e.to_string()))
}
