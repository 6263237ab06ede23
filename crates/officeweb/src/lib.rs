//! # officeweb
//!
//! Builds the URL an embedding page points its editor frame at.
//!
//! ```
//! use officeweb::UrlOptions;
//!
//! let url = officeweb::generate_url(&UrlOptions::new("https://office.example", "t0k", "f-1")).unwrap();
//! assert_eq!(url.as_str(), "https://office.example/v1/file/page?file_id=f-1&token=t0k");
//! ```

use std::fmt;
use std::str::FromStr;

use url::Url;

/// Where the editor page lives on a deployment.
pub const PAGE_PATH: &str = "/v1/file/page";

#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("invalid endpoint: {0}")]
    Parse(#[from] url::ParseError),
    #[error("endpoint scheme '{0}' is not http or https")]
    UnsupportedScheme(String),
}

pub type Result<T> = std::result::Result<T, UrlError>;

/// Languages the editor UI ships in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    EnUs,
    ZhCn,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnUs => "en-US",
            Self::ZhCn => "zh-CN",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language '{0}'")]
pub struct UnsupportedLang(pub String);

impl FromStr for Lang {
    type Err = UnsupportedLang;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en-US" => Ok(Self::EnUs),
            "zh-CN" => Ok(Self::ZhCn),
            other => Err(UnsupportedLang(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlOptions {
    /// Base address of the deployment.
    pub endpoint: String,
    pub token: String,
    pub file_id: String,
    /// Dropped from the URL unless it names a supported [`Lang`].
    pub lang: Option<String>,
}

impl UrlOptions {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            file_id: file_id.into(),
            lang: None,
        }
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }
}

/// Builds the editor page URL for one file.
///
/// Any path or query on the endpoint is replaced.
pub fn generate_url(options: &UrlOptions) -> Result<Url> {
    let mut url = Url::parse(&options.endpoint)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }

    url.set_path(PAGE_PATH);
    url.set_fragment(None);

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("file_id", &options.file_id);
        query.append_pair("token", &options.token);
        if let Some(lang) = supported_lang(options.lang.as_deref()) {
            query.append_pair("lang", lang.as_str());
        }
    }

    Ok(url)
}

fn supported_lang(lang: Option<&str>) -> Option<Lang> {
    match lang?.parse() {
        Ok(lang) => Some(lang),
        Err(UnsupportedLang(lang)) => {
            tracing::warn!(%lang, "dropping unsupported language from editor url");
            None
        }
    }
}
