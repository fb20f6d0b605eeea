use base64::Engine;
use eyre::Result;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

/// Credentials presented to a pre-authenticated gateway in front of the
/// backend. Session and signature acquisition happen outside this crate.
#[derive(Clone)]
pub enum Auth {
    /// Use an API key via the Authorization header
    Apikey(String),
    /// Use username and password via Basic Auth headers
    Basic(String, String),
    /// Don't send any authentication
    None,
}

impl Auth {
    /// Read credentials from `SDUMP_API_KEY` or
    /// `SDUMP_USERNAME`/`SDUMP_PASSWORD`, falling back to [`Auth::None`]
    pub fn from_env() -> Self {
        if let Ok(apikey) = std::env::var("SDUMP_API_KEY") {
            Self::Apikey(apikey)
        } else if let (Ok(username), Ok(password)) = (
            std::env::var("SDUMP_USERNAME"),
            std::env::var("SDUMP_PASSWORD"),
        ) {
            Self::Basic(username, password)
        } else {
            Self::None
        }
    }

    /// Add the Authorization header for these credentials
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        match self {
            Self::Basic(username, password) => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Basic {}", credentials))?,
                );
            }
            Self::Apikey(apikey) => {
                let mut value = HeaderValue::from_str(&format!("ApiKey {}", apikey))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Self::None => {}
        }
        Ok(())
    }
}

impl std::fmt::Display for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apikey(_) => write!(f, "Apikey"),
            Self::Basic(_, _) => write!(f, "Basic"),
            Self::None => write!(f, "None"),
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
