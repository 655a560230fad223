//! Provider endpoint resolution for github.com and GitHub Enterprise Server.

use oauth2::{DeviceAuthorizationUrl, TokenUrl};
use url::Url;

use crate::config::AuthConfig;
use crate::error::Result;

const DEVICE_CODE_PATH: &str = "login/device/code";
const TOKEN_PATH: &str = "login/oauth/access_token";
const USER_PATH: &str = "user";

/// The three endpoints the device flow talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub device_authorization_url: DeviceAuthorizationUrl,
    pub token_url: TokenUrl,
    /// Identity endpoint used to validate issued tokens.
    pub user_url: Url,
}

impl ProviderEndpoints {
    /// Builds endpoints from a web host (device/token) and an API host (identity).
    ///
    /// Base paths are preserved, so an Enterprise API root such as
    /// `https://ghe.example.com/api/v3` resolves to `.../api/v3/user`.
    ///
    /// # Errors
    ///
    /// Returns an error if either base cannot be joined with the endpoint paths.
    pub fn from_hosts(web_url: &Url, api_url: &Url) -> Result<Self> {
        Ok(Self {
            device_authorization_url: DeviceAuthorizationUrl::from_url(join(
                web_url,
                DEVICE_CODE_PATH,
            )?),
            token_url: TokenUrl::from_url(join(web_url, TOKEN_PATH)?),
            user_url: join(api_url, USER_PATH)?,
        })
    }

    /// Endpoints for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured hosts are not valid base URLs.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::from_hosts(&config.web_url, &config.api_url)
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_dot_com_endpoints() {
        let endpoints = ProviderEndpoints::from_config(&AuthConfig::default()).unwrap();
        assert_eq!(
            endpoints.device_authorization_url.url().as_str(),
            "https://github.com/login/device/code"
        );
        assert_eq!(
            endpoints.token_url.url().as_str(),
            "https://github.com/login/oauth/access_token"
        );
        assert_eq!(endpoints.user_url.as_str(), "https://api.github.com/user");
    }

    #[test]
    fn enterprise_api_prefix_is_preserved() {
        let web = Url::parse("https://ghe.example.com").unwrap();
        let api = Url::parse("https://ghe.example.com/api/v3").unwrap();
        let endpoints = ProviderEndpoints::from_hosts(&web, &api).unwrap();

        assert_eq!(
            endpoints.user_url.as_str(),
            "https://ghe.example.com/api/v3/user"
        );
        assert_eq!(
            endpoints.device_authorization_url.url().as_str(),
            "https://ghe.example.com/login/device/code"
        );
    }
}
