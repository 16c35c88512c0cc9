//! Properties file loading and typed settings

use crate::{CoreError, CoreResult};
use mailprobe_auth::{AuthorizationCodeFlow, DeviceFlow, OAuth2Config};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Recognized configuration keys
pub mod keys {
    pub const USER: &str = "mail.user";
    pub const SHARED_MAILBOX: &str = "mail.shared.mailbox.address";
    pub const TEST_RECIPIENT: &str = "mail.test.recipient";
    pub const SMTP_HOST: &str = "mail.smtp.host";
    pub const SMTP_PORT: &str = "mail.smtp.port";
    pub const IMAP_HOST: &str = "mail.imap.host";
    pub const IMAP_PORT: &str = "mail.imap.port";
    pub const CLIENT_ID: &str = "mail.oauth.client.id";
    pub const CLIENT_SECRET: &str = "mail.oauth.client.secret";
    pub const REDIRECT_URI: &str = "mail.oauth.redirect.uri";
    pub const AUTH_URL: &str = "mail.oauth.auth.url";
    pub const TOKEN_URL: &str = "mail.oauth.token.url";
    pub const DEVICE_CODE_URL: &str = "mail.oauth.devicecode.url";
    pub const SCOPE: &str = "mail.oauth.scope";
}

/// Flat key/value mapping read from a `.properties` source
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    /// Parse properties from a byte stream
    ///
    /// Follows the Java `.properties` format: ISO-8859-1 text, `=`, `:` or
    /// whitespace separators, `#` and `!` comments, backslash continuations
    /// and escapes. When a key repeats, the last value wins.
    pub fn read(input: impl Read) -> CoreResult<Self> {
        let entries = java_properties::read(input).map_err(|e| CoreError::ConfigMalformed {
            line: e.line_number(),
            reason: e.to_string(),
        })?;
        Ok(Self { entries })
    }

    /// Read and parse a properties file
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        info!("Reading configuration from {}", path.display());

        let file = File::open(path).map_err(|e| CoreError::ConfigUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let properties = Self::read(BufReader::new(file))?;
        debug!("Loaded {} properties", properties.len());
        Ok(properties)
    }

    /// Raw value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were parsed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Host and port of a mail server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Mailbox and server settings for the connection tests
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Primary user, the identity that owns the token
    pub user: String,
    /// Shared mailbox to read from and send as
    pub shared_mailbox: Option<String>,
    /// Recipient list for the send-as test, comma separated
    pub test_recipient: Option<String>,
    /// SMTP submission server
    pub smtp: ServerConfig,
    /// IMAP server, present whenever a shared mailbox is configured
    pub imap: Option<ServerConfig>,
}

impl MailConfig {
    /// Individual addresses of the send-as recipient list
    pub fn test_recipients(&self) -> Vec<String> {
        self.test_recipient
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Typed access to the loaded properties
#[derive(Debug, Clone)]
pub struct Settings {
    properties: Properties,
}

impl Settings {
    /// Wrap parsed properties
    pub fn new(properties: Properties) -> Self {
        Self { properties }
    }

    /// Load settings from a properties file
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        Properties::load(path).map(Self::new)
    }

    /// Value for a key, with blank values treated as unset
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Value for a key that must be present and non-blank
    pub fn require(&self, key: &str) -> CoreResult<&str> {
        self.optional(key)
            .ok_or_else(|| CoreError::ConfigMissing(key.to_string()))
    }

    fn port(&self, key: &str) -> CoreResult<u16> {
        let raw = self.require(key)?;
        match raw.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(CoreError::ConfigInvalid {
                key: key.to_string(),
                reason: format!("{:?} is not a port number", raw),
            }),
        }
    }

    fn url(&self, key: &str) -> CoreResult<Url> {
        let raw = self.require(key)?;
        Url::parse(raw).map_err(|e| CoreError::ConfigInvalid {
            key: key.to_string(),
            reason: format!("{:?} is not a valid URL: {}", raw, e),
        })
    }

    fn server(&self, host_key: &str, port_key: &str) -> CoreResult<ServerConfig> {
        Ok(ServerConfig {
            host: self.require(host_key)?.to_string(),
            port: self.port(port_key)?,
        })
    }

    /// Mailbox and server settings
    pub fn mail_config(&self) -> CoreResult<MailConfig> {
        let shared_mailbox = self.optional(keys::SHARED_MAILBOX).map(str::to_string);
        let imap = match shared_mailbox {
            Some(_) => Some(self.server(keys::IMAP_HOST, keys::IMAP_PORT)?),
            None => None,
        };

        Ok(MailConfig {
            user: self.require(keys::USER)?.to_string(),
            shared_mailbox,
            test_recipient: self.optional(keys::TEST_RECIPIENT).map(str::to_string),
            smtp: self.server(keys::SMTP_HOST, keys::SMTP_PORT)?,
            imap,
        })
    }

    /// OAuth2 client settings shared by both flows
    pub fn oauth2_config(&self) -> CoreResult<OAuth2Config> {
        let config = OAuth2Config::new(
            self.require(keys::CLIENT_ID)?,
            self.url(keys::TOKEN_URL)?,
            self.require(keys::SCOPE)?,
        );
        Ok(match self.optional(keys::CLIENT_SECRET) {
            Some(secret) => config.with_client_secret(secret),
            None => config,
        })
    }

    /// Authorization code flow with browser redirect
    pub fn authorization_code_flow(&self) -> CoreResult<AuthorizationCodeFlow> {
        let config = self.oauth2_config()?;
        let auth_url = self.url(keys::AUTH_URL)?;

        // Kept verbatim; only checked for a usable port
        let redirect_uri = self.require(keys::REDIRECT_URI)?;
        let redirect = self.url(keys::REDIRECT_URI)?;
        if redirect.port_or_known_default().is_none() {
            return Err(CoreError::ConfigInvalid {
                key: keys::REDIRECT_URI.to_string(),
                reason: format!("{:?} has no port to listen on", redirect_uri),
            });
        }

        Ok(AuthorizationCodeFlow::new(config, auth_url, redirect_uri))
    }

    /// Device authorization flow
    pub fn device_flow(&self) -> CoreResult<DeviceFlow> {
        let config = self.oauth2_config()?;
        let device_code_url = self.url(keys::DEVICE_CODE_URL)?;
        Ok(DeviceFlow::new(config, device_code_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Mailbox settings
mail.user=alice@contoso.com
mail.shared.mailbox.address = shared@contoso.com
mail.test.recipient:bob@contoso.com, carol@contoso.com
! Servers
mail.smtp.host   smtp.office365.com
mail.smtp.port=587
mail.imap.host=outlook.office365.com
mail.imap.port=993

mail.oauth.client.id=client-123
mail.oauth.client.secret=
mail.oauth.redirect.uri=http://localhost:8080/callback
mail.oauth.auth.url=https://login.microsoftonline.com/common/oauth2/v2.0/authorize
mail.oauth.token.url=https://login.microsoftonline.com/common/oauth2/v2.0/token
mail.oauth.devicecode.url=https://login.microsoftonline.com/common/oauth2/v2.0/devicecode
mail.oauth.scope=https://outlook.office.com/SMTP.Send \\
    https://outlook.office.com/IMAP.AccessAsUser.All+offline_access
";

    fn parse(text: &str) -> Properties {
        Properties::read(text.as_bytes()).unwrap()
    }

    fn settings(text: &str) -> Settings {
        Settings::new(parse(text))
    }

    #[test]
    fn test_parse_separators_and_comments() {
        let props = parse(SAMPLE);
        assert_eq!(props.get("mail.user"), Some("alice@contoso.com"));
        assert_eq!(props.get("mail.shared.mailbox.address"), Some("shared@contoso.com"));
        assert_eq!(
            props.get("mail.test.recipient"),
            Some("bob@contoso.com, carol@contoso.com")
        );
        assert_eq!(props.get("mail.smtp.host"), Some("smtp.office365.com"));
        assert_eq!(props.get("mail.oauth.client.secret"), Some(""));
        assert!(props.get("# Mailbox settings").is_none());
        assert_eq!(props.len(), 14);
    }

    #[test]
    fn test_parse_continuation() {
        let props = parse(SAMPLE);
        assert_eq!(
            props.get("mail.oauth.scope"),
            Some("https://outlook.office.com/SMTP.Send https://outlook.office.com/IMAP.AccessAsUser.All+offline_access")
        );

        let props = parse("a=one\\\\\nb=two\n");
        assert_eq!(props.get("a"), Some("one\\"));
        assert_eq!(props.get("b"), Some("two"));
    }

    #[test]
    fn test_parse_escapes() {
        let props = parse("path\\ with\\ spaces = C:\\\\mail\nkey\\=name=v\ntab=a\\tb\nsnow=\\u2603\n");
        assert_eq!(props.get("path with spaces"), Some("C:\\mail"));
        assert_eq!(props.get("key=name"), Some("v"));
        assert_eq!(props.get("tab"), Some("a\tb"));
        assert_eq!(props.get("snow"), Some("\u{2603}"));
    }

    #[test]
    fn test_malformed_unicode_escape() {
        let err = Properties::read("mail.user=a@b.c\nbad=\\uZZ\n".as_bytes()).unwrap_err();
        assert!(matches!(err, CoreError::ConfigMalformed { .. }), "got {err:?}");
    }

    #[test]
    fn test_parse_whitespace_and_duplicates() {
        let props = parse("key=first\nkey=second\nspace=a\\ \nempty\n   \n");
        assert_eq!(props.get("key"), Some("second"));
        assert_eq!(props.get("space"), Some("a "));
        assert_eq!(props.get("empty"), Some(""));
        assert_eq!(props.len(), 3);

        let trimmed = settings("mail.user = alice@contoso.com   \r\nmail.smtp.host=\t\n");
        assert_eq!(trimmed.optional(keys::USER), Some("alice@contoso.com"));
        assert_eq!(trimmed.optional(keys::SMTP_HOST), None);
    }

    #[test]
    fn test_latin1_bytes() {
        let props = Properties::read(&b"mail.user=j\xf6rg@contoso.com\n"[..]).unwrap();
        assert_eq!(props.get("mail.user"), Some("j\u{f6}rg@contoso.com"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Properties::load("/nonexistent/mail.properties").unwrap_err();
        assert!(matches!(err, CoreError::ConfigUnreadable { ref path, .. } if path.ends_with("mail.properties")));
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("mailprobe-{}.properties", std::process::id()));
        std::fs::write(&path, "mail.user=alice@contoso.com\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.require(keys::USER).unwrap(), "alice@contoso.com");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mail_config() {
        let config = settings(SAMPLE).mail_config().unwrap();
        assert_eq!(config.user, "alice@contoso.com");
        assert_eq!(config.shared_mailbox.as_deref(), Some("shared@contoso.com"));
        assert_eq!(
            config.smtp,
            ServerConfig {
                host: "smtp.office365.com".to_string(),
                port: 587
            }
        );
        assert_eq!(config.imap.as_ref().map(|s| s.port), Some(993));
        assert_eq!(
            config.test_recipients(),
            vec!["bob@contoso.com".to_string(), "carol@contoso.com".to_string()]
        );
    }

    #[test]
    fn test_imap_only_required_with_shared_mailbox() {
        let config = settings("mail.user=a@b.c\nmail.shared.mailbox.address=  \nmail.smtp.host=h\nmail.smtp.port=25\n")
            .mail_config()
            .unwrap();
        assert!(config.shared_mailbox.is_none());
        assert!(config.imap.is_none());
        assert!(config.test_recipients().is_empty());

        let err = settings("mail.user=a@b.c\nmail.shared.mailbox.address=s@b.c\nmail.smtp.host=h\nmail.smtp.port=25\n")
            .mail_config()
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigMissing(ref key) if key == keys::IMAP_HOST));
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let err = settings("mail.smtp.host=h\nmail.smtp.port=25\n").mail_config().unwrap_err();
        assert!(matches!(err, CoreError::ConfigMissing(ref key) if key == keys::USER));

        let err = settings("mail.user=a@b.c\nmail.smtp.host=h\nmail.smtp.port=submission\n")
            .mail_config()
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { ref key, .. } if key == keys::SMTP_PORT));

        let err = settings("mail.user=a@b.c\nmail.smtp.host=h\nmail.smtp.port=70000\n")
            .mail_config()
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_oauth2_config() {
        let config = settings(SAMPLE).oauth2_config().unwrap();
        assert_eq!(config.client_id, "client-123");
        assert!(config.client_secret.is_none());
        assert_eq!(
            config.scope,
            "https://outlook.office.com/SMTP.Send https://outlook.office.com/IMAP.AccessAsUser.All offline_access"
        );

        let with_secret = format!("{}mail.oauth.client.secret=s3cret\n", SAMPLE);
        let config = settings(&with_secret).oauth2_config().unwrap();
        assert_eq!(config.client_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_flow_construction() {
        let flow = settings(SAMPLE).authorization_code_flow().unwrap();
        assert_eq!(flow.redirect_uri(), "http://localhost:8080/callback");
        assert!(settings(SAMPLE).device_flow().is_ok());

        let without_device = SAMPLE.replace("mail.oauth.devicecode.url", "unused");
        let err = settings(&without_device).device_flow().err().unwrap();
        assert!(matches!(err, CoreError::ConfigMissing(ref key) if key == keys::DEVICE_CODE_URL));

        let bad_redirect = SAMPLE.replace("http://localhost:8080/callback", "localhost-callback");
        let err = settings(&bad_redirect).authorization_code_flow().err().unwrap();
        assert!(matches!(err, CoreError::ConfigInvalid { ref key, .. } if key == keys::REDIRECT_URI));
    }
}
