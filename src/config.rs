//! Configuration types.
//!
//! Everything is read once at startup from `MAILSIGN_*` environment
//! variables and passed explicitly to the components that need it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::signing::{SignatureFormat, SignatureRect};

/// Default source folder name (the folder the operator files "ok" mails in).
pub const DEFAULT_SOURCE_FOLDER: &str = "ok pour moi";

/// Default destination folder once a draft is saved.
pub const DEFAULT_DESTINATION_FOLDER: &str = "Inbox";

/// Default Outlook Web entry point.
pub const DEFAULT_MAIL_URL: &str = "https://outlook.office365.com/mail/";

/// Visible texts Outlook uses for the operator's own messages.
pub const DEFAULT_SELF_TOKENS: &[&str] = &["you", "moi"];

/// Header markers Outlook shows on unsent drafts.
pub const DEFAULT_DRAFT_MARKERS: &[&str] = &["[Draft]", "[Brouillon]"];

/// Complete configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Operator's own address; messages from it are never processed.
    pub my_email: String,
    /// Body typed into every reply draft.
    pub reply_message: String,
    pub cc: CcConfig,
    /// Folder whose conversations are processed.
    pub source_folder: String,
    /// Folder conversations are moved to after drafting.
    pub destination_folder: String,
    pub signature: SignatureConfig,
    pub resolution: ResolutionConfig,
    pub capture: CaptureConfig,
    pub browser: BrowserConfig,
    pub timing: Timing,
}

/// CC recipients added to every draft when enabled.
#[derive(Debug, Clone, Default)]
pub struct CcConfig {
    pub enabled: bool,
    pub emails: Vec<String>,
}

impl CcConfig {
    /// Recipients to add, or an empty slice when CC is off.
    pub fn active_recipients(&self) -> &[String] {
        if self.enabled { &self.emails } else { &[] }
    }
}

/// Signature image and where it goes on the last page.
#[derive(Clone)]
pub struct SignatureConfig {
    pub path: PathBuf,
    pub image: Vec<u8>,
    pub format: SignatureFormat,
    pub placement: SignatureRect,
}

impl std::fmt::Debug for SignatureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureConfig")
            .field("path", &self.path)
            .field("image", &format_args!("{} bytes", self.image.len()))
            .field("format", &self.format)
            .field("placement", &self.placement)
            .finish()
    }
}

/// Locale-dependent tokens used while resolving messages.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// Visible author texts meaning "the operator" (compared case-insensitively).
    pub self_tokens: Vec<String>,
    /// Texts marking a message header as an unsent draft.
    pub draft_markers: Vec<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            self_tokens: DEFAULT_SELF_TOKENS.iter().map(|s| s.to_string()).collect(),
            draft_markers: DEFAULT_DRAFT_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// How attachment bytes are obtained from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    /// Intercept `blob:` handles minted in the page and relay them out.
    Blob,
    /// Intercept credentialed attachment downloads matching a URL pattern.
    Url { pattern: String },
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    /// Bound on every relay request and every capture notification wait.
    pub timeout: Duration,
    /// How long the page agent keeps an unclaimed blob.
    pub retention: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Blob,
            timeout: Duration::from_secs(15),
            retention: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub mail_url: String,
    /// Root for the persistent browser profile and logs.
    pub data_dir: PathBuf,
    /// How long to wait for an interactive login.
    pub login_timeout: Duration,
}

impl BrowserConfig {
    pub fn profile_dir(&self) -> PathBuf {
        self.data_dir.join("browser")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// UI wait constants. Pauses let animations settle; timeouts bound waits.
#[derive(Debug, Clone)]
pub struct Timing {
    pub menu_animation: Duration,
    pub ui_settle: Duration,
    pub content_load: Duration,
    pub upload_complete: Duration,
    pub poll_interval: Duration,
    pub element_visible: Duration,
    pub download_menu: Duration,
    pub cc_checkbox: Duration,
    pub cc_field: Duration,
    pub file_chooser: Duration,
    pub move_menu: Duration,
    pub loading_screen: Duration,
    /// Upper bound on "See more messages" clicks for one conversation.
    pub max_expand_clicks: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            menu_animation: Duration::from_millis(300),
            ui_settle: Duration::from_millis(500),
            content_load: Duration::from_millis(1000),
            upload_complete: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(250),
            element_visible: Duration::from_secs(10),
            download_menu: Duration::from_secs(5),
            cc_checkbox: Duration::from_secs(3),
            cc_field: Duration::from_secs(5),
            file_chooser: Duration::from_secs(10),
            move_menu: Duration::from_secs(5),
            loading_screen: Duration::from_secs(30),
            max_expand_clicks: 50,
        }
    }
}

impl Timing {
    /// No pauses at all. For driving fakes in tests.
    pub fn instant() -> Self {
        Self {
            menu_animation: Duration::ZERO,
            ui_settle: Duration::ZERO,
            content_load: Duration::ZERO,
            upload_complete: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl RunConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// Required: `MAILSIGN_MY_EMAIL`, `MAILSIGN_REPLY_MESSAGE`, and a
    /// readable signature image (`MAILSIGN_SIGNATURE_PATH`, default
    /// `<data dir>/signature.png`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let my_email = get("MAILSIGN_MY_EMAIL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MAILSIGN_MY_EMAIL".into()))?;
        if !is_valid_email(&my_email) {
            return Err(ConfigError::InvalidValue {
                key: "MAILSIGN_MY_EMAIL".into(),
                message: format!("not an email address: {my_email}"),
            });
        }

        // Not trimmed: leading/trailing whitespace in the body is intentional.
        let reply_message = lookup("MAILSIGN_REPLY_MESSAGE")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MAILSIGN_REPLY_MESSAGE".into()))?;

        let cc_emails = split_list(get("MAILSIGN_CC_EMAILS").as_deref().unwrap_or_default());
        if let Some(bad) = cc_emails.iter().find(|e| !is_valid_email(e)) {
            return Err(ConfigError::InvalidValue {
                key: "MAILSIGN_CC_EMAILS".into(),
                message: format!("not an email address: {bad}"),
            });
        }
        let cc = CcConfig {
            enabled: parse_bool(&get, "MAILSIGN_CC_ENABLED", false)?,
            emails: cc_emails,
        };

        let data_dir = get("MAILSIGN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| ".".to_string());
                PathBuf::from(home).join(".mailsign")
            });

        let signature_path = get("MAILSIGN_SIGNATURE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("signature.png"));
        let signature = SignatureConfig {
            format: SignatureFormat::from_path(&signature_path)?,
            image: read_signature(&signature_path)?,
            placement: SignatureRect {
                x: parse_num(&get, "MAILSIGN_SIGNATURE_X", 100.0)?,
                y: parse_num(&get, "MAILSIGN_SIGNATURE_Y", 100.0)?,
                width: parse_num(&get, "MAILSIGN_SIGNATURE_WIDTH", 150.0)?,
                height: parse_num(&get, "MAILSIGN_SIGNATURE_HEIGHT", 50.0)?,
            },
            path: signature_path,
        };

        let mut resolution = ResolutionConfig::default();
        if let Some(tokens) = get("MAILSIGN_SELF_TOKENS") {
            resolution.self_tokens = split_list(&tokens);
        }
        if let Some(markers) = get("MAILSIGN_DRAFT_MARKERS") {
            resolution.draft_markers = split_list(&markers);
        }

        let mut capture = CaptureConfig::default();
        capture.mode = match get("MAILSIGN_CAPTURE_MODE").as_deref() {
            None | Some("blob") => CaptureMode::Blob,
            Some("url") => {
                let pattern = get("MAILSIGN_ATTACHMENT_URL_PATTERN").ok_or_else(|| {
                    ConfigError::MissingEnvVar("MAILSIGN_ATTACHMENT_URL_PATTERN".into())
                })?;
                regex::Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
                    key: "MAILSIGN_ATTACHMENT_URL_PATTERN".into(),
                    message: e.to_string(),
                })?;
                CaptureMode::Url { pattern }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "MAILSIGN_CAPTURE_MODE".into(),
                    message: format!("expected \"blob\" or \"url\", got \"{other}\""),
                });
            }
        };
        capture.timeout = parse_secs(&get, "MAILSIGN_CAPTURE_TIMEOUT_SECS", capture.timeout)?;
        capture.retention = parse_secs(&get, "MAILSIGN_CAPTURE_RETENTION_SECS", capture.retention)?;

        let browser = BrowserConfig {
            headless: parse_bool(&get, "MAILSIGN_HEADLESS", false)?,
            mail_url: get("MAILSIGN_MAIL_URL").unwrap_or_else(|| DEFAULT_MAIL_URL.to_string()),
            data_dir,
            login_timeout: parse_secs(&get, "MAILSIGN_LOGIN_TIMEOUT_SECS", Duration::from_secs(300))?,
        };

        Ok(Self {
            my_email,
            reply_message,
            cc,
            source_folder: get("MAILSIGN_FOLDER")
                .unwrap_or_else(|| DEFAULT_SOURCE_FOLDER.to_string()),
            destination_folder: get("MAILSIGN_DESTINATION_FOLDER")
                .unwrap_or_else(|| DEFAULT_DESTINATION_FOLDER.to_string()),
            signature,
            resolution,
            capture,
            browser,
            timing: Timing::default(),
        })
    }
}

/// Usage text printed for `help`, `--help` and `-h`.
pub const USAGE: &str = "\
Usage: mailsign [help]

Signs the PDFs received in an Outlook Web folder and prepares reply drafts.
Configuration comes from the environment:

  MAILSIGN_MY_EMAIL                  your address (required)
  MAILSIGN_REPLY_MESSAGE             body of every reply (required)
  MAILSIGN_SIGNATURE_PATH            PNG or JPEG signature (default <data dir>/signature.png)
  MAILSIGN_SIGNATURE_X, _Y           signature origin in points (default 100, 100)
  MAILSIGN_SIGNATURE_WIDTH, _HEIGHT  signature size in points (default 150, 50)
  MAILSIGN_FOLDER                    folder to process (default \"ok pour moi\")
  MAILSIGN_DESTINATION_FOLDER        where handled conversations go (default Inbox)
  MAILSIGN_CC_ENABLED                add CC recipients to replies (default false)
  MAILSIGN_CC_EMAILS                 comma-separated CC addresses
  MAILSIGN_SELF_TOKENS               sender names meaning yourself (default you,moi)
  MAILSIGN_DRAFT_MARKERS             subject markers of drafts (default [Draft],[Brouillon])
  MAILSIGN_CAPTURE_MODE              blob or url (default blob)
  MAILSIGN_ATTACHMENT_URL_PATTERN    download URL regex, required in url mode
  MAILSIGN_CAPTURE_TIMEOUT_SECS      wait for one attachment download (default 15)
  MAILSIGN_CAPTURE_RETENTION_SECS    how long captured downloads are kept (default 120)
  MAILSIGN_HEADLESS                  run the browser without a window (default false)
  MAILSIGN_MAIL_URL                  mailbox address (default Outlook Web)
  MAILSIGN_LOGIN_TIMEOUT_SECS        time allowed for a manual login (default 300)
  MAILSIGN_DATA_DIR                  browser profile and logs (default ~/.mailsign)
  RUST_LOG                           log filter (default info)
";

/// Whether the first command-line argument asks for the usage text.
pub fn wants_help<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .next()
        .is_some_and(|arg| matches!(arg.as_ref(), "help" | "--help" | "-h"))
}

fn read_signature(path: &Path) -> Result<Vec<u8>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::SignatureNotFound(path.display().to_string()));
    }
    Ok(std::fs::read(path)?)
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Loose address check: non-empty local part, dotted domain, no spaces.
pub fn is_valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !s.contains(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).as_deref() {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected \"true\" or \"false\", got \"{other}\""),
        }),
    }
}

fn parse_num(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: f32,
) -> Result<f32, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("not a number: {raw}"),
        }),
    }
}

fn parse_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                message: format!("not a whole number of seconds: {raw}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn base_env(dir: &TempDir) -> HashMap<String, String> {
        let sig = dir.path().join("sig.png");
        std::fs::write(&sig, b"fake png").unwrap();
        HashMap::from([
            ("MAILSIGN_MY_EMAIL".to_string(), "me@corp.fr".to_string()),
            ("MAILSIGN_REPLY_MESSAGE".to_string(), "Bonjour, ci-joint.".to_string()),
            ("MAILSIGN_SIGNATURE_PATH".to_string(), sig.display().to_string()),
        ])
    }

    fn load(env: &HashMap<String, String>) -> Result<RunConfig, ConfigError> {
        RunConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(&base_env(&dir)).unwrap();

        assert_eq!(config.my_email, "me@corp.fr");
        assert_eq!(config.source_folder, DEFAULT_SOURCE_FOLDER);
        assert_eq!(config.destination_folder, "Inbox");
        assert!(!config.cc.enabled);
        assert!(config.cc.active_recipients().is_empty());
        assert_eq!(config.signature.format, SignatureFormat::Png);
        assert_eq!(config.signature.image, b"fake png");
        assert_eq!(config.signature.placement.width, 150.0);
        assert_eq!(config.resolution.self_tokens, vec!["you", "moi"]);
        assert_eq!(config.capture.mode, CaptureMode::Blob);
        assert!(!config.browser.headless);
    }

    #[test]
    fn missing_email_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        env.remove("MAILSIGN_MY_EMAIL");
        assert!(matches!(load(&env), Err(ConfigError::MissingEnvVar(k)) if k == "MAILSIGN_MY_EMAIL"));
    }

    #[test]
    fn missing_signature_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        env.insert(
            "MAILSIGN_SIGNATURE_PATH".into(),
            dir.path().join("absent.png").display().to_string(),
        );
        assert!(matches!(load(&env), Err(ConfigError::SignatureNotFound(_))));
    }

    #[test]
    fn unsupported_signature_extension() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        let gif = dir.path().join("sig.gif");
        std::fs::write(&gif, b"gif").unwrap();
        env.insert("MAILSIGN_SIGNATURE_PATH".into(), gif.display().to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::UnsupportedSignatureFormat(_))
        ));
    }

    #[test]
    fn cc_list_is_split_and_validated() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        env.insert("MAILSIGN_CC_ENABLED".into(), "true".into());
        env.insert("MAILSIGN_CC_EMAILS".into(), " a@x.fr , b@y.com,, ".into());
        let config = load(&env).unwrap();
        assert_eq!(config.cc.active_recipients(), ["a@x.fr", "b@y.com"]);

        env.insert("MAILSIGN_CC_EMAILS".into(), "a@x.fr,nope".into());
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { key, .. }) if key == "MAILSIGN_CC_EMAILS"));
    }

    #[test]
    fn invalid_numbers_and_bools_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        env.insert("MAILSIGN_SIGNATURE_X".into(), "left".into());
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));

        let mut env = base_env(&dir);
        env.insert("MAILSIGN_HEADLESS".into(), "yes".into());
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn url_capture_mode_requires_valid_pattern() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        env.insert("MAILSIGN_CAPTURE_MODE".into(), "url".into());
        assert!(matches!(load(&env), Err(ConfigError::MissingEnvVar(_))));

        env.insert("MAILSIGN_ATTACHMENT_URL_PATTERN".into(), "GetFileAttachment".into());
        let config = load(&env).unwrap();
        assert_eq!(
            config.capture.mode,
            CaptureMode::Url {
                pattern: "GetFileAttachment".into()
            }
        );

        env.insert("MAILSIGN_ATTACHMENT_URL_PATTERN".into(), "(".into());
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn locale_tokens_are_configurable() {
        let dir = TempDir::new().unwrap();
        let mut env = base_env(&dir);
        env.insert("MAILSIGN_SELF_TOKENS".into(), "you, moi, ich".into());
        env.insert("MAILSIGN_DRAFT_MARKERS".into(), "[Entwurf]".into());
        let config = load(&env).unwrap();
        assert_eq!(config.resolution.self_tokens, vec!["you", "moi", "ich"]);
        assert_eq!(config.resolution.draft_markers, vec!["[Entwurf]"]);
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("jean.dupont@corp.fr"));
        assert!(!is_valid_email("jean"));
        assert!(!is_valid_email("@corp.fr"));
        assert!(!is_valid_email("jean@corp"));
        assert!(!is_valid_email("jean dupont@corp.fr"));
    }

    #[test]
    fn help_flags() {
        assert!(wants_help(["help"]));
        assert!(wants_help(["--help"]));
        assert!(wants_help(["-h", "extra"]));
        assert!(!wants_help(Vec::<String>::new()));
        assert!(!wants_help(["run"]));
        assert!(!wants_help(["--verbose", "--help"]));
    }

    #[test]
    fn usage_names_required_vars() {
        assert!(USAGE.starts_with("Usage: mailsign"));
        for key in ["MAILSIGN_MY_EMAIL", "MAILSIGN_REPLY_MESSAGE", "MAILSIGN_SIGNATURE_PATH"] {
            assert!(USAGE.contains(key), "{key} missing from usage");
        }
    }
}
