//! Configuration types for an audit run.
//!
//! All pipeline behaviour is controlled through [`AuditConfig`], built via
//! [`AuditConfigBuilder`]. Credentials are deliberately absent: they belong
//! to the concrete storage and service clients (see
//! [`crate::store::AzureBlobStore`] and
//! [`crate::pipeline::service::ChatCompletionsClient`]), so a config can be
//! logged or serialised without leaking secrets.

use crate::error::AuditError;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_AUDIT_INSTRUCTION;
use std::fmt;

/// Default rasterisation resolution for PDF pages.
pub const DEFAULT_DPI: u32 = 200;

/// Default lifetime of a staged fetch URL, in seconds.
pub const DEFAULT_URL_TTL_SECS: u64 = 3600;

/// Default model / deployment identity.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for one audit.
///
/// # Example
/// ```rust
/// use payshield::AuditConfig;
///
/// let config = AuditConfig::builder()
///     .dpi(150)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 150);
/// ```
#[derive(Clone)]
pub struct AuditConfig {
    /// Rendering DPI for PDF pages. Range: 72–400. Default: 200.
    ///
    /// Rate tables are often set in small print; 200 DPI keeps them legible
    /// to the vision model while an A4 page stays around 1650 × 2340 px.
    pub dpi: u32,

    /// Longest-edge cap in pixels for a rendered page. Default: 4000.
    ///
    /// Only oversized pages (A2 and up at 200 DPI) ever hit this; normal
    /// letter and A4 pages render at the full DPI.
    pub max_rendered_pixels: u32,

    /// Operator-supplied instruction text. If None, uses
    /// [`DEFAULT_AUDIT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Model (OpenAI) or deployment (Azure) identity. Default: `gpt-4o-mini`.
    pub model: String,

    /// Optional cap on completion tokens. Default: provider default.
    pub max_tokens: Option<u32>,

    /// Optional sampling temperature. Default: provider default.
    pub temperature: Option<f32>,

    /// Lifetime of each staged fetch URL in seconds. Default: 3600.
    ///
    /// This is a hard TTL. If the service has not fetched an image before
    /// the URL expires, the audit fails; URLs are never refreshed.
    pub url_ttl_secs: u64,

    /// Maximum concurrent uploads per document. Default: 4.
    pub upload_concurrency: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional stage-level progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            max_rendered_pixels: 4000,
            instruction: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            url_ttl_secs: DEFAULT_URL_TTL_SECS,
            upload_concurrency: 4,
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("instruction", &self.instruction.as_ref().map(|s| s.len()))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("url_ttl_secs", &self.url_ttl_secs)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("download_timeout_secs", &self.download_timeout_secs)
            .finish()
    }
}

impl AuditConfig {
    /// Create a new builder for `AuditConfig`.
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder {
            config: Self::default(),
        }
    }

    /// The instruction actually sent: the override, or the default.
    pub fn instruction_text(&self) -> &str {
        self.instruction
            .as_deref()
            .unwrap_or(DEFAULT_AUDIT_INSTRUCTION)
    }

    /// PDF rasterisation scale: points (1/72 in) to pixels.
    pub fn render_scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Builder for [`AuditConfig`].
#[derive(Debug)]
pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn url_ttl_secs(mut self, secs: u64) -> Self {
        self.config.url_ttl_secs = secs;
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AuditConfig, AuditError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(AuditError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.model.trim().is_empty() {
            return Err(AuditError::InvalidConfig("model must not be empty".into()));
        }
        if c.url_ttl_secs == 0 {
            return Err(AuditError::InvalidConfig(
                "URL lifetime must be at least one second".into(),
            ));
        }
        if c.instruction.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(AuditError::InvalidConfig(
                "instruction must not be blank".into(),
            ));
        }
        Ok(self.config)
    }
}
