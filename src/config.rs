//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default endpoint of the handwriting verification service
pub const DEFAULT_VERIFY_URL: &str = "http://localhost:8000/verify-text";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub voice: VoiceConfig,
    pub timing: Timing,
    pub verification: VerificationConfig,
}

/// Locales and playback rates for spoken output
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Conversational guidance (Moroccan Darija)
    pub guide_locale: String,
    pub guide_rate: f32,
    /// Reference pronunciation of isolated letters (Modern Standard Arabic)
    pub letter_locale: String,
    pub letter_rate: f32,
    /// Locale requested from the speech recognizer
    pub recognition_locale: String,
    /// Longest wait for the front end to finish speaking or capturing
    pub answer_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            guide_locale: "ar-MA".into(),
            guide_rate: 0.8,
            letter_locale: "ar-SA".into(),
            letter_rate: 0.7,
            recognition_locale: "ar-MA".into(),
            answer_timeout: Duration::from_secs(60),
        }
    }
}

/// Delays used by the learning flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Silence between a feedback prompt and the next instruction
    pub prompt_gap: Duration,
    /// Delay before replaying the Listen stage after reset/advance
    pub restart_delay: Duration,
    /// Idle time after the pen lifts before a drawing is submitted
    pub quiet_period: Duration,
    /// How long a guidance cue stays visible
    pub cue_duration: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            prompt_gap: Duration::from_millis(1000),
            restart_delay: Duration::from_millis(500),
            quiet_period: Duration::from_millis(2000),
            cue_duration: Duration::from_millis(3000),
        }
    }
}

/// Handwriting verification service settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    pub endpoint: String,
    /// Treat an unreachable or erroring service as a pass
    pub fail_open: bool,
    pub timeout: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_VERIFY_URL.into(),
            fail_open: true,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let mut config = Self::with_data_dir(
            PathBuf::from(&home)
                .join(".local")
                .join("share")
                .join("letter-tutor"),
        );

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            voice: VoiceConfig::default(),
            timing: Timing::default(),
            verification: VerificationConfig::default(),
        }
    }

    /// Apply `LETTER_TUTOR_*` overrides from `lookup`
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(socket) = lookup("LETTER_TUTOR_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(url) = lookup("LETTER_TUTOR_VERIFY_URL") {
            self.verification.endpoint = url;
        }
        if let Some(flag) = lookup("LETTER_TUTOR_FAIL_OPEN") {
            self.verification.fail_open = parse_flag(&flag)
                .with_context(|| format!("invalid LETTER_TUTOR_FAIL_OPEN: {flag}"))?;
        }
        if let Some(secs) = lookup("LETTER_TUTOR_VERIFY_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid LETTER_TUTOR_VERIFY_TIMEOUT_SECS: {secs}"))?;
            self.verification.timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
