//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;

use troika_core::UserId;

use crate::error::ConfigResult;
use crate::validate;

/// Location of one spreadsheet: document id plus worksheet name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    /// Spreadsheet document id.
    pub id: String,
    /// Worksheet (tab) name inside the document.
    pub name: String,
}

/// Where the service-account credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsSource {
    /// Path to a JSON key file.
    File(PathBuf),
    /// Inline JSON, usually injected by the deployment environment.
    Inline(String),
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Long-poll bot token.
    pub messenger_token: String,
    /// Partner identity sheet.
    pub auth_sheet: SheetRef,
    /// Appeals sheet.
    pub appeals_sheet: SheetRef,
    /// Promotions sheet.
    pub promotions_sheet: SheetRef,
    /// Service-account credentials for sheet RPCs.
    pub credentials: CredentialsSource,
    /// LLM vendor API key.
    pub llm_api_key: String,
    /// Vendor-side assistant id.
    pub llm_assistant_id: String,
    /// Override for the vendor endpoint; default is the public API.
    pub llm_base_url: Option<String>,
    /// Optional RAG source folder.
    pub knowledge_drive_folder_id: Option<String>,
    /// Auth web form; HTTPS with a trailing slash.
    pub web_form_url: String,
    /// Recipient of critical notifications, if configured.
    pub admin_user_id: Option<UserId>,
    /// Directory for on-disk state (auth cache, ledger, PID file).
    pub state_dir: PathBuf,
}

impl Config {
    /// Load and validate from the process environment.
    ///
    /// # Errors
    ///
    /// [`crate::ConfigError::Invalid`] listing every missing or malformed
    /// variable.
    pub fn from_env() -> ConfigResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load and validate from an explicit variable map (tests, wrappers).
    ///
    /// # Errors
    ///
    /// [`crate::ConfigError::Invalid`] listing every missing or malformed
    /// variable.
    pub fn from_vars(vars: &HashMap<String, String>) -> ConfigResult<Self> {
        validate::build(vars)
    }
}
