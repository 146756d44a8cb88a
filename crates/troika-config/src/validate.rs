//! Variable-by-variable validation.
//!
//! Each check appends to a shared problem list; [`build`] only constructs
//! the [`Config`] when the list stays empty.

use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use troika_core::UserId;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, CredentialsSource, SheetRef};

const MIN_SHEET_ID_LEN: usize = 10;

struct Checker<'a> {
    vars: &'a HashMap<String, String>,
    problems: Vec<String>,
}

impl<'a> Checker<'a> {
    fn new(vars: &'a HashMap<String, String>) -> Self {
        Self {
            vars,
            problems: Vec::new(),
        }
    }

    fn get(&self, name: &str) -> Option<&'a str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, name: &str) -> Option<&'a str> {
        let value = self.get(name);
        if value.is_none() {
            self.problems.push(format!("{name}: not set"));
        }
        value
    }

    fn problem(&mut self, name: &str, detail: impl std::fmt::Display) {
        self.problems.push(format!("{name}: {detail}"));
    }
}

/// Validate every variable and assemble the [`Config`].
pub(crate) fn build(vars: &HashMap<String, String>) -> ConfigResult<Config> {
    let mut checker = Checker::new(vars);

    let messenger_token = messenger_token(&mut checker);
    let auth_sheet = sheet(&mut checker, "AUTH_SHEET_ID", "AUTH_SHEET_NAME");
    let appeals_sheet = sheet(&mut checker, "APPEALS_SHEET_ID", "APPEALS_SHEET_NAME");
    let promotions_sheet = sheet(&mut checker, "PROMOTIONS_SHEET_ID", "PROMOTIONS_SHEET_NAME");
    let credentials = credentials(&mut checker);
    let llm_api_key = checker.required("LLM_API_KEY").map(str::to_string);
    let llm_assistant_id = checker.required("LLM_ASSISTANT_ID").map(str::to_string);
    let web_form_url = web_form_url(&mut checker);
    let admin_user_id = admin_user_id(&mut checker);

    let llm_base_url = checker.get("LLM_BASE_URL").map(str::to_string);
    let knowledge_drive_folder_id = checker.get("KNOWLEDGE_DRIVE_FOLDER_ID").map(str::to_string);
    let state_dir = checker
        .get("STATE_DIR")
        .map_or_else(|| PathBuf::from("."), PathBuf::from);

    if !checker.problems.is_empty() {
        return Err(ConfigError::Invalid {
            problems: checker.problems,
        });
    }

    // All `None`s are rejected above; unreachable fallbacks keep this
    // total without unwraps.
    Ok(Config {
        messenger_token: messenger_token.unwrap_or_default(),
        auth_sheet: auth_sheet.unwrap_or_else(empty_sheet),
        appeals_sheet: appeals_sheet.unwrap_or_else(empty_sheet),
        promotions_sheet: promotions_sheet.unwrap_or_else(empty_sheet),
        credentials: credentials.unwrap_or_else(|| CredentialsSource::Inline(String::new())),
        llm_api_key: llm_api_key.unwrap_or_default(),
        llm_assistant_id: llm_assistant_id.unwrap_or_default(),
        llm_base_url,
        knowledge_drive_folder_id,
        web_form_url: web_form_url.unwrap_or_default(),
        admin_user_id,
        state_dir,
    })
}

fn empty_sheet() -> SheetRef {
    SheetRef {
        id: String::new(),
        name: String::new(),
    }
}

fn messenger_token(checker: &mut Checker<'_>) -> Option<String> {
    let raw = checker.required("MESSENGER_TOKEN")?;
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r"^\d+:[A-Za-z0-9_-]+$").unwrap();
    if pattern.is_match(raw) {
        Some(raw.to_string())
    } else {
        checker.problem("MESSENGER_TOKEN", "does not look like a bot token");
        None
    }
}

fn sheet(checker: &mut Checker<'_>, id_var: &str, name_var: &str) -> Option<SheetRef> {
    let id = checker.required(id_var);
    let name = checker.required(name_var);

    let id = id?;
    if id.len() < MIN_SHEET_ID_LEN {
        checker.problem(id_var, "too short to be a spreadsheet id");
        return None;
    }
    Some(SheetRef {
        id: id.to_string(),
        name: name?.to_string(),
    })
}

fn credentials(checker: &mut Checker<'_>) -> Option<CredentialsSource> {
    if let Some(inline) = checker.get("SA_CREDENTIALS_JSON") {
        return match serde_json::from_str::<serde_json::Value>(inline) {
            Ok(_) => Some(CredentialsSource::Inline(inline.to_string())),
            Err(e) => {
                checker.problem("SA_CREDENTIALS_JSON", format!("not valid JSON: {e}"));
                None
            },
        };
    }

    if let Some(path) = checker.get("SA_CREDENTIALS_FILE") {
        let path = PathBuf::from(path);
        return match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<serde_json::Value>(&contents) {
                Ok(_) => Some(CredentialsSource::File(path)),
                Err(e) => {
                    checker.problem("SA_CREDENTIALS_FILE", format!("not valid JSON: {e}"));
                    None
                },
            },
            Err(e) => {
                checker.problem("SA_CREDENTIALS_FILE", format!("unreadable: {e}"));
                None
            },
        };
    }

    checker
        .problems
        .push("SA_CREDENTIALS_FILE or SA_CREDENTIALS_JSON: not set".to_string());
    None
}

fn web_form_url(checker: &mut Checker<'_>) -> Option<String> {
    let raw = checker.required("WEB_FORM_URL")?;
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "https" && raw.ends_with('/') => Some(raw.to_string()),
        Ok(url) if url.scheme() != "https" => {
            checker.problem("WEB_FORM_URL", "must be HTTPS");
            None
        },
        Ok(_) => {
            checker.problem("WEB_FORM_URL", "must end with a trailing slash");
            None
        },
        Err(e) => {
            checker.problem("WEB_FORM_URL", format!("not a URL: {e}"));
            None
        },
    }
}

fn admin_user_id(checker: &mut Checker<'_>) -> Option<UserId> {
    let raw = checker.get("ADMIN_USER_ID")?;
    match raw.parse::<i64>() {
        Ok(id) => Some(UserId(id)),
        Err(_) => {
            checker.problem("ADMIN_USER_ID", "must be a numeric user id");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn valid_vars(credentials_path: &str) -> HashMap<String, String> {
        [
            ("MESSENGER_TOKEN", "123456:AAbbCCdd_ee-ff"),
            ("AUTH_SHEET_ID", "1aBcDeFgHiJkLm"),
            ("AUTH_SHEET_NAME", "Partners"),
            ("APPEALS_SHEET_ID", "1aBcDeFgHiJkLn"),
            ("APPEALS_SHEET_NAME", "Appeals"),
            ("PROMOTIONS_SHEET_ID", "1aBcDeFgHiJkLo"),
            ("PROMOTIONS_SHEET_NAME", "Promotions"),
            ("SA_CREDENTIALS_FILE", credentials_path),
            ("LLM_API_KEY", "sk-abc"),
            ("LLM_ASSISTANT_ID", "asst_123"),
            ("WEB_FORM_URL", "https://forms.example.com/auth/"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn credentials_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "service_account"}}"#).unwrap();
        file
    }

    #[test]
    fn valid_environment_loads() {
        let creds = credentials_file();
        let vars = valid_vars(creds.path().to_str().unwrap());
        let config = build(&vars).unwrap();

        assert_eq!(config.auth_sheet.name, "Partners");
        assert_eq!(config.state_dir, PathBuf::from("."));
        assert!(config.admin_user_id.is_none());
    }

    #[test]
    fn all_problems_reported_together() {
        let vars = HashMap::new();
        let Err(ConfigError::Invalid { problems }) = build(&vars) else {
            panic!("expected failure");
        };
        // Token, three sheets (id+name each), credentials, llm key,
        // assistant id, web form.
        assert!(problems.len() >= 10, "got: {problems:?}");
        assert!(problems.iter().any(|p| p.starts_with("MESSENGER_TOKEN")));
        assert!(problems
            .iter()
            .any(|p| p.contains("SA_CREDENTIALS_FILE or SA_CREDENTIALS_JSON")));
    }

    #[test]
    fn malformed_token_rejected() {
        let creds = credentials_file();
        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert("MESSENGER_TOKEN".into(), "not-a-token".into());
        let Err(ConfigError::Invalid { problems }) = build(&vars) else {
            panic!("expected failure");
        };
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("MESSENGER_TOKEN"));
    }

    #[test]
    fn short_sheet_id_rejected() {
        let creds = credentials_file();
        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert("AUTH_SHEET_ID".into(), "short".into());
        assert!(build(&vars).is_err());
    }

    #[test]
    fn web_form_must_be_https_with_slash() {
        let creds = credentials_file();

        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert("WEB_FORM_URL".into(), "http://forms.example.com/".into());
        assert!(build(&vars).is_err());

        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert("WEB_FORM_URL".into(), "https://forms.example.com/auth".into());
        assert!(build(&vars).is_err());
    }

    #[test]
    fn inline_credentials_take_precedence() {
        let creds = credentials_file();
        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert(
            "SA_CREDENTIALS_JSON".into(),
            r#"{"type": "service_account"}"#.into(),
        );
        let config = build(&vars).unwrap();
        assert!(matches!(config.credentials, CredentialsSource::Inline(_)));
    }

    #[test]
    fn invalid_inline_credentials_rejected() {
        let creds = credentials_file();
        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert("SA_CREDENTIALS_JSON".into(), "{not json".into());
        assert!(build(&vars).is_err());
    }

    #[test]
    fn missing_credentials_file_rejected() {
        let mut vars = valid_vars("/nonexistent/creds.json");
        vars.remove("SA_CREDENTIALS_JSON");
        let Err(ConfigError::Invalid { problems }) = build(&vars) else {
            panic!("expected failure");
        };
        assert!(problems[0].contains("unreadable"));
    }

    #[test]
    fn admin_user_id_parsed() {
        let creds = credentials_file();
        let mut vars = valid_vars(creds.path().to_str().unwrap());
        vars.insert("ADMIN_USER_ID".into(), "111222333".into());
        let config = build(&vars).unwrap();
        assert_eq!(config.admin_user_id, Some(UserId(111_222_333)));

        vars.insert("ADMIN_USER_ID".into(), "not-numeric".into());
        assert!(build(&vars).is_err());
    }
}
