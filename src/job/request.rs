/// Validated inputs of a single job run and the container environment built from them
use k8s_openapi::api::core::v1::EnvVar;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ENV_API_ID: &str = "TG_MANAGE_API_ID";
const ENV_API_HASH: &str = "TG_MANAGE_API_HASH";
const ENV_BOT_TOKEN: &str = "TG_MANAGE_BOT_TOKEN";
const ENV_REMOVE_MESSAGE_IDS: &str = "TG_MANAGE_REMOVE_MESSAGE_IDS";
const ENV_REMOVE_CHAT_ID: &str = "TG_MANAGE_REMOVE_CHAT_ID";
const ENV_REMOVE_ALL: &str = "TG_MANAGE_REMOVE_ALL";
const ENV_PERSIST_PATH: &str = "TG_MANAGE_PERSIST_PATH";

/// Input validation failures, reported before any cluster call
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("--api-id is required and must be non-zero")]
    MissingApiId,

    #[error("--api-hash is required")]
    MissingApiHash,

    #[error("session file {0} is empty")]
    EmptySession(String),

    #[error("--message-ids have to be a list of ints, comma separated, no spaces (got '{0}')")]
    InvalidMessageIds(String),

    #[error("invalid results filename '{0}': must be a plain file name")]
    InvalidResultsFilename(String),
}

/// Message ids to remove, written as `1,2,3` on the command line
///
/// Ids are kept as digit strings (leading zeros dropped), so no numeric
/// width limit applies. A leading empty item (`,1`) is accepted and skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIds(Vec<String>);

impl MessageIds {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for MessageIds {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }

        // `^\d*(,\d+)*$`: only the first item may be empty
        let mut parts = s.split(',');
        let first = parts.next().filter(|part| !part.is_empty());

        first
            .into_iter()
            .chain(parts)
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(RequestError::InvalidMessageIds(s.to_string()));
                }
                let id = match part.trim_start_matches('0') {
                    "" => "0",
                    trimmed => trimmed,
                };
                Ok(id.to_string())
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl fmt::Display for MessageIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.join(",");
        write!(f, "[{}]", joined)
    }
}

/// Everything the job container needs, already validated
#[derive(Clone)]
pub struct JobRequest {
    pub api_id: i64,
    pub api_hash: String,
    /// Telegram session string read from the session file
    pub session: String,
    pub persist: bool,
    pub remove_all: bool,
    pub results_filename: String,
    pub message_ids: MessageIds,
    pub chat_id: i64,
    pub image: String,
    pub namespace: String,
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("api_id", &self.api_id)
            .field("persist", &self.persist)
            .field("remove_all", &self.remove_all)
            .field("results_filename", &self.results_filename)
            .field("message_ids", &self.message_ids)
            .field("chat_id", &self.chat_id)
            .field("image", &self.image)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl JobRequest {
    /// Default results file name, stamped with the local time
    pub fn default_results_filename() -> String {
        format!("results_{}.csv", chrono::Local::now().format("%Y%m%d%H%M%S"))
    }

    /// Check the inputs, `session_source` is only used in error messages
    pub fn validate(&self, session_source: &str) -> Result<(), RequestError> {
        if self.api_id == 0 {
            return Err(RequestError::MissingApiId);
        }

        if self.api_hash.trim().is_empty() {
            return Err(RequestError::MissingApiHash);
        }

        if self.session.trim().is_empty() {
            return Err(RequestError::EmptySession(session_source.to_string()));
        }

        let name = self.results_filename.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(RequestError::InvalidResultsFilename(name.to_string()));
        }

        Ok(())
    }

    /// Whether targeted removal applies: ids given and a chat to remove them from
    pub fn removes_messages(&self) -> bool {
        !self.message_ids.is_empty() && self.chat_id != 0
    }

    /// Path the script writes its results to, relative to its working directory
    pub fn persist_path(&self, results_dir: &str) -> String {
        format!(
            "{}/{}",
            results_dir.trim_end_matches('/'),
            self.results_filename
        )
    }

    /// Container environment for the management script
    ///
    /// `persist_path` is set only for runs that mount result storage.
    pub fn env(&self, persist_path: Option<&str>) -> Vec<EnvVar> {
        let mut env = vec![
            env_var(ENV_API_ID, self.api_id.to_string()),
            env_var(ENV_API_HASH, self.api_hash.clone()),
            env_var(ENV_BOT_TOKEN, self.session.clone()),
        ];

        if self.removes_messages() {
            env.push(env_var(ENV_REMOVE_MESSAGE_IDS, self.message_ids.to_string()));
            env.push(env_var(ENV_REMOVE_CHAT_ID, self.chat_id.to_string()));
        }

        let remove_all = if self.remove_all { "True" } else { "False" };
        env.push(env_var(ENV_REMOVE_ALL, remove_all));

        if let Some(path) = persist_path {
            env.push(env_var(ENV_PERSIST_PATH, path));
        }

        env
    }
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            api_id: 12345,
            api_hash: "0123456789abcdef".to_string(),
            session: "BQAsession".to_string(),
            persist: false,
            remove_all: false,
            results_filename: "results_20240101120000.csv".to_string(),
            message_ids: MessageIds::default(),
            chat_id: 0,
            image: "you2ku/python-tg-script:latest".to_string(),
            namespace: "default".to_string(),
        }
    }

    fn lookup<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn test_message_ids_parsing() {
        assert_eq!("".parse::<MessageIds>().unwrap(), MessageIds::default());
        assert_eq!("7".parse::<MessageIds>().unwrap().to_string(), "[7]");
        assert_eq!("1,2,30".parse::<MessageIds>().unwrap().to_string(), "[1,2,30]");

        for bad in ["1, 2", "1,,2", ",", "1,", "[1,2]", "a", "-1", ",,1"] {
            assert_eq!(
                bad.parse::<MessageIds>(),
                Err(RequestError::InvalidMessageIds(bad.to_string())),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_message_ids_leading_empty_item() {
        assert_eq!(",1".parse::<MessageIds>().unwrap().to_string(), "[1]");
        assert_eq!(",1,2".parse::<MessageIds>().unwrap().to_string(), "[1,2]");
    }

    #[test]
    fn test_message_ids_wider_than_u64() {
        let ids: MessageIds = "99999999999999999999999,5".parse().unwrap();
        assert_eq!(ids.to_string(), "[99999999999999999999999,5]");
    }

    #[test]
    fn test_message_ids_drop_leading_zeros() {
        let ids: MessageIds = "007,0,000".parse().unwrap();
        assert_eq!(ids.to_string(), "[7,0,0]");
    }

    #[test]
    fn test_message_ids_display() {
        let ids: MessageIds = "4,5,6".parse().unwrap();
        assert_eq!(ids.to_string(), "[4,5,6]");
    }

    #[test]
    fn test_validation() {
        assert_eq!(request().validate("session.txt"), Ok(()));

        let mut r = request();
        r.api_id = 0;
        assert_eq!(r.validate("session.txt"), Err(RequestError::MissingApiId));

        let mut r = request();
        r.api_hash = " ".to_string();
        assert_eq!(r.validate("session.txt"), Err(RequestError::MissingApiHash));

        let mut r = request();
        r.session = "\n".to_string();
        assert_eq!(
            r.validate("session.txt"),
            Err(RequestError::EmptySession("session.txt".to_string()))
        );

        let mut r = request();
        r.results_filename = "../escape.csv".to_string();
        assert!(matches!(
            r.validate("session.txt"),
            Err(RequestError::InvalidResultsFilename(_))
        ));
    }

    #[test]
    fn test_default_results_filename_shape() {
        let name = JobRequest::default_results_filename();
        assert!(name.starts_with("results_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "results_".len() + 14 + ".csv".len());
    }

    #[test]
    fn test_base_env() {
        let env = request().env(None);
        assert_eq!(lookup(&env, "TG_MANAGE_API_ID"), Some("12345"));
        assert_eq!(lookup(&env, "TG_MANAGE_API_HASH"), Some("0123456789abcdef"));
        assert_eq!(lookup(&env, "TG_MANAGE_BOT_TOKEN"), Some("BQAsession"));
        assert_eq!(lookup(&env, "TG_MANAGE_REMOVE_ALL"), Some("False"));
        assert_eq!(lookup(&env, "TG_MANAGE_REMOVE_MESSAGE_IDS"), None);
        assert_eq!(lookup(&env, "TG_MANAGE_REMOVE_CHAT_ID"), None);
        assert_eq!(lookup(&env, "TG_MANAGE_PERSIST_PATH"), None);
    }

    #[test]
    fn test_removal_env_needs_ids_and_chat() {
        let mut r = request();
        r.message_ids = "1,2,3".parse().unwrap();
        assert!(!r.removes_messages());
        assert_eq!(lookup(&r.env(None), "TG_MANAGE_REMOVE_MESSAGE_IDS"), None);

        r.chat_id = -1001234567890;
        r.remove_all = true;
        let env = r.env(None);
        assert_eq!(lookup(&env, "TG_MANAGE_REMOVE_MESSAGE_IDS"), Some("[1,2,3]"));
        assert_eq!(lookup(&env, "TG_MANAGE_REMOVE_CHAT_ID"), Some("-1001234567890"));
        assert_eq!(lookup(&env, "TG_MANAGE_REMOVE_ALL"), Some("True"));
    }

    #[test]
    fn test_persist_path_env() {
        let r = request();
        let path = r.persist_path("./results/");
        assert_eq!(path, "./results/results_20240101120000.csv");
        assert_eq!(
            lookup(&r.env(Some(&path)), "TG_MANAGE_PERSIST_PATH"),
            Some("./results/results_20240101120000.csv")
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", request());
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(!rendered.contains("BQAsession"));
    }
}
