use crate::error::CliError;
use std::{collections::HashMap, fs, path::Path};

pub const SOURCE_VAR: &str = "TIMEOUT_MIGRATION_SOURCE";
pub const TARGET_VAR: &str = "TIMEOUT_MIGRATION_TARGET";

/// Process environment overlaid with an optional `.env` file; supplies
/// connection strings the command line leaves out.
#[derive(Debug, Clone, Default)]
pub struct EnvManager {
    vars: HashMap<String, String>,
}

impl EnvManager {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Loads `path`; its entries win over the process environment.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CliError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read env file {}: {e}", path.display()))
        })?;
        self.parse_env_content(&content)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// `explicit` when given, otherwise the value of `var`.
    pub fn connection(
        &self,
        explicit: Option<String>,
        role: &'static str,
        var: &'static str,
    ) -> Result<String, CliError> {
        explicit
            .or_else(|| self.get(var).map(str::to_string))
            .ok_or(CliError::MissingConnection { role, var })
    }

    fn parse_env_content(&mut self, content: &str) -> Result<(), CliError> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let Some((key, value)) = line.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid env file: malformed line {} (expected KEY=VALUE)",
                    line_num + 1
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(CliError::Config(format!(
                    "Invalid env file: empty key at line {}",
                    line_num + 1
                )));
            }

            self.vars.insert(key.to_string(), unquote(value.trim()).to_string());
        }
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_file_supplies_connection_strings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# migration\nexport {SOURCE_VAR}=\"postgres://u:p@db/legacy\"\n{TARGET_VAR}='sled:///var/native'"
        )
        .unwrap();

        let mut env = EnvManager::default();
        env.load_from_file(file.path()).unwrap();

        assert_eq!(
            env.connection(None, "source", SOURCE_VAR).unwrap(),
            "postgres://u:p@db/legacy"
        );
        assert_eq!(
            env.connection(None, "target", TARGET_VAR).unwrap(),
            "sled:///var/native"
        );
    }

    #[test]
    fn command_line_wins_over_environment() {
        let mut env = EnvManager::default();
        env.parse_env_content(&format!("{SOURCE_VAR}=from-env")).unwrap();

        let conn = env
            .connection(Some("from-flag".into()), "source", SOURCE_VAR)
            .unwrap();
        assert_eq!(conn, "from-flag");
    }

    #[test]
    fn missing_connection_names_the_variable() {
        let env = EnvManager::default();
        let err = env.connection(None, "target", TARGET_VAR).unwrap_err();
        assert!(err.to_string().contains(TARGET_VAR));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let mut env = EnvManager::default();
        assert!(env.parse_env_content("INVALID LINE WITHOUT EQUALS").is_err());
        assert!(env.parse_env_content("=value").is_err());
    }
}
