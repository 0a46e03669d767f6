use regex::Regex;
use std::env;

use crate::ConfigError;

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m: &String| m == var_name) {
                    missing.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        env::set_var("AFS_TEST_HOME", "/srv/afs");
        env::set_var("AFS_TEST_DRIVE", "main");

        let input = "path: ${AFS_TEST_HOME}/${AFS_TEST_DRIVE}.db";
        let result = interpolate_env(input).unwrap();
        assert_eq!(result, "path: /srv/afs/main.db");
    }

    #[test]
    fn test_interpolate_env_missing() {
        let input = "root: ${AFS_MISSING_VAR_12345}";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["AFS_MISSING_VAR_12345"]);
            }
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_missing_reported_once() {
        let input = "${AFS_MISSING_TWICE_1} ${AFS_MISSING_TWICE_1} ${AFS_MISSING_TWICE_2}";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["AFS_MISSING_TWICE_1", "AFS_MISSING_TWICE_2"]);
            }
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_no_vars() {
        let input = "drives: {}";
        assert_eq!(interpolate_env(input).unwrap(), "drives: {}");
    }

    #[test]
    fn test_interpolate_env_adjacent_vars() {
        env::set_var("AFS_VAR_A", "mmap");
        env::set_var("AFS_VAR_B", "file");
        let result = interpolate_env("${AFS_VAR_A}${AFS_VAR_B}").unwrap();
        assert_eq!(result, "mmapfile");
    }

    #[test]
    fn test_interpolate_env_value_not_reinterpolated() {
        env::set_var("AFS_NESTED_VAR", "${AFS_VAR_A}");
        let result = interpolate_env("${AFS_NESTED_VAR}").unwrap();
        assert_eq!(result, "${AFS_VAR_A}");
    }

    #[test]
    fn test_interpolate_env_partial_syntax_not_matched() {
        let input = "not a $VAR or ${VAR variable";
        assert_eq!(interpolate_env(input).unwrap(), input);
    }
}
