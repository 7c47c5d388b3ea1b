use std::env;

/// Source of environment variables. Configuration overrides read through this
/// so tests never touch the process environment.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;
}

/// Zero-sized type, delegates to `std::env`.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

impl<S> ReadEnv for std::collections::HashMap<&str, S>
where
    S: AsRef<str>,
{
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        self.get(key)
            .map(|value| value.as_ref().to_string())
            .ok_or(env::VarError::NotPresent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_system_env_delegation() {
        let std_result = env::var("PATH");
        let provider_result = SystemEnv.var("PATH");
        assert_eq!(std_result.is_ok(), provider_result.is_ok());
    }

    #[test]
    fn test_map_env() {
        let vars = HashMap::from([("WECOM_CID", "ww123")]);
        assert_eq!(vars.var("WECOM_CID").unwrap(), "ww123");
        assert_eq!(vars.var("WECOM_AID"), Err(env::VarError::NotPresent));
    }
}
