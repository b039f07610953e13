use std::str::FromStr;

pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// Value used as `server` header of the transfer service.
pub const fn server_identifier() -> &'static str {
    concat!("mocks3/", env!("CARGO_PKG_VERSION"))
}

/// Parse an environment variable, ignoring it (with a warning)
/// in case it is set but cannot be parsed.
pub fn parse_env_var<T>(name: &str) -> Option<T>
where
    T: FromStr<Err: std::fmt::Display>,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            rama::telemetry::tracing::warn!("ignore invalid value for env var {name}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_var() {
        assert_eq!(None, parse_env_var::<u64>("MOCKS3_TEST_SURELY_UNDEFINED_VAR"));
        assert!(parse_env_var::<String>("PATH").is_some());
    }

    #[test]
    fn test_server_identifier() {
        assert!(server_identifier().starts_with("mocks3/"));
    }
}
