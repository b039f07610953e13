use crate::TransferError;

/// Environment variable consulted when no server address is given explicitly.
pub const SERVER_ADDRESS_ENV: &str = "MOCKS3_SERVER_ADDRESS";

/// Compiled-in fallback server address.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:30000";

/// Resolve the server address: the explicit value, then the
/// [`SERVER_ADDRESS_ENV`] environment variable, then [`DEFAULT_SERVER_ADDRESS`].
///
/// Blank values are skipped. A leading `http://` and trailing slashes are
/// dropped, any other scheme is refused as the server only speaks plain http.
pub fn resolve_server_address(explicit: Option<&str>) -> Result<String, TransferError> {
    resolve_server_address_with_env(explicit, std::env::var(SERVER_ADDRESS_ENV).ok())
}

fn resolve_server_address_with_env(
    explicit: Option<&str>,
    env: Option<String>,
) -> Result<String, TransferError> {
    let Some(addr) = explicit
        .and_then(normalize_address)
        .or_else(|| env.as_deref().and_then(normalize_address))
    else {
        return Ok(DEFAULT_SERVER_ADDRESS.to_owned());
    };

    if let Some((scheme, _)) = addr.split_once("://") {
        return Err(TransferError::invalid_input(format!(
            "unsupported scheme '{scheme}' in server address '{addr}', expected host:port"
        )));
    }
    Ok(addr.to_owned())
}

fn normalize_address(addr: &str) -> Option<&str> {
    let addr = addr.trim();
    let addr = match addr.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => &addr[7..],
        _ => addr,
    };
    let addr = addr.trim_end_matches('/');
    (!addr.is_empty()).then_some(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_server_address_scheme() {
        assert_eq!(
            "host:30000",
            resolve_server_address_with_env(Some("http://host:30000/"), None).unwrap()
        );
        assert_eq!(
            "host:30000",
            resolve_server_address_with_env(None, Some("HTTP://host:30000".to_owned())).unwrap()
        );
        assert_eq!(
            DEFAULT_SERVER_ADDRESS,
            resolve_server_address_with_env(Some("http://"), None).unwrap()
        );
        assert!(
            resolve_server_address_with_env(Some("https://host:30000"), None)
                .unwrap_err()
                .is_invalid_input()
        );
    }

    #[test]
    fn test_resolve_server_address_order() {
        assert_eq!(
            "10.0.0.1:80",
            resolve_server_address_with_env(Some("10.0.0.1:80"), Some("env:1".to_owned())).unwrap()
        );
        assert_eq!(
            "env:1",
            resolve_server_address_with_env(None, Some(" env:1 ".to_owned())).unwrap()
        );
        assert_eq!(
            "env:1",
            resolve_server_address_with_env(Some("  "), Some("env:1".to_owned())).unwrap()
        );
        assert_eq!(
            DEFAULT_SERVER_ADDRESS,
            resolve_server_address_with_env(None, Some(String::new())).unwrap()
        );
        assert_eq!(
            DEFAULT_SERVER_ADDRESS,
            resolve_server_address_with_env(None, None).unwrap()
        );
    }
}
