/// Username/password credentials for the upstream SOCKS5 server
#[derive(Clone, PartialEq, Eq)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

impl Auth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Build credentials from an optional username/password pair.
    ///
    /// Both must be present and non-empty, or both absent.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Result<Option<Self>, String> {
        match (username, password) {
            (None, None) => Ok(None),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Ok(Some(Self::new(u, p))),
            _ => Err("SOCKS5 auth requires both --socks-username and --socks-password".to_string()),
        }
    }
}

// Keep the password out of logs
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_or_neither() {
        assert_eq!(Auth::from_parts(None, None).unwrap(), None);
        let auth = Auth::from_parts(Some("u".into()), Some("p".into())).unwrap();
        assert_eq!(auth, Some(Auth::new("u".into(), "p".into())));
        assert!(Auth::from_parts(Some("u".into()), None).is_err());
        assert!(Auth::from_parts(None, Some("p".into())).is_err());
        assert!(Auth::from_parts(Some(String::new()), Some("p".into())).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let auth = Auth::new("alice".into(), "hunter2".into());
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
