//! API bearer token persistence in the OS keychain.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "duka-cli";

#[derive(Clone)]
pub struct TokenStore {
    username: String,
}

impl TokenStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("api_token:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, String> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username).map_err(|error| error.to_string())
    }

    #[cfg(not(test))]
    pub fn load(&self) -> Result<Option<String>, String> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(error.to_string()),
        }
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<Option<String>, String> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| error.to_string())?;
        Ok(guard.get(&self.username).cloned())
    }

    #[cfg(not(test))]
    pub fn save(&self, token: &str) -> Result<(), String> {
        self.entry()?
            .set_password(token)
            .map_err(|error| error.to_string())
    }

    #[cfg(test)]
    pub fn save(&self, token: &str) -> Result<(), String> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| error.to_string())?;
        guard.insert(self.username.clone(), token.to_string());
        Ok(())
    }

    #[cfg(not(test))]
    pub fn clear(&self) -> Result<(), String> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(error.to_string()),
        }
    }

    #[cfg(test)]
    pub fn clear(&self) -> Result<(), String> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| error.to_string())?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Mask all but the last four characters for display.
pub fn mask_token(token: &str) -> String {
    let chars = token.chars().collect::<Vec<_>>();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("****{tail}")
}
