use crate::domain::models::Credential;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const ACCESS_TOKEN_KEY: &str = "access_token";
const ACCESS_TOKEN_EXP_KEY: &str = "access_token_exp";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const PERSONAL_TOKEN_KEY: &str = "personal_token";
const AUTH_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    ACCESS_TOKEN_EXP_KEY,
    REFRESH_TOKEN_KEY,
    PERSONAL_TOKEN_KEY,
];

/// Holds the authentication material of the current user.
///
/// Token contents are never inspected here; the server decides validity.
pub trait CredentialStore: Send + Sync {
    fn read(&self) -> Result<Option<Credential>, InfraError>;
    fn write_credential(&self, credential: &Credential) -> Result<(), InfraError>;
    fn read_personal_token(&self) -> Result<Option<String>, InfraError>;
    fn write_personal_token(&self, token: &str) -> Result<(), InfraError>;
    /// Removes every stored piece of authentication material.
    fn clear(&self) -> Result<(), InfraError>;

    /// Replaces the access token, keeping any refresh token already stored.
    fn write(&self, token: &str, expires_at: DateTime<Utc>) -> Result<(), InfraError> {
        let refresh_token = self.read()?.and_then(|existing| existing.refresh_token);
        self.write_credential(&Credential {
            access_token: token.to_string(),
            expires_at,
            refresh_token,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, account_name: &str) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn get(&self, account_name: &str) -> Result<Option<String>, InfraError> {
        match self.entry(account_name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn delete(&self, account_name: &str) -> Result<(), InfraError> {
        match self.entry(account_name)?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("worktime.session")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn read(&self) -> Result<Option<Credential>, InfraError> {
        let Some(payload) = self.get("session")? else {
            return Ok(None);
        };
        let credential = serde_json::from_str::<Credential>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(credential))
    }

    fn write_credential(&self, credential: &Credential) -> Result<(), InfraError> {
        let payload = serde_json::to_string(credential)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry("session")?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn read_personal_token(&self) -> Result<Option<String>, InfraError> {
        self.get(PERSONAL_TOKEN_KEY)
    }

    fn write_personal_token(&self, token: &str) -> Result<(), InfraError> {
        self.entry(PERSONAL_TOKEN_KEY)?
            .set_password(token)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn clear(&self) -> Result<(), InfraError> {
        self.delete("session")?;
        self.delete(PERSONAL_TOKEN_KEY)
    }
}

/// File-backed store mirroring the browser's local storage keys.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    db_path: PathBuf,
}

impl SqliteCredentialStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn get(connection: &Connection, key: &str) -> Result<Option<String>, InfraError> {
        let value = connection
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(connection: &Connection, key: &str, value: &str) -> Result<(), InfraError> {
        connection.execute(
            "INSERT INTO local_storage (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn read(&self) -> Result<Option<Credential>, InfraError> {
        let connection = self.connect()?;
        let Some(access_token) = Self::get(&connection, ACCESS_TOKEN_KEY)? else {
            return Ok(None);
        };
        let Some(expires_raw) = Self::get(&connection, ACCESS_TOKEN_EXP_KEY)? else {
            return Ok(None);
        };
        let expires_epoch = expires_raw.trim().parse::<i64>().map_err(|error| {
            InfraError::Credential(format!("invalid {ACCESS_TOKEN_EXP_KEY} '{expires_raw}': {error}"))
        })?;
        let expires_at = Utc
            .timestamp_opt(expires_epoch, 0)
            .single()
            .ok_or_else(|| {
                InfraError::Credential(format!("{ACCESS_TOKEN_EXP_KEY} out of range: {expires_epoch}"))
            })?;

        Ok(Some(Credential {
            access_token,
            expires_at,
            refresh_token: Self::get(&connection, REFRESH_TOKEN_KEY)?,
        }))
    }

    fn write_credential(&self, credential: &Credential) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        Self::set(&transaction, ACCESS_TOKEN_KEY, &credential.access_token)?;
        Self::set(
            &transaction,
            ACCESS_TOKEN_EXP_KEY,
            &credential.expires_at.timestamp().to_string(),
        )?;
        match credential.refresh_token.as_deref() {
            Some(refresh_token) => Self::set(&transaction, REFRESH_TOKEN_KEY, refresh_token)?,
            None => {
                transaction.execute(
                    "DELETE FROM local_storage WHERE key = ?1",
                    params![REFRESH_TOKEN_KEY],
                )?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    fn read_personal_token(&self) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        Self::get(&connection, PERSONAL_TOKEN_KEY)
    }

    fn write_personal_token(&self, token: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        Self::set(&connection, PERSONAL_TOKEN_KEY, token)
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        for key in AUTH_KEYS {
            connection.execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySlots {
    credential: Option<Credential>,
    personal_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    slots: Mutex<MemorySlots>,
}

impl InMemoryCredentialStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemorySlots>, InfraError> {
        self.slots
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn read(&self) -> Result<Option<Credential>, InfraError> {
        Ok(self.lock()?.credential.clone())
    }

    fn write_credential(&self, credential: &Credential) -> Result<(), InfraError> {
        self.lock()?.credential = Some(credential.clone());
        Ok(())
    }

    fn read_personal_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self.lock()?.personal_token.clone())
    }

    fn write_personal_token(&self, token: &str) -> Result<(), InfraError> {
        self.lock()?.personal_token = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let mut slots = self.lock()?;
        slots.credential = None;
        slots.personal_token = None;
        Ok(())
    }
}

/// Store picked by `credentialBackend` at startup.
#[derive(Debug)]
pub enum ConfiguredCredentialStore {
    Keyring(KeyringCredentialStore),
    Sqlite(SqliteCredentialStore),
}

impl ConfiguredCredentialStore {
    fn inner(&self) -> &dyn CredentialStore {
        match self {
            Self::Keyring(store) => store,
            Self::Sqlite(store) => store,
        }
    }
}

impl CredentialStore for ConfiguredCredentialStore {
    fn read(&self) -> Result<Option<Credential>, InfraError> {
        self.inner().read()
    }

    fn write_credential(&self, credential: &Credential) -> Result<(), InfraError> {
        self.inner().write_credential(credential)
    }

    fn read_personal_token(&self) -> Result<Option<String>, InfraError> {
        self.inner().read_personal_token()
    }

    fn write_personal_token(&self, token: &str) -> Result<(), InfraError> {
        self.inner().write_personal_token(token)
    }

    fn clear(&self) -> Result<(), InfraError> {
        self.inner().clear()
    }
}
