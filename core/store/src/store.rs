//! Domain-level access to persisted state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::codec::{decode, encode};
use crate::config::StoreOptions;
use crate::engine::{Engine, ReadTxn};
use crate::keys::{self, user_key, APP_SECRET, PLEX_PIN, PLEX_SERVER, PLEX_TOKEN, USER_PREFIX};
use crate::model::{PlexPin, Server, User};
use plexaccess_common::{Error, Result, SensitiveBytes};
use plexaccess_crypto::{open_token, seal_token};

/// Persistent state for one installation.
///
/// Holds the engine handle and the in-memory copy of the app secret. Every
/// method runs in a single engine transaction. `Store` is `Send + Sync`;
/// share it behind an `Arc`.
pub struct Store {
    engine: Engine,
    secret: RwLock<Option<SensitiveBytes>>,
    options: StoreOptions,
}

impl Store {
    /// Open the store rooted at `dir`, creating the directory if needed.
    ///
    /// # Postconditions
    /// - The engine is open and holds the directory's lock
    /// - The in-memory secret slot is empty
    ///
    /// # Errors
    /// - `Error::Io` if the directory cannot be created
    /// - `Error::Engine` if the database cannot be opened or is already
    ///   held by another store
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let dir = dir.as_ref();

        if dir.exists() {
            if options.verbose {
                debug!(path = %dir.display(), "Store directory exists");
            }
        } else {
            info!(path = %dir.display(), "Creating store directory");
            std::fs::create_dir_all(dir)?;
        }

        let engine = Engine::open(dir)?;
        info!(path = %engine.path().display(), "Store opened");

        Ok(Self {
            engine,
            secret: RwLock::new(None),
            options,
        })
    }

    /// Options this store was opened with.
    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Close the store.
    ///
    /// Closing twice is harmless: the second call logs and returns `false`.
    /// A failure while closing is logged, not returned. Every other method
    /// fails with `Error::Closed` afterwards.
    pub fn close(&self) -> bool {
        self.forget_secret();

        match self.engine.close() {
            Ok(true) => {
                info!("Store closed");
                true
            }
            Ok(false) => {
                warn!("Store already closed");
                false
            }
            Err(e) => {
                error!(error = %e, "Store failed to close cleanly");
                true
            }
        }
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Fetch the app secret.
    ///
    /// An unset secret is a valid initial state: it comes back as empty
    /// bytes, not `Error::NotFound`.
    pub fn get_secret(&self) -> Result<SensitiveBytes> {
        let secret = self.engine.view(|txn| self.load_secret(txn))?;
        Ok(secret.unwrap_or_default())
    }

    /// Persist the app secret, replacing any previous one, and use it for
    /// token operations from now on.
    ///
    /// The cached copy is replaced while the write transaction still holds
    /// the engine, so concurrent saves leave the cache equal to the last
    /// committed secret. If the commit fails the cache is dropped and the
    /// next token operation reloads from disk.
    pub fn save_secret(&self, secret: &[u8]) -> Result<()> {
        let saved = self.engine.update(|txn| {
            txn.set(APP_SECRET, secret)?;
            let cached = (!secret.is_empty()).then(|| SensitiveBytes::from(secret));
            *self.secret.write().unwrap_or_else(PoisonError::into_inner) = cached;
            Ok(())
        });

        if saved.is_err() {
            self.forget_secret();
        }
        saved?;

        debug!("App secret saved");
        Ok(())
    }

    /// Fetch and decrypt the upstream token.
    ///
    /// # Errors
    /// - `Error::NotFound` if no token is stored
    /// - `Error::Decryption` if no app secret is available or the stored
    ///   token does not open with it
    pub fn get_plex_token(&self) -> Result<String> {
        self.engine.view(|txn| {
            let sealed = txn
                .get(PLEX_TOKEN)?
                .ok_or_else(|| Error::NotFound("plex token".to_string()))?;

            let secret = self
                .load_secret(txn)?
                .ok_or_else(|| Error::Decryption("app secret is not set".to_string()))?;

            open_token(secret.as_bytes(), &sealed).inspect_err(|e| {
                warn!(error = %e, "Token decryption failed");
            })
        })
    }

    /// Encrypt and persist the upstream token.
    ///
    /// The secret is resolved and the token sealed inside the write
    /// transaction, before anything is written; a failure leaves the stored
    /// token untouched.
    ///
    /// # Errors
    /// - `Error::Encryption` if no usable app secret is available
    pub fn save_plex_token(&self, token: &str) -> Result<()> {
        self.engine.update(|txn| {
            let secret = self
                .load_secret(txn)?
                .ok_or_else(|| Error::Encryption("app secret is not set".to_string()))?;

            let sealed = seal_token(secret.as_bytes(), token)?;
            txn.set(PLEX_TOKEN, &sealed)
        })?;

        debug!("Plex token saved");
        Ok(())
    }

    /// Fetch the pending pin.
    ///
    /// # Errors
    /// - `Error::NotFound` if no authorization flow is in progress
    pub fn get_plex_pin(&self) -> Result<PlexPin> {
        self.engine.view(|txn| get_entity(txn, PLEX_PIN, "plex pin"))
    }

    /// Persist the pending pin.
    pub fn save_plex_pin(&self, pin: &PlexPin) -> Result<()> {
        let bytes = encode(pin)?;
        self.engine.update(|txn| txn.set(PLEX_PIN, &bytes))
    }

    /// Drop the pending pin. Clearing an absent pin succeeds.
    pub fn clear_plex_pin(&self) -> Result<()> {
        self.engine.update(|txn| txn.delete(PLEX_PIN))?;
        debug!("Plex pin cleared");
        Ok(())
    }

    /// Fetch the bound server.
    ///
    /// # Errors
    /// - `Error::NotFound` if no server has been saved
    pub fn get_plex_server(&self) -> Result<Server> {
        self.engine
            .view(|txn| get_entity(txn, PLEX_SERVER, "plex server"))
    }

    /// Replace the bound server.
    pub fn save_plex_server(&self, server: &Server) -> Result<()> {
        let bytes = encode(server)?;
        self.engine.update(|txn| txn.set(PLEX_SERVER, &bytes))?;
        info!(name = %server.name, "Plex server saved");
        Ok(())
    }

    /// Persist one user, replacing any record with the same id.
    ///
    /// # Errors
    /// - `Error::Validation` if the id is empty
    pub fn save_user(&self, user: &User) -> Result<()> {
        let key = user_key(&user.plex_user_id)?;
        let bytes = encode(user)?;

        self.engine.update(|txn| txn.set(&key, &bytes))?;
        debug!(id = %user.plex_user_id, "User saved");
        Ok(())
    }

    /// Persist several users in one transaction.
    ///
    /// All or nothing: if any user fails validation, encoding, or the write
    /// itself, none of the users in this call are stored.
    pub fn save_users(&self, users: &[User]) -> Result<()> {
        self.engine.update(|txn| {
            for user in users {
                let key = user_key(&user.plex_user_id)?;
                if self.options.verbose {
                    debug!(key = %keys::display(&key), "Saving user");
                }
                txn.set(&key, &encode(user)?)?;
            }
            Ok(())
        })?;

        debug!(count = users.len(), "Users saved");
        Ok(())
    }

    /// Fetch one user.
    ///
    /// # Errors
    /// - `Error::NotFound` if no user has this id; an empty id never names
    ///   a user, so it is not found either
    pub fn get_user(&self, id: &str) -> Result<User> {
        if id.is_empty() {
            return Err(Error::NotFound("user with empty id".to_string()));
        }
        let key = user_key(id)?;
        self.engine
            .view(|txn| get_entity(txn, &key, &format!("user {}", id)))
    }

    /// Fetch every user, keyed by plex user id.
    ///
    /// A record that fails to decode aborts the whole scan.
    pub fn get_all_users(&self) -> Result<BTreeMap<String, User>> {
        self.engine.view(|txn| {
            let mut users = BTreeMap::new();

            txn.scan_prefix(USER_PREFIX, |key, value| {
                if self.options.verbose {
                    debug!(key = %keys::display(key), "Scanned user record");
                }
                let user: User = decode(value)?;
                users.insert(user.plex_user_id.clone(), user);
                Ok(())
            })?;

            Ok(users)
        })
    }

    /// Remove one user. Removing an unknown id succeeds.
    ///
    /// # Errors
    /// - `Error::Validation` if `id` is empty, before the engine is touched
    pub fn delete_user(&self, id: &str) -> Result<()> {
        let key = user_key(id)?;
        self.engine.update(|txn| txn.delete(&key))?;
        debug!(id = %id, "User deleted");
        Ok(())
    }

    /// Remove several users in one transaction.
    ///
    /// Best effort, unlike `save_users`: an id that cannot be deleted is
    /// logged and skipped, and the remaining ids are still removed. Only a
    /// failure of the transaction itself is returned.
    ///
    /// Some SQLite failures (disk full, I/O error, out of memory) roll back
    /// the whole transaction rather than one statement. Once that happens
    /// nothing from this call can be kept, so the loop stops and the call
    /// fails with `Error::Engine`.
    pub fn delete_users<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        self.engine.update(|txn| {
            for id in ids {
                let id = id.as_ref();
                let deleted = user_key(id).and_then(|key| {
                    if self.options.verbose {
                        debug!(key = %keys::display(&key), "Deleting user");
                    }
                    txn.delete(&key)
                });

                if let Err(e) = deleted {
                    warn!(id = %id, error = %e, "Failed to delete user");
                    if !txn.is_active() {
                        return Err(Error::Engine(format!(
                            "transaction rolled back while deleting user {}: {}",
                            id, e
                        )));
                    }
                }
            }
            Ok(())
        })
    }

    fn cached_secret(&self) -> Option<SensitiveBytes> {
        self.secret
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn forget_secret(&self) {
        *self.secret.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Return the cached secret, loading it through `txn` on first use.
    fn load_secret(&self, txn: &ReadTxn<'_>) -> Result<Option<SensitiveBytes>> {
        if let Some(secret) = self.cached_secret() {
            return Ok(Some(secret));
        }

        let loaded = txn
            .get(APP_SECRET)?
            .filter(|bytes| !bytes.is_empty())
            .map(SensitiveBytes::new);

        if let Some(secret) = &loaded {
            *self.secret.write().unwrap_or_else(PoisonError::into_inner) = Some(secret.clone());
        }

        Ok(loaded)
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }
}

fn get_entity<E: crate::codec::Entity>(txn: &ReadTxn<'_>, key: &[u8], what: &str) -> Result<E> {
    let bytes = txn
        .get(key)?
        .ok_or_else(|| Error::NotFound(what.to_string()))?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssignedMedia;
    use plexaccess_crypto::generate_secret;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        (dir, store)
    }

    fn user(id: &str) -> User {
        User::new(id, format!("name-{}", id)).with_media(AssignedMedia {
            id: "99".to_string(),
            title: "Heat".to_string(),
            status: "unwatched".to_string(),
        })
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("nested").join("store");

        let store = Store::open(&dir, StoreOptions::default()).unwrap();

        assert!(dir.is_dir());
        assert!(!store.is_closed());
    }

    #[test]
    fn test_second_open_fails_while_first_is_open() {
        let (dir, store) = open_store();

        let second = Store::open(dir.path(), StoreOptions::default());
        assert!(matches!(second, Err(Error::Engine(_))));

        store.close();
        assert!(Store::open(dir.path(), StoreOptions::default()).is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, store) = open_store();

        assert!(store.close());
        assert!(!store.close());
        assert!(store.is_closed());
    }

    #[test]
    fn test_operations_fail_after_close() {
        let (_dir, store) = open_store();
        store.save_user(&user("1")).unwrap();
        store.close();

        assert!(matches!(store.get_user("1"), Err(Error::Closed)));
        assert!(matches!(store.save_user(&user("2")), Err(Error::Closed)));
        assert!(matches!(store.get_secret(), Err(Error::Closed)));
        assert!(matches!(store.get_all_users(), Err(Error::Closed)));
    }

    #[test]
    fn test_secret_absent_is_empty() {
        let (_dir, store) = open_store();

        let secret = store.get_secret().unwrap();
        assert!(secret.is_empty());
    }

    #[test]
    fn test_secret_roundtrip() {
        let (_dir, store) = open_store();
        let secret = generate_secret();

        store.save_secret(secret.as_bytes()).unwrap();

        assert_eq!(store.get_secret().unwrap(), secret);
    }

    #[test]
    fn test_token_roundtrip_with_correct_secret() {
        let (_dir, store) = open_store();
        store.save_secret(generate_secret().as_bytes()).unwrap();

        store.save_plex_token("xyz-plex-token").unwrap();

        assert_eq!(store.get_plex_token().unwrap(), "xyz-plex-token");
    }

    #[test]
    fn test_token_is_not_stored_in_plaintext() {
        let (_dir, store) = open_store();
        store.save_secret(generate_secret().as_bytes()).unwrap();
        store.save_plex_token("xyz-plex-token").unwrap();

        let raw = store
            .engine()
            .view(|txn| txn.get(PLEX_TOKEN))
            .unwrap()
            .unwrap();

        assert!(!String::from_utf8_lossy(&raw).contains("xyz-plex-token"));
    }

    #[test]
    fn test_token_with_other_secret_fails() {
        let (_dir, store) = open_store();
        store.save_secret(generate_secret().as_bytes()).unwrap();
        store.save_plex_token("xyz-plex-token").unwrap();

        store.save_secret(generate_secret().as_bytes()).unwrap();

        assert!(matches!(store.get_plex_token(), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_token_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
            store.save_secret(generate_secret().as_bytes()).unwrap();
            store.save_plex_token("persisted-token").unwrap();
            store.close();
        }

        // Fresh handle: the secret is loaded from disk on first use.
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.get_plex_token().unwrap(), "persisted-token");
    }

    #[test]
    fn test_token_without_secret() {
        let (_dir, store) = open_store();

        assert!(matches!(
            store.save_plex_token("t"),
            Err(Error::Encryption(_))
        ));
        assert!(matches!(store.get_plex_token(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failed_token_encryption_keeps_old_token() {
        let (_dir, store) = open_store();
        store.save_secret(generate_secret().as_bytes()).unwrap();
        store.save_plex_token("original").unwrap();
        let before = store.engine().view(|txn| txn.get(PLEX_TOKEN)).unwrap();

        // A secret of the wrong length cannot seal anything.
        store.save_secret(b"short").unwrap();
        assert!(matches!(
            store.save_plex_token("replacement"),
            Err(Error::Encryption(_))
        ));

        let after = store.engine().view(|txn| txn.get(PLEX_TOKEN)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_absent_entities_are_not_found() {
        let (_dir, store) = open_store();

        assert!(matches!(store.get_plex_pin(), Err(Error::NotFound(_))));
        assert!(matches!(store.get_plex_server(), Err(Error::NotFound(_))));
        assert!(matches!(store.get_user("nobody"), Err(Error::NotFound(_))));
        assert!(matches!(store.get_plex_token(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_pin_lifecycle() {
        let (_dir, store) = open_store();
        let pin = PlexPin {
            id: 42,
            code: "WXYZ".to_string(),
            expires_in: 900,
            ..PlexPin::default()
        };

        store.save_plex_pin(&pin).unwrap();
        assert_eq!(store.get_plex_pin().unwrap(), pin);

        store.clear_plex_pin().unwrap();
        assert!(matches!(store.get_plex_pin(), Err(Error::NotFound(_))));

        // Clearing again is fine.
        store.clear_plex_pin().unwrap();
    }

    #[test]
    fn test_server_is_replaced_wholesale() {
        let (_dir, store) = open_store();

        store
            .save_plex_server(&Server::new("den", "http://den:32400"))
            .unwrap();
        store
            .save_plex_server(&Server::new("attic", String::new()))
            .unwrap();

        assert_eq!(
            store.get_plex_server().unwrap(),
            Server::new("attic", String::new())
        );
    }

    #[test]
    fn test_save_user_overwrites_same_id() {
        let (_dir, store) = open_store();

        store.save_user(&user("7")).unwrap();
        let mut updated = user("7");
        updated.revoke_access = true;
        store.save_user(&updated).unwrap();

        assert_eq!(store.get_user("7").unwrap(), updated);
        assert_eq!(store.get_all_users().unwrap().len(), 1);
    }

    #[test]
    fn test_save_users_is_all_or_nothing() {
        let (_dir, store) = open_store();
        let malformed = User::new("", "no id");

        let result = store.save_users(&[user("A"), user("B"), malformed]);

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(matches!(store.get_user("A"), Err(Error::NotFound(_))));
        assert!(matches!(store.get_user("B"), Err(Error::NotFound(_))));
        assert!(store.get_all_users().unwrap().is_empty());
    }

    #[test]
    fn test_save_users_commits_batch() {
        let (_dir, store) = open_store();

        store.save_users(&[user("A"), user("B")]).unwrap();

        assert_eq!(store.get_user("A").unwrap(), user("A"));
        assert_eq!(store.get_user("B").unwrap(), user("B"));
    }

    #[test]
    fn test_get_all_users_only_returns_users() {
        let (_dir, store) = open_store();
        store.save_secret(generate_secret().as_bytes()).unwrap();
        store.save_plex_token("token").unwrap();
        store.save_plex_pin(&PlexPin::default()).unwrap();
        store
            .save_plex_server(&Server::new("den", "http://den:32400"))
            .unwrap();
        store
            .save_users(&[user("1"), user("2"), user("3")])
            .unwrap();

        // Undecodable bytes just past the user range must not be reached.
        store
            .engine()
            .update(|txn| txn.set(keys::ALL_USERS, b"\xff not json"))
            .unwrap();

        let users = store.get_all_users().unwrap();
        let ids: Vec<&str> = users.keys().map(String::as_str).collect();

        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(users["2"], user("2"));
    }

    #[test]
    fn test_corrupt_user_is_decode_error() {
        let (_dir, store) = open_store();
        store.save_user(&user("1")).unwrap();
        store
            .engine()
            .update(|txn| txn.set(&user_key("2")?, b"{broken"))
            .unwrap();

        assert!(matches!(store.get_user("2"), Err(Error::Decode(_))));
        assert!(matches!(store.get_all_users(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_delete_user() {
        let (_dir, store) = open_store();
        store.save_user(&user("1")).unwrap();

        store.delete_user("1").unwrap();
        assert!(matches!(store.get_user("1"), Err(Error::NotFound(_))));

        // Unknown ids are not an error.
        store.delete_user("1").unwrap();
    }

    #[test]
    fn test_delete_user_empty_id_checked_before_engine() {
        let (_dir, store) = open_store();
        store.save_user(&user("1")).unwrap();

        assert!(matches!(store.delete_user(""), Err(Error::Validation(_))));
        assert_eq!(store.get_all_users().unwrap().len(), 1);

        // A closed engine would report Closed; validation wins.
        store.close();
        assert!(matches!(store.delete_user(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_delete_users_is_best_effort() {
        let (_dir, store) = open_store();
        store.save_users(&[user("X"), user("Z")]).unwrap();

        store.delete_users(&["X", "Y"]).unwrap();
        assert!(matches!(store.get_user("X"), Err(Error::NotFound(_))));

        // An invalid id in the middle is skipped; later ids still go.
        store.delete_users(&["", "Z"]).unwrap();
        assert!(store.get_all_users().unwrap().is_empty());
    }

    #[test]
    fn test_verbose_store_behaves_the_same() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), StoreOptions::new().verbose(true)).unwrap();

        store.save_users(&[user("1"), user("2")]).unwrap();
        store.delete_users(&["1"]).unwrap();

        assert!(store.options().verbose);
        assert_eq!(store.get_all_users().unwrap().len(), 1);
    }

    #[test]
    fn test_get_user_empty_id_is_not_found() {
        let (_dir, store) = open_store();
        store.save_user(&user("1")).unwrap();

        assert!(matches!(store.get_user(""), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_concurrent_secret_saves_keep_cache_consistent() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..50u8 {
                        let secret = [i.wrapping_mul(31).wrapping_add(round); 32];
                        store.save_secret(&secret).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let on_disk = store
            .engine()
            .view(|txn| txn.get(APP_SECRET))
            .unwrap()
            .unwrap();
        assert_eq!(store.cached_secret().unwrap().as_bytes(), on_disk.as_slice());

        // A token sealed now must open with the secret that is on disk.
        store.save_plex_token("after-race").unwrap();
        let sealed = store
            .engine()
            .view(|txn| txn.get(PLEX_TOKEN))
            .unwrap()
            .unwrap();
        assert_eq!(open_token(&on_disk, &sealed).unwrap(), "after-race");
    }

    #[test]
    fn test_concurrent_callers() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.save_user(&user(&i.to_string())).unwrap();
                    store.get_user(&i.to_string()).unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_all_users().unwrap().len(), 8);
    }
}
