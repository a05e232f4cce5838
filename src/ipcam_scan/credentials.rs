//! Credential provider: decrypted, priority-ordered credentials per installation

use std::sync::Arc;

use super::repository::CredentialRepository;
use super::types::PlainCredential;
use crate::error::Result;
use crate::secrets::SecretProtector;

#[derive(Clone)]
pub struct CredentialProvider {
    repository: CredentialRepository,
    protector: Arc<dyn SecretProtector>,
}

impl CredentialProvider {
    pub fn new(repository: CredentialRepository, protector: Arc<dyn SecretProtector>) -> Self {
        Self {
            repository,
            protector,
        }
    }

    /// Active credentials, lowest priority value first.
    ///
    /// A credential whose secret cannot be unprotected is dropped.
    pub async fn load(&self, installation_id: i64) -> Result<Vec<PlainCredential>> {
        let bindings = self.repository.active_bindings(installation_id).await?;

        let mut credentials: Vec<PlainCredential> = bindings
            .into_iter()
            .filter_map(|b| match self.protector.unprotect(&b.password_protected) {
                Ok(password) => Some(PlainCredential {
                    credential_id: b.credential_id,
                    username: b.username,
                    password,
                    priority: b.priority,
                }),
                Err(e) => {
                    tracing::warn!(
                        credential_id = b.credential_id,
                        error = %e,
                        "Credential unusable, skipping"
                    );
                    None
                }
            })
            .collect();

        credentials.sort_by_key(|c| c.priority);
        Ok(credentials)
    }

    /// Same as [`load`](Self::load) with `preferred` moved to the front
    pub async fn load_preferring(
        &self,
        installation_id: i64,
        preferred: Option<i64>,
    ) -> Result<Vec<PlainCredential>> {
        let credentials = self.load(installation_id).await?;
        Ok(promote_preferred(credentials, preferred))
    }
}

/// Move the preferred credential to the front, keeping the rest in order
pub fn promote_preferred(
    mut credentials: Vec<PlainCredential>,
    preferred: Option<i64>,
) -> Vec<PlainCredential> {
    let Some(preferred) = preferred else {
        return credentials;
    };

    match credentials.iter().position(|c| c.credential_id == preferred) {
        Some(idx) if idx > 0 => {
            let credential = credentials.remove(idx);
            credentials.insert(0, credential);
        }
        _ => {}
    }
    credentials
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ipcam_scan::repository::InstallationRepository;
    use crate::secrets::PlaintextProtector;
    use sqlx::sqlite::SqlitePoolOptions;

    fn cred(id: i64, priority: i64) -> PlainCredential {
        PlainCredential {
            credential_id: id,
            username: format!("user{}", id),
            password: "pw".to_string(),
            priority,
        }
    }

    fn ids(list: &[PlainCredential]) -> Vec<i64> {
        list.iter().map(|c| c.credential_id).collect()
    }

    #[test]
    fn test_promote_preferred_moves_to_front() {
        let list = vec![cred(1, 1), cred(2, 2), cred(3, 3)];
        assert_eq!(ids(&promote_preferred(list, Some(2))), vec![2, 1, 3]);
    }

    #[test]
    fn test_promote_preferred_noop_cases() {
        let list = vec![cred(1, 1), cred(2, 2)];
        assert_eq!(ids(&promote_preferred(list.clone(), Some(1))), vec![1, 2]);
        assert_eq!(ids(&promote_preferred(list.clone(), Some(99))), vec![1, 2]);
        assert_eq!(ids(&promote_preferred(list, None)), vec![1, 2]);
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut c = cred(1, 1);
        c.password = "hunter2".to_string();
        let text = format!("{:?}", c);
        assert!(!text.contains("hunter2"));
    }

    /// Fails to unprotect one specific ciphertext
    struct PickyProtector;

    impl SecretProtector for PickyProtector {
        fn protect(&self, plaintext: &str) -> Result<String> {
            Ok(plaintext.to_string())
        }

        fn unprotect(&self, protected: &str) -> Result<String> {
            if protected == "broken" {
                Err(Error::Secret("bad key".to_string()))
            } else {
                Ok(protected.to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_provider_orders_and_filters() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::migrate(&pool).await.unwrap();

        let installation = InstallationRepository::new(pool.clone())
            .create("SITE-1", None)
            .await
            .unwrap();
        let repo = CredentialRepository::new(pool.clone());
        let protector = PlaintextProtector;

        let p3 = repo.create(&protector, "p3", "a", None).await.unwrap();
        let p1 = repo.create(&protector, "p1", "b", None).await.unwrap();
        let p2 = repo.create(&protector, "p2", "c", None).await.unwrap();
        let inactive_binding = repo.create(&protector, "ib", "d", None).await.unwrap();
        let inactive_cred = repo.create(&protector, "ic", "e", None).await.unwrap();
        let broken = repo.create(&protector, "bad", "broken", None).await.unwrap();

        repo.bind(installation.id, p3, 3, true).await.unwrap();
        repo.bind(installation.id, p1, 1, true).await.unwrap();
        repo.bind(installation.id, p2, 2, true).await.unwrap();
        repo.bind(installation.id, inactive_binding, 1, false).await.unwrap();
        repo.bind(installation.id, inactive_cred, 1, true).await.unwrap();
        repo.bind(installation.id, broken, 5, true).await.unwrap();
        repo.set_active(inactive_cred, false).await.unwrap();

        let provider = CredentialProvider::new(repo, Arc::new(PickyProtector));

        let list = provider.load(installation.id).await.unwrap();
        assert_eq!(ids(&list), vec![p1, p2, p3]);

        let list = provider
            .load_preferring(installation.id, Some(p2))
            .await
            .unwrap();
        assert_eq!(ids(&list), vec![p2, p1, p3]);
        assert_eq!(list[0].password, "c");
    }
}
