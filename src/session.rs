use std::{path::Path, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    models::User,
    prefs::PreferenceFile,
    users::{UserError, UserStore},
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionPrefs {
    #[serde(default)]
    pub username: Option<String>,
}

/// The logged-in user. Only the login id is persisted; the user row is
/// reloaded from the store on `restore`.
#[derive(Clone)]
pub struct Session {
    users: UserStore,
    file: Arc<PreferenceFile<SessionPrefs>>,
    current: Arc<RwLock<Option<User>>>,
}

impl Session {
    pub async fn open(users: UserStore, prefs_dir: impl AsRef<Path>) -> Result<Self, UserError> {
        let file = PreferenceFile::open(prefs_dir.as_ref().join("session.json")).await?;
        Ok(Self { users, file: Arc::new(file), current: Arc::new(RwLock::new(None)) })
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn current_user(&self) -> Option<User> {
        self.current.read().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.file.get().username
    }

    pub async fn login(&self, login_id: &str, password: &str) -> Result<User, UserError> {
        let user = self.users.login(login_id, password).await?;
        self.remember(&user).await?;
        info!(login_id = %user.login_id, "logged in");
        Ok(user)
    }

    /// Records an already authenticated user, e.g. right after registration.
    pub async fn remember(&self, user: &User) -> Result<(), UserError> {
        let login_id = user.login_id.clone();
        self.file.update(|p| p.username = Some(login_id)).await?;
        *self.current.write() = Some(user.clone());
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), UserError> {
        self.file.update(|p| p.username = None).await?;
        *self.current.write() = None;
        Ok(())
    }

    /// Reloads the persisted user. A session pointing at a user that no
    /// longer exists is cleared.
    pub async fn restore(&self) -> Result<Option<User>, UserError> {
        let Some(username) = self.username() else {
            return Ok(None);
        };

        match self.users.get(&username).await? {
            Some(user) => {
                *self.current.write() = Some(user.clone());
                Ok(Some(user))
            },
            None => {
                warn!(%username, "session user is gone, clearing session");
                self.logout().await?;
                Ok(None)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;

    use super::*;
    use crate::{db, users::Registration};

    async fn users() -> UserStore {
        UserStore::new(db::connect_and_migrate("sqlite::memory:").await.unwrap())
    }

    async fn register(users: &UserStore, login_id: &str) -> User {
        users
            .register(&Registration {
                login_id: login_id.to_string(),
                password: "secret1".to_string(),
                confirm_password: "secret1".to_string(),
                preferred_name: "Sam".to_string(),
                birth_date: Some(date(1990, 4, 12)),
                profile_picture_path: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let users = users().await;
        let sam = register(&users, "sam").await;

        let session = Session::open(users.clone(), dir.path()).await.unwrap();
        session.login("sam", "secret1").await.unwrap();
        assert_eq!(session.current_user(), Some(sam.clone()));

        let reopened = Session::open(users, dir.path()).await.unwrap();
        assert_eq!(reopened.current_user(), None);
        assert_eq!(reopened.restore().await.unwrap(), Some(sam));
    }

    #[tokio::test]
    async fn failed_login_leaves_session_empty() {
        let dir = tempfile::tempdir().unwrap();
        let users = users().await;
        register(&users, "sam").await;

        let session = Session::open(users, dir.path()).await.unwrap();
        assert!(session.login("sam", "nope123").await.is_err());
        assert_eq!(session.username(), None);
        assert_eq!(session.current_user(), None);
    }

    #[tokio::test]
    async fn logout_and_deleted_users_clear_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let users = users().await;
        register(&users, "sam").await;

        let session = Session::open(users.clone(), dir.path()).await.unwrap();
        session.login("sam", "secret1").await.unwrap();
        session.logout().await.unwrap();
        assert_eq!(session.restore().await.unwrap(), None);

        session.login("sam", "secret1").await.unwrap();
        users.delete("sam").await.unwrap();
        assert_eq!(session.restore().await.unwrap(), None);
        assert_eq!(session.username(), None);
    }
}
