use std::fmt;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use jiff::civil::Date;
use rand_core::OsRng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set, SqlErr,
};
use tracing::{debug, info};

use crate::{
    cache::now_sec,
    entities::user,
    error::{AppError, AppResult},
    models::User,
};

pub const MIN_LOGIN_ID_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Per-field validation messages, `None` where the field is fine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub login_id: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub preferred_name: Option<String>,
    pub birth_date: Option<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.messages().next().is_none()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        [
            &self.login_id,
            &self.password,
            &self.confirm_password,
            &self.preferred_name,
            &self.birth_date,
        ]
        .into_iter()
        .filter_map(|m| m.as_deref())
    }

    fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().collect::<Vec<_>>().join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("User ID already exists")]
    UserIdTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User not found")]
    NotFound,
    #[error("{0}")]
    Validation(FieldErrors),
    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<DbErr> for UserError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => UserError::UserIdTaken,
            _ => UserError::Storage(err.into()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub login_id: String,
    pub password: String,
    pub confirm_password: String,
    pub preferred_name: String,
    pub birth_date: Option<Date>,
    pub profile_picture_path: Option<String>,
}

impl Registration {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();

        let login_id = self.login_id.trim();
        if login_id.is_empty() {
            errors.login_id = Some("User ID is required".to_string());
        } else if login_id.chars().count() < MIN_LOGIN_ID_LEN {
            errors.login_id =
                Some(format!("User ID must be at least {MIN_LOGIN_ID_LEN} characters"));
        }

        if self.password.trim().is_empty() {
            errors.password = Some("Password is required".to_string());
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.password =
                Some(format!("Password must be at least {MIN_PASSWORD_LEN} characters"));
        }

        if self.confirm_password != self.password {
            errors.confirm_password = Some("Passwords do not match".to_string());
        }

        if self.preferred_name.trim().is_empty() {
            errors.preferred_name = Some("Preferred name is required".to_string());
        }

        if self.birth_date.is_none() {
            errors.birth_date = Some("Date of birth is required".to_string());
        }

        errors.into_result()
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoginForm {
    pub login_id: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if self.login_id.trim().is_empty() {
            errors.login_id = Some("Username is required".to_string());
        }
        if self.password.trim().is_empty() {
            errors.password = Some("Password is required".to_string());
        }
        errors.into_result()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub preferred_name: String,
    pub birth_date: Option<Date>,
    pub profile_picture_path: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if self.preferred_name.trim().is_empty() {
            errors.preferred_name = Some("Preferred name is required".to_string());
        }
        if self.birth_date.is_none() {
            errors.birth_date = Some("Date of birth is required".to_string());
        }
        errors.into_result()
    }
}

/// Registered accounts, stored in the `users` table of the cache database.
#[derive(Clone)]
pub struct UserStore {
    db: DatabaseConnection,
}

impl UserStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn register(&self, form: &Registration) -> Result<User, UserError> {
        form.validate().map_err(UserError::Validation)?;
        let login_id = form.login_id.trim().to_string();

        if self.exists(&login_id).await? {
            return Err(UserError::UserIdTaken);
        }

        let password_hash = hash_password(form.password.clone()).await?;
        let model = user::ActiveModel {
            id: Default::default(),
            login_id: Set(login_id.clone()),
            password_hash: Set(password_hash),
            preferred_name: Set(form.preferred_name.trim().to_string()),
            birth_date: Set(form.birth_date.map(|d| d.to_string()).unwrap_or_default()),
            profile_picture_path: Set(form.profile_picture_path.clone()),
            created_at: Set(now_sec()),
        };

        let row = model.insert(&self.db).await?;
        info!(login_id = %login_id, "registered user");
        Ok(to_user(row)?)
    }

    pub async fn login(&self, login_id: &str, password: &str) -> Result<User, UserError> {
        LoginForm { login_id: login_id.to_string(), password: password.to_string() }
            .validate()
            .map_err(UserError::Validation)?;

        let Some(row) = self.find(login_id.trim()).await? else {
            debug!(login_id, "login for unknown user");
            return Err(UserError::InvalidCredentials);
        };

        if !verify_password(password.to_string(), row.password_hash.clone()).await? {
            debug!(login_id, "login with wrong password");
            return Err(UserError::InvalidCredentials);
        }

        Ok(to_user(row)?)
    }

    pub async fn get(&self, login_id: &str) -> Result<Option<User>, UserError> {
        match self.find(login_id).await? {
            Some(row) => Ok(Some(to_user(row)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, login_id: &str) -> Result<bool, UserError> {
        Ok(self.find(login_id).await?.is_some())
    }

    pub async fn update_profile(
        &self,
        login_id: &str,
        update: &ProfileUpdate,
    ) -> Result<User, UserError> {
        update.validate().map_err(UserError::Validation)?;

        let row = self.find(login_id).await?.ok_or(UserError::NotFound)?;
        let mut active = row.into_active_model();
        active.preferred_name = Set(update.preferred_name.trim().to_string());
        active.birth_date = Set(update.birth_date.map(|d| d.to_string()).unwrap_or_default());
        active.profile_picture_path = Set(update.profile_picture_path.clone());

        let row = active.update(&self.db).await?;
        Ok(to_user(row)?)
    }

    pub async fn delete(&self, login_id: &str) -> Result<(), UserError> {
        user::Entity::delete_many()
            .filter(user::Column::LoginId.eq(login_id.trim()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn find(&self, login_id: &str) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find()
            .filter(user::Column::LoginId.eq(login_id.trim()))
            .one(&self.db)
            .await
    }
}

fn to_user(row: user::Model) -> AppResult<User> {
    Ok(User {
        id: row.id,
        birth_date: row.birth_date.parse()?,
        login_id: row.login_id,
        preferred_name: row.preferred_name,
        profile_picture_path: row.profile_picture_path,
    })
}

async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AppError::msg(format!("argon2 hash failed: {err}")))
    })
    .await
    .map_err(|err| AppError::from(anyhow::Error::new(err)))?
}

async fn verify_password(password: String, stored: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored)
            .map_err(|err| AppError::msg(format!("stored password hash unreadable: {err}")))?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    })
    .await
    .map_err(|err| AppError::from(anyhow::Error::new(err)))?
}
