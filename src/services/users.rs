//! Authentication and user management service

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Duration;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{
        PasswordResetToken, RegisterUser, Role, UpdateProfile, User, UserClaims,
        VerificationClaims, EMAIL_VERIFICATION_PURPOSE,
    },
    repository::LibraryStore,
    services::{
        email::{password_reset_message, verification_message, Notifier},
        reviews::ReviewsService,
    },
};

const RESET_TOKEN_LENGTH: usize = 48;

#[derive(Clone)]
pub struct UsersService {
    store: Arc<dyn LibraryStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    frontend_url: String,
}

impl UsersService {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
        frontend_url: String,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
            frontend_url,
        }
    }

    /// Register a new (unverified) account and send the verification link
    ///
    /// The account is kept even if the email cannot be sent.
    pub async fn register(&self, data: RegisterUser) -> AppResult<User> {
        data.validate()?;

        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            name: data.name,
            email: data.email.trim().to_lowercase(),
            password: hash_password(&data.password)?,
            phone: data.phone,
            role: Role::User,
            is_verified: false,
            profile_picture_id: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_user(&user).await?;
        tracing::info!(user_id = %user.id, email = %user.email, "User registered");

        let token = VerificationClaims {
            sub: user.id,
            email: user.email.clone(),
            purpose: EMAIL_VERIFICATION_PURPOSE.to_string(),
            exp: (now + Duration::minutes(self.config.verification_token_minutes)).timestamp(),
            iat: now.timestamp(),
        }
        .create_token(&self.config.jwt_secret)
        .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;

        let (subject, body) = verification_message(&self.frontend_url, &token);
        if let Err(e) = self.notifier.send(&user.email, &subject, &body).await {
            tracing::error!(user_id = %user.id, "Failed to send verification email: {}", e);
        }

        Ok(user)
    }

    /// Mark the account behind a verification token as verified and log it in
    pub async fn verify_email(&self, token: &str) -> AppResult<(String, User)> {
        let claims = VerificationClaims::from_token(token, &self.config.jwt_secret)?;

        let mut user = self
            .store
            .get_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !user.is_verified {
            user.is_verified = true;
            user.updated_at = self.clock.now();
            self.store.update_user(&user).await?;
            tracing::info!(user_id = %user.id, "Email verified");
        }

        let access = self.create_token_for_user(&user)?;
        Ok((access, user))
    }

    /// Authenticate by email and password, returning an access token
    pub async fn login(&self, email: &str, password: &str) -> AppResult<(String, User)> {
        let user = self
            .store
            .get_user_by_email(&email.trim().to_lowercase())
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

        if !verify_password(&user.password, password)? {
            return Err(AppError::Authentication("Invalid email or password".to_string()));
        }

        if !user.is_verified {
            return Err(AppError::Authentication(
                "Please verify your email before logging in".to_string(),
            ));
        }

        let token = self.create_token_for_user(&user)?;
        Ok((token, user))
    }

    /// Store a fresh reset token for the account and email the link
    pub async fn request_password_reset(&self, email: &str) -> AppResult<()> {
        let user = self
            .store
            .get_user_by_email(&email.trim().to_lowercase())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RESET_TOKEN_LENGTH)
            .map(char::from)
            .collect();

        self.store
            .upsert_reset_token(&PasswordResetToken {
                user_id: user.id,
                token: token.clone(),
                expires_at: self.clock.now() + Duration::minutes(self.config.reset_token_minutes),
            })
            .await?;

        let (subject, body) =
            password_reset_message(&self.frontend_url, &token, self.config.reset_token_minutes);
        self.notifier.send(&user.email, &subject, &body).await?;

        tracing::info!(user_id = %user.id, "Password reset requested");
        Ok(())
    }

    /// Set a new password using a reset token; the token is consumed
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        let reset = self
            .store
            .get_reset_token(token)
            .await?
            .filter(|reset| reset.expires_at > self.clock.now())
            .ok_or_else(|| AppError::Validation("Invalid or expired reset token".to_string()))?;

        check_password(new_password)?;

        let mut user = self
            .store
            .get_user(reset.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        user.password = hash_password(new_password)?;
        user.updated_at = self.clock.now();
        self.store.update_user(&user).await?;
        self.store.delete_reset_token(token).await?;

        tracing::info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    /// Update own name, phone or password
    pub async fn update_profile(&self, user_id: Uuid, data: UpdateProfile) -> AppResult<User> {
        data.validate()?;

        let mut user = self.get_user(user_id).await?;

        if let Some(name) = data.name {
            user.name = name;
        }
        if let Some(phone) = data.phone {
            user.phone = phone;
        }
        if let Some(ref password) = data.password {
            user.password = hash_password(password)?;
        }
        user.updated_at = self.clock.now();

        self.store.update_user(&user).await?;
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> AppResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        self.store.list_users().await
    }

    /// Delete an account, refused while it has books on loan
    ///
    /// The user's reviews go with it and the ratings of the books they
    /// covered are recomputed in the same transaction.
    pub async fn delete_user(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        if !tx.lock_user(id).await? {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        let active = tx.count_active_loans(id).await?;
        if active > 0 {
            return Err(AppError::Conflict(format!(
                "User has {} active loan(s) and cannot be deleted",
                active
            )));
        }

        let books = tx.reviewed_books(id).await?;
        for book_id in &books {
            tx.lock_book(*book_id).await?;
        }

        tx.delete_user(id).await?;
        for book_id in &books {
            ReviewsService::refresh_rating(tx.as_mut(), *book_id).await?;
        }
        tx.commit().await?;

        tracing::info!(user_id = %id, reviews = books.len(), "User deleted");
        Ok(())
    }

    /// Change another user's role
    pub async fn update_role(&self, target_id: Uuid, role: &str, actor_id: Uuid) -> AppResult<User> {
        if target_id == actor_id {
            return Err(AppError::Validation("You cannot change your own role".to_string()));
        }

        let role: Role = role.parse().map_err(AppError::Validation)?;

        let mut user = self.get_user(target_id).await?;
        user.role = role;
        user.updated_at = self.clock.now();
        self.store.update_user(&user).await?;

        tracing::info!(user_id = %target_id, %role, by = %actor_id, "Role updated");
        Ok(user)
    }

    /// Create an access token for a user
    fn create_token_for_user(&self, user: &User) -> AppResult<String> {
        let now = self.clock.now();
        let claims = UserClaims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            exp: (now + Duration::minutes(self.config.access_token_minutes)).timestamp(),
            iat: now.timestamp(),
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }
}

fn check_password(password: &str) -> AppResult<()> {
    if password.len() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

/// Hash a password using Argon2
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
