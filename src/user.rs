//! Accounts.
use crate::error::{MarketError, Result};
use crate::ledger::Balance;
use crate::types::{Role, TimeStamp, UserId};
use crate::validation;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    #[n(0)]
    pub email_notifications: bool,
    #[n(1)]
    pub push_notifications: bool,
    #[n(2)]
    pub show_email: bool,
    #[n(3)]
    pub show_location: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            email_notifications: true,
            push_notifications: true,
            show_email: false,
            show_location: true,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: UserId,
    #[n(1)]
    pub username: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub first_name: String,
    #[n(4)]
    pub last_name: String,
    #[n(5)]
    pub avatar: Option<String>,
    #[n(6)]
    pub bio: Option<String>,
    #[n(7)]
    pub location: Option<String>,
    #[n(8)]
    pub balance: Balance,
    #[n(9)]
    pub role: Role,
    #[n(10)]
    pub is_verified: bool,
    #[n(11)]
    pub is_active: bool,
    #[n(12)]
    pub preferences: Preferences,
    #[n(13)]
    pub created_at: TimeStamp<Utc>,
    #[n(14)]
    pub last_login: TimeStamp<Utc>,
}

/// What other users get to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicProfile {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub points: u64,
    pub role: Role,
    pub created_at: TimeStamp<Utc>,
}

// registration form, checked by validate_and_finalise
#[derive(Debug, Default, Clone)]
pub struct Registration {
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    role: Option<Role>,
}

impl Registration {
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            username: username.to_owned(),
            email: email.to_owned(),
            ..Default::default()
        }
    }
    pub fn set_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = first_name.to_owned();
        self.last_name = last_name.to_owned();
        self
    }
    pub fn set_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn validate_and_finalise(self, id: UserId, starting_points: u64) -> Result<User> {
        let now = TimeStamp::new();
        Ok(User {
            id,
            username: validation::username(&self.username)?,
            email: validation::email(&self.email)?,
            first_name: validation::person_name("firstName", "First name", &self.first_name)?,
            last_name: validation::person_name("lastName", "Last name", &self.last_name)?,
            avatar: None,
            bio: None,
            location: None,
            balance: Balance::new(starting_points),
            role: self.role.unwrap_or(Role::User),
            is_verified: false,
            is_active: true,
            preferences: Preferences::default(),
            created_at: now.clone(),
            last_login: now,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub avatar: Option<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn points(&self) -> u64 {
        self.balance.available()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            avatar: self.avatar.clone(),
            bio: self.bio.clone(),
            location: self.location.clone(),
            points: self.points(),
            role: self.role,
            created_at: self.created_at.clone(),
        }
    }

    pub fn matches_search(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        [&self.username, &self.first_name, &self.last_name]
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
    }

    pub fn apply_update(&mut self, update: ProfileUpdate) -> Result<()> {
        if let Some(first) = update.first_name {
            self.first_name = validation::person_name("firstName", "First name", &first)?;
        }
        if let Some(last) = update.last_name {
            self.last_name = validation::person_name("lastName", "Last name", &last)?;
        }
        if let Some(bio) = update.bio {
            self.bio = validation::optional_text("bio", "Bio", Some(&bio), 500)?;
        }
        if let Some(location) = update.location {
            self.location = validation::optional_text("location", "Location", Some(&location), 100)?;
        }
        if let Some(avatar) = update.avatar {
            self.avatar = validation::optional_text("avatar", "Avatar", Some(&avatar), 500)?;
        }
        Ok(())
    }

    /// Rejects deactivated accounts the way the authentication layer would.
    pub fn ensure_active(&self) -> Result<()> {
        if !self.is_active {
            return Err(MarketError::Unauthenticated("Account is deactivated".into()));
        }
        Ok(())
    }

    pub fn ensure_admin(&self) -> Result<()> {
        if !self.is_admin() {
            return Err(MarketError::forbidden("Admin access required"));
        }
        Ok(())
    }
}
