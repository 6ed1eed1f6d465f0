//! Users and their activation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::Profile;
use crate::context::Role;
use crate::crud::{AuditFields, CrudService, Entity, QueryOptions, Relation};
use crate::error::DataResult;
use crate::pagination::{ListQuery, Page, PageParams};
use crate::storage::{Filter, FilterCondition};

/// An account that can sign in and author articles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// `usr_…` id
    pub id: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Unique sign-in address
    pub email: String,
    /// Phone or other contact
    #[serde(default)]
    pub contact: Option<String>,
    /// Avatar path, if uploaded
    #[serde(default)]
    pub photo_path: Option<String>,
    /// Inactive users cannot sign in
    #[serde(default)]
    pub is_active: bool,
    /// Must change the password at next sign-in
    #[serde(default)]
    pub is_first_login: bool,
    /// Set when the address is confirmed by activation
    #[serde(default)]
    pub mail_verified_at: Option<DateTime<Utc>>,
    /// `prf_…` id of the user's profile
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Read from storage, never written out
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
    /// Audit columns
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const ID_PREFIX: &'static str = "usr";
    const NAME: &'static str = "user";
    const SEARCHABLE: &'static [&'static str] = &["first_name", "last_name", "email"];

    fn id(&self) -> &str {
        &self.id
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }
}

impl User {
    /// The user's profile row
    pub fn profile() -> Relation {
        Relation::belongs_to("profile", Profile::TABLE, "profile_id")
    }
}

/// A user with the profile attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithProfile {
    /// The user row
    #[serde(flatten)]
    pub user: User,
    /// Profile, when one is set
    #[serde(default)]
    pub profile: Option<Profile>,
}

/// Payload for creating a user
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Sign-in address, unique across users
    pub email: String,
    /// Phone or other contact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// `prf_…` id of the profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    /// Already hashed; hashing happens in the auth layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Can sign in
    pub is_active: bool,
    /// Must change the password at next sign-in
    pub is_first_login: bool,
}

impl NewUser {
    /// Inactive first-login user
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            contact: None,
            profile_id: None,
            password_hash: None,
            is_active: false,
            is_first_login: true,
        }
    }

    /// Attach a profile
    #[must_use]
    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct Activation {
    is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mail_verified_at: Option<DateTime<Utc>>,
}

/// User queries; reads attach the profile
#[derive(Debug, Clone)]
pub struct UserService {
    crud: CrudService<User>,
    profiles: CrudService<Profile>,
}

impl UserService {
    /// Service over the user CRUD; `profiles` resolves roles to profile ids
    pub fn new(crud: CrudService<User>, profiles: CrudService<Profile>) -> Self {
        Self { crud, profiles }
    }

    /// Generic create, update, delete and restore
    pub fn crud(&self) -> &CrudService<User> {
        &self.crud
    }

    fn with_profile() -> QueryOptions {
        QueryOptions::new().include(vec![User::profile()])
    }

    fn listing(filter: Filter) -> ListQuery {
        ListQuery::new()
            .filter(filter)
            .include(vec![User::profile()])
            .searchable(User::SEARCHABLE)
    }

    /// Live user with the given id
    pub async fn find_one(&self, id: &str) -> DataResult<Option<UserWithProfile>> {
        self.crud.find_one_as(id, &Self::with_profile()).await
    }

    /// Live user with the given email
    pub async fn find_by_email(&self, email: &str) -> DataResult<Option<UserWithProfile>> {
        self.crud
            .find_one_by_as(
                FilterCondition::eq("email", email).into(),
                &Self::with_profile(),
            )
            .await
    }

    /// Active users, newest first
    pub async fn find_active(&self, params: &PageParams) -> DataResult<Page<UserWithProfile>> {
        let query = Self::listing(FilterCondition::eq("is_active", true).into());
        self.crud.find_all_as(params, &query).await
    }

    /// Users holding `role`, newest first
    pub async fn find_by_profile(
        &self,
        role: Role,
        params: &PageParams,
    ) -> DataResult<Page<UserWithProfile>> {
        let profile_ids: Vec<String> = self
            .profiles
            .find_one_by(FilterCondition::eq("label", role.as_str()).into())
            .await?
            .into_iter()
            .map(|profile| profile.id)
            .collect();
        let query = Self::listing(FilterCondition::in_strings("profile_id", profile_ids).into());
        self.crud.find_all_as(params, &query).await
    }

    /// Enable sign-in and mark the email verified
    pub async fn activate(&self, id: &str, actor: Option<&str>) -> DataResult<UserWithProfile> {
        let changes = Activation {
            is_active: true,
            mail_verified_at: Some(Utc::now()),
        };
        self.crud
            .update_as(id, &changes, actor, &Self::with_profile())
            .await
    }

    /// Disable sign-in
    pub async fn deactivate(&self, id: &str, actor: Option<&str>) -> DataResult<UserWithProfile> {
        let changes = Activation {
            is_active: false,
            mail_verified_at: None,
        };
        self.crud
            .update_as(id, &changes, actor, &Self::with_profile())
            .await
    }
}
