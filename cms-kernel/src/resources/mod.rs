//! Resource services
//!
//! Each resource is an [`Entity`](crate::crud::Entity) plus the queries
//! specific to it. Storage, soft deletion, auditing and transaction routing
//! all come from [`CrudService`](crate::crud::CrudService).

mod article;
mod category;
mod profile;
mod status;
mod user;

pub use article::{
    slugify, Article, ArticleChanges, ArticleDetails, ArticleService, Author, NewArticle,
    USER_ARTICLES,
};
pub use category::{Category, CategoryChanges, CategoryService, NewCategory};
pub use profile::{NewProfile, Profile, ProfileService};
pub use status::{NewStatus, Status, StatusService};
pub use user::{NewUser, User, UserService, UserWithProfile};
