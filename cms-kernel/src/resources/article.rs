//! Articles, their slugs and their authors
//!
//! Authors are linked through the `user_articles` pivot. Creating an article
//! and linking its author is one unit of work: it joins the request
//! transaction when there is one and opens its own otherwise.

use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::category::Category;
use super::status::Status;
use super::user::User;
use crate::context;
use crate::crud::{AuditFields, CrudService, Entity, QueryOptions, Relation, CREATED_AT, ID};
use crate::error::{DataError, DataResult};
use crate::ids::new_record_id;
use crate::pagination::{ListQuery, Page, PageParams};
use crate::storage::{
    Filter, FilterCondition, FindQuery, Record, StorageError, StorageOperation,
};

/// Pivot table linking users to the articles they wrote
pub const USER_ARTICLES: &str = "user_articles";

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\p{L}\p{N}]+").expect("slug separator regex is valid")
});

/// Lowercase `title` and join its words with `-`
///
/// ```rust
/// use cms_kernel::resources::slugify;
///
/// assert_eq!(slugify("Hello, World! Rust 2025"), "hello-world-rust-2025");
/// ```
pub fn slugify(title: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// A published or draft article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// `art_…` id
    pub id: String,
    /// Headline
    pub title: String,
    /// Secondary headline
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Body or summary text
    #[serde(default)]
    pub description: Option<String>,
    /// Derived from the title
    pub slug: String,
    /// Free-form keywords, matched by search
    #[serde(default)]
    pub keywords: Option<String>,
    /// `cat_…` id of the category
    pub category_id: String,
    /// `sts_…` id of the publication status, unset for drafts
    #[serde(default)]
    pub status_id: Option<String>,
    /// Audit columns
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for Article {
    const TABLE: &'static str = "articles";
    const ID_PREFIX: &'static str = "art";
    const NAME: &'static str = "article";
    const SEARCHABLE: &'static [&'static str] = &["title", "description", "keywords"];

    fn id(&self) -> &str {
        &self.id
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }
}

impl Article {
    /// The article's [`Category`]
    pub fn category() -> Relation {
        Relation::belongs_to("category", Category::TABLE, "category_id")
    }

    /// The article's [`Status`]
    pub fn status() -> Relation {
        Relation::belongs_to("status", Status::TABLE, "status_id")
    }

    /// Authors through [`USER_ARTICLES`]
    pub fn users() -> Relation {
        Relation::many_to_many("users", User::TABLE, USER_ARTICLES, "article_id", "user_id")
    }

    fn relations() -> Vec<Relation> {
        vec![Self::category(), Self::status(), Self::users()]
    }
}

/// Public fields of an article's author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// `usr_…` id
    pub id: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Contact address
    pub email: String,
    /// Avatar path, if uploaded
    #[serde(default)]
    pub photo_path: Option<String>,
}

/// An article with its category, status and authors attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDetails {
    /// The article row
    #[serde(flatten)]
    pub article: Article,
    /// Category, when it still exists
    #[serde(default)]
    pub category: Option<Category>,
    /// Status, when one is set
    #[serde(default)]
    pub status: Option<Status>,
    /// Linked authors
    #[serde(default)]
    pub users: Vec<Author>,
}

/// Payload for creating an article; the slug is derived from the title
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    /// Headline, also the source of the slug
    pub title: String,
    /// Secondary headline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Body or summary text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form keywords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    /// `cat_…` id of the category
    pub category_id: String,
    /// Initial status, none for a draft
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

impl NewArticle {
    /// Article with a title in a category
    pub fn new(title: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            description: None,
            keywords: None,
            category_id: category_id.into(),
            status_id: None,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the keywords
    #[must_use]
    pub fn with_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = Some(keywords.into());
        self
    }
}

/// Partial update; a new title also renews the slug
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleChanges {
    /// New headline; renews the slug
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New secondary headline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// New body or summary text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New keywords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    /// Move to another category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// New status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

#[derive(Serialize)]
struct Slugged<'a, T: Serialize> {
    #[serde(flatten)]
    fields: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    slug: Option<String>,
}

#[derive(Serialize)]
struct StatusChange<'a> {
    status_id: &'a str,
}

/// Article queries; reads attach category, status and authors
#[derive(Debug, Clone)]
pub struct ArticleService {
    crud: CrudService<Article>,
}

impl ArticleService {
    /// Service over the generic article CRUD
    pub fn new(crud: CrudService<Article>) -> Self {
        Self { crud }
    }

    /// Generic soft delete, restore and hard delete
    pub fn crud(&self) -> &CrudService<Article> {
        &self.crud
    }

    fn details() -> QueryOptions {
        QueryOptions::new().include(Article::relations())
    }

    fn listing(filter: Filter) -> ListQuery {
        ListQuery::new()
            .filter(filter)
            .include(Article::relations())
            .searchable(Article::SEARCHABLE)
    }

    /// Create the article and link `author` to it
    ///
    /// Without an explicit author the authenticated user is linked; with
    /// neither, the article has no author. Both writes commit or neither does.
    pub async fn create(
        &self,
        data: &NewArticle,
        author: Option<&str>,
    ) -> DataResult<ArticleDetails> {
        let author = author.map(str::to_string).or_else(context::actor_id);
        let client = self.crud.client();
        client
            .run_in_transaction(client.defaults(), |_tx| async {
                let row = Slugged {
                    fields: data,
                    slug: Some(slugify(&data.title)),
                };
                let article = self.crud.create(&row, author.as_deref()).await?;
                if let Some(user_id) = author.as_deref() {
                    self.associate_user(&article.id, user_id).await?;
                }
                self.crud
                    .find_one_as::<ArticleDetails>(&article.id, &Self::details())
                    .await?
                    .ok_or_else(|| DataError::FetchFailed {
                        table: Article::TABLE.to_string(),
                        source: StorageError::not_found(
                            StorageOperation::Find,
                            Article::TABLE,
                            &article.id,
                        ),
                    })
            })
            .await
    }

    /// Live article with the given id
    pub async fn find_one(&self, id: &str) -> DataResult<Option<ArticleDetails>> {
        self.crud.find_one_as(id, &Self::details()).await
    }

    /// Live article with the given slug
    pub async fn find_by_slug(&self, slug: &str) -> DataResult<Option<ArticleDetails>> {
        self.crud
            .find_one_by_as(FilterCondition::eq("slug", slug).into(), &Self::details())
            .await
    }

    /// Articles, newest first
    pub async fn find_all(&self, params: &PageParams) -> DataResult<Page<ArticleDetails>> {
        self.crud
            .find_all_as(params, &Self::listing(Filter::All))
            .await
    }

    /// Articles in a category, newest first
    pub async fn find_by_category(
        &self,
        category_id: &str,
        params: &PageParams,
    ) -> DataResult<Page<ArticleDetails>> {
        let filter = FilterCondition::eq("category_id", category_id).into();
        self.crud.find_all_as(params, &Self::listing(filter)).await
    }

    /// Articles `user_id` is an author of, newest first
    pub async fn find_by_user(
        &self,
        user_id: &str,
        params: &PageParams,
    ) -> DataResult<Page<ArticleDetails>> {
        let links = self
            .crud
            .client()
            .find_many(
                USER_ARTICLES,
                &FindQuery::new(FilterCondition::eq("user_id", user_id).into()),
            )
            .await?;
        let article_ids: Vec<String> = links
            .iter()
            .filter_map(|link| link.get("article_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        let filter = FilterCondition::in_strings(ID, article_ids).into();
        self.crud.find_all_as(params, &Self::listing(filter)).await
    }

    /// Articles whose title, description or keywords contain `query`
    pub async fn search(
        &self,
        query: &str,
        params: &PageParams,
    ) -> DataResult<Page<ArticleDetails>> {
        let params = params.clone().with_search(query);
        self.crud
            .find_all_as(&params, &Self::listing(Filter::All))
            .await
    }

    /// Apply `changes`, renewing the slug when the title changes
    pub async fn update(
        &self,
        id: &str,
        changes: &ArticleChanges,
        actor: Option<&str>,
    ) -> DataResult<ArticleDetails> {
        let row = Slugged {
            fields: changes,
            slug: changes.title.as_deref().map(slugify),
        };
        self.crud
            .update_as(id, &row, actor, &Self::details())
            .await
    }

    /// Move the article to `status_id`
    pub async fn publish(
        &self,
        id: &str,
        status_id: &str,
        actor: Option<&str>,
    ) -> DataResult<ArticleDetails> {
        self.crud
            .update_as(id, &StatusChange { status_id }, actor, &Self::details())
            .await
    }

    /// Link `user_id` as an author of `article_id`
    pub async fn associate_user(&self, article_id: &str, user_id: &str) -> DataResult<Record> {
        let mut link = Record::new();
        link.insert(ID.into(), Value::String(new_record_id("uar")));
        link.insert("article_id".into(), Value::String(article_id.to_string()));
        link.insert("user_id".into(), Value::String(user_id.to_string()));
        link.insert(
            CREATED_AT.into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let link = self.crud.client().create(USER_ARTICLES, link).await?;
        tracing::debug!(article_id, user_id, "Author linked");
        Ok(link)
    }

    /// Unlink `user_id` from `article_id`
    pub async fn remove_user(&self, article_id: &str, user_id: &str) -> DataResult<Record> {
        let filter = Filter::from(FilterCondition::eq("article_id", article_id))
            .and(FilterCondition::eq("user_id", user_id).into());
        self.crud
            .client()
            .delete(USER_ARTICLES, &filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DataError::DeleteFailed {
                table: USER_ARTICLES.to_string(),
                source: StorageError::not_found(
                    StorageOperation::Delete,
                    USER_ARTICLES,
                    &format!("{}/{}", article_id, user_id),
                ),
            })
    }
}
