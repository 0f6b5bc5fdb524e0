use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::FieldError;
use crate::posts::repo::PostWithAuthor;

pub const PAGE_SIZE: i64 = 5;

/// 1-based page selector. A page past the end yields an empty page, never
/// an error.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

// Saturating: the page number comes straight off the query string, and
// an absurdly large one must yield an empty page, not a negative OFFSET.
pub fn page_offset(page: i64) -> i64 {
    page.max(1).saturating_sub(1).saturating_mul(PAGE_SIZE)
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct PostItem {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub author_id: i64,
    pub author: String,
}

impl From<PostWithAuthor> for PostItem {
    fn from(p: PostWithAuthor) -> Self {
        Self {
            id: p.id,
            title: p.title,
            content: p.content,
            created_at: p.created_at,
            author_id: p.user_id,
            author: p.username,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
}

impl CreatePostRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        validate_post_fields(&self.title, &self.content)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: String,
    pub content: String,
}

impl UpdatePostRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        validate_post_fields(&self.title, &self.content)
    }
}

fn validate_post_fields(title: &str, content: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push(FieldError::new("title", "required"));
    } else if title.chars().count() > 80 {
        errors.push(FieldError::new("title", "must be at most 80 characters"));
    }
    if content.trim().is_empty() {
        errors.push(FieldError::new("content", "required"));
    }
    errors
}
