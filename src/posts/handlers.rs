use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        jwt::AuthUser,
        repo::{Principal, User},
    },
    error::AppError,
    posts::{
        access::can_mutate,
        dto::{
            page_offset, CreatePostRequest, Page, PageQuery, PostItem, UpdatePostRequest,
            PAGE_SIZE,
        },
        repo::Post,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/:id",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/users/:username/posts", get(list_user_posts))
}

#[instrument(skip(state))]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<PostItem>>, AppError> {
    let page = q.page.max(1);
    let rows = Post::list_page(&state.db, PAGE_SIZE, page_offset(page)).await?;
    let total = Post::count_all(&state.db).await?;
    Ok(Json(Page {
        items: rows.into_iter().map(PostItem::from).collect(),
        page,
        per_page: PAGE_SIZE,
        total,
    }))
}

#[instrument(skip(state))]
pub async fn list_user_posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<PostItem>>, AppError> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    let page = q.page.max(1);
    let rows = Post::list_by_owner(&state.db, user.id, PAGE_SIZE, page_offset(page)).await?;
    let total = Post::count_by_owner(&state.db, user.id).await?;
    Ok(Json(Page {
        items: rows.into_iter().map(PostItem::from).collect(),
        page,
        per_page: PAGE_SIZE,
        total,
    }))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Post>, AppError> {
    let post = Post::find_by_id(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("post"))?;
    Ok(Json(post))
}

#[instrument(skip(state, payload))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    let errors = payload.validate();
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    // Owner is always the creating principal, never client-supplied.
    let post = Post::create(&state.db, user_id, &payload.title, &payload.content).await?;
    info!(post_id = %post.id, user_id, "post created");
    Ok((StatusCode::CREATED, Json(post)))
}

#[instrument(skip(state, payload))]
pub async fn update_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<Json<Post>, AppError> {
    let errors = payload.validate();
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let post = Post::find_by_id(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("post"))?;

    let principal = Principal::load(&state.db, user_id).await?;
    if !can_mutate(&post, Some(&principal)) {
        warn!(post_id = %post.id, user_id, owner_id = %post.user_id, "post update refused");
        return Err(AppError::Forbidden);
    }

    let updated = Post::update(&state.db, id, &payload.title, &payload.content).await?;
    info!(post_id = %updated.id, user_id, "post updated");
    Ok(Json(updated))
}

#[instrument(skip(state))]
pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let post = Post::find_by_id(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("post"))?;

    let principal = Principal::load(&state.db, user_id).await?;
    if !can_mutate(&post, Some(&principal)) {
        warn!(post_id = %post.id, user_id, owner_id = %post.user_id, "post delete refused");
        return Err(AppError::Forbidden);
    }

    Post::delete(&state.db, id).await?;
    info!(post_id = %id, user_id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}
