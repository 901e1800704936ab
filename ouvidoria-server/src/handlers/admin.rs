//! Administrative handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::{ManifestationListItem, Page};
use crate::error::ApiError;
use crate::handlers::AppState;

/// Query parameters for listing manifestations
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListManifestationsQuery {
    /// Page number (1-indexed)
    #[param(default = 1, minimum = 1)]
    pub page: Option<i64>,

    /// Items per page (max 100)
    #[param(default = 20, minimum = 1, maximum = 100)]
    pub per_page: Option<i64>,
}

/// Paginated listing response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ManifestationListResponse {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub items: Vec<ManifestationListItem>,
}

/// List all manifestations
///
/// Newest first, drafts included. Out-of-range paging values are clamped and
/// the clamped values are echoed back.
#[utoipa::path(
    get,
    path = "/v1/admin/manifestations",
    tag = "Admin",
    params(ListManifestationsQuery),
    responses(
        (status = 200, description = "Page of manifestations", body = ManifestationListResponse)
    )
)]
pub async fn list_manifestations_handler(
    State(state): State<AppState>,
    Query(query): Query<ListManifestationsQuery>,
) -> Result<Json<ManifestationListResponse>, ApiError> {
    let page = state
        .service
        .list(Page::new(query.page, query.per_page))
        .await?;

    Ok(Json(ManifestationListResponse {
        total: page.total,
        page: page.page.page,
        per_page: page.page.per_page,
        items: page.items,
    }))
}
