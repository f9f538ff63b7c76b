//! Merge group handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateMergeGroupRequest, MergeGroupResponse, UngroupResponse};
use crate::services::metrics::{record_error, MERGE_GROUPS_TOTAL};
use crate::AppState;

/// Group quotation items of one KOL into a merge group.
pub async fn create_merge_group(
    State(state): State<AppState>,
    Json(payload): Json<CreateMergeGroupRequest>,
) -> Result<(StatusCode, Json<MergeGroupResponse>), AppError> {
    payload.validate()?;

    let (merge_group_id, merge_color) = state
        .db
        .create_merge_group(&payload.quotation_item_ids, &payload.merge_type)
        .await
        .inspect_err(|_| record_error("merge_error"))?;

    MERGE_GROUPS_TOTAL.with_label_values(&["create"]).inc();

    Ok((
        StatusCode::CREATED,
        Json(MergeGroupResponse {
            merge_group_id,
            merge_color,
            member_count: payload.quotation_item_ids.len(),
        }),
    ))
}

/// Dissolve a merge group, clearing mirrored fields on non-leaders.
pub async fn ungroup(
    State(state): State<AppState>,
    Path(merge_group_id): Path<Uuid>,
) -> Result<Json<UngroupResponse>, AppError> {
    let released_count = state
        .db
        .ungroup_payment_requests(merge_group_id)
        .await
        .inspect_err(|_| record_error("merge_error"))?;

    MERGE_GROUPS_TOTAL.with_label_values(&["ungroup"]).inc();

    Ok(Json(UngroupResponse {
        merge_group_id,
        released_count,
    }))
}
