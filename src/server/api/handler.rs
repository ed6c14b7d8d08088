use std::fmt::Display;

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use diesel_async::{AsyncConnection, scoped_futures::ScopedFutureExt};
use garde::Validate;
use uuid::Uuid;
use valuable::Valuable;

use super::error::{Error, Result};
use crate::{
    db::model::{
        Delete, FetchById, FetchByQuery, Write,
        donor::{Donor, DonorUpdate},
        session::{CollectionSession, CollectionSessionUpdate, SessionTimeMarker},
    },
    server::AppState,
};

/// A JSON body that has passed its garde rules.
pub(super) struct ValidJson<T>(T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Validate,
    <T as Validate>::Context: std::default::Default,
{
    type Rejection = Error;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let axum::Json(data) = axum::Json::<T>::from_request(req, state).await?;
        data.validate()?;

        Ok(Self(data))
    }
}

/// Query-string parameters, rejected with the same error envelope as
/// everything else.
pub(super) struct ValidQuery<T>(T);

impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let axum_extra::extract::Query(query) =
            axum_extra::extract::Query::<T>::from_request_parts(parts, state).await?;

        Ok(Self(query))
    }
}

pub(super) async fn write<Data>(
    State(app_state): State<AppState>,
    ValidJson(data): ValidJson<Data>,
) -> Result<Json<Data::Returns>>
where
    Data: Write + Send + Valuable,
    Data::Returns: Send,
{
    tracing::info!(deserialized_data = data.as_value());

    let mut db_conn = app_state.db_conn().await?;

    let item = db_conn
        .transaction(|conn| async move { data.write(conn).await }.scope_boxed())
        .await?;

    Ok(Json(item))
}

pub(super) async fn by_id<Resource>(
    State(app_state): State<AppState>,
    Path(resource_id): Path<Resource::Id>,
) -> Result<Json<Resource>>
where
    Resource: FetchById + Send,
    Resource::Id: Display + Send + Sync,
{
    tracing::info!(deserialized_id = %resource_id);

    let mut db_conn = app_state.db_conn().await?;

    let item = Resource::fetch_by_id(&resource_id, &mut db_conn).await?;

    Ok(Json(item))
}

pub(super) async fn by_query<Resource>(
    State(app_state): State<AppState>,
    ValidQuery(query): ValidQuery<Resource::QueryParams>,
) -> Result<Json<Vec<Resource>>>
where
    Resource: FetchByQuery + Send,
    Resource::QueryParams: Valuable + Send,
{
    tracing::info!(deserialized_query = query.as_value());

    let mut db_conn = app_state.db_conn().await?;

    let items = Resource::fetch_by_query(&query, &mut db_conn).await?;

    Ok(Json(items))
}

pub(super) async fn update_session(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
    ValidJson(mut update): ValidJson<CollectionSessionUpdate>,
) -> Result<Json<CollectionSession>> {
    update.id = session_id;

    tracing::info!(session_id = %session_id, deserialized_update = update.as_value());

    let mut db_conn = app_state.db_conn().await?;

    let session = db_conn
        .transaction(|conn| async move { update.write(conn).await }.scope_boxed())
        .await?;

    Ok(Json(session))
}

pub(super) async fn mark_session_time(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
    ValidJson(mut marker): ValidJson<SessionTimeMarker>,
) -> Result<Json<CollectionSession>> {
    marker.id = session_id;

    tracing::info!(session_id = %session_id, deserialized_marker = marker.as_value());

    let mut db_conn = app_state.db_conn().await?;

    let session = db_conn
        .transaction(|conn| async move { marker.write(conn).await }.scope_boxed())
        .await?;

    Ok(Json(session))
}

pub(super) async fn delete_session(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    tracing::info!(deleted_session_id = %session_id);

    let mut db_conn = app_state.db_conn().await?;

    db_conn
        .transaction(|conn| {
            async move { CollectionSession::delete(&session_id, conn).await }.scope_boxed()
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn update_donor(
    State(app_state): State<AppState>,
    Path(donor_id): Path<Uuid>,
    ValidJson(mut update): ValidJson<DonorUpdate>,
) -> Result<Json<Donor>> {
    update.id = donor_id;

    tracing::info!(donor_id = %donor_id, deserialized_update = update.as_value());

    let mut db_conn = app_state.db_conn().await?;

    let donor = db_conn
        .transaction(|conn| async move { update.write(conn).await }.scope_boxed())
        .await?;

    Ok(Json(donor))
}

/// Donors are never hard-deleted; their records back historical sessions.
pub(super) async fn deactivate_donor(
    State(app_state): State<AppState>,
    Path(donor_id): Path<Uuid>,
) -> Result<Json<Donor>> {
    tracing::info!(deactivated_donor_id = %donor_id);

    let update = DonorUpdate {
        id: donor_id,
        active: Some(false),
        ..Default::default()
    };

    let mut db_conn = app_state.db_conn().await?;

    let donor = db_conn
        .transaction(|conn| async move { update.write(conn).await }.scope_boxed())
        .await?;

    Ok(Json(donor))
}
