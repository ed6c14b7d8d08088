use axum::{
    Router,
    routing::{get, put},
};

use super::AppState;
use crate::{
    db::model::{
        donor::{Donor, NewDonor},
        session::{CollectionSession, NewCollectionSession},
    },
    server::api::handler::{
        by_id, by_query, deactivate_donor, delete_session, mark_session_time, update_donor,
        update_session, write,
    },
};

mod error;
mod handler;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/sessions",
            get(by_query::<CollectionSession>).post(write::<NewCollectionSession>),
        )
        .route(
            "/sessions/{session_id}",
            get(by_id::<CollectionSession>)
                .put(update_session)
                .delete(delete_session),
        )
        .route("/sessions/{session_id}/time-marker", put(mark_session_time))
        .route("/donors", get(by_query::<Donor>).post(write::<NewDonor>))
        .route(
            "/donors/{donor_id}",
            get(by_id::<Donor>).put(update_donor).delete(deactivate_donor),
        )
}
