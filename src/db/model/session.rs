use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::{
    backend::Backend,
    deserialize::{FromSql, FromSqlRow},
    expression::AsExpression,
    pg::Pg,
    prelude::*,
    serialize::ToSql,
    sql_types,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use valuable::Valuable;

use crate::{
    db::{
        error::{self, Error},
        model::{
            self, AsDieselFilter, AsDieselQueryBase, FetchById, default_query_limit,
            donor::DonorReference,
        },
        util::{AsIlike, BoxedDieselExpression, DbEnum, DieselExpressionBuilder},
    },
    schema::{
        collection_session::{
            self, client as client_col, created_at as created_at_col, ended_at as ended_at_col,
            id as session_id_col, session_date as session_date_col, started_at as started_at_col,
        },
        donor_extraction::{
            self, id as extraction_id_col, sequence_number as sequence_number_col,
            session_id as extraction_session_col,
        },
    },
};

#[derive(
    Deserialize,
    Serialize,
    FromSqlRow,
    AsExpression,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Valuable,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[diesel(sql_type = sql_types::Text)]
pub enum SessionPurpose {
    Fresh,
    Vitrified,
    #[default]
    Unknown,
}
impl DbEnum for SessionPurpose {}

impl FromSql<sql_types::Text, Pg> for SessionPurpose {
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> diesel::deserialize::Result<Self> {
        Self::from_sql_inner(bytes)
    }
}

impl ToSql<sql_types::Text, Pg> for SessionPurpose {
    fn to_sql<'b>(
        &'b self,
        out: &mut diesel::serialize::Output<'b, '_, Pg>,
    ) -> diesel::serialize::Result {
        self.to_sql_inner(out)
    }
}

fn is_known_purpose(purpose: &SessionPurpose, _: &()) -> garde::Result {
    if matches!(purpose, SessionPurpose::Unknown) {
        return Err(garde::Error::new("purpose must be fresh or vitrified"));
    }

    Ok(())
}

#[derive(
    Queryable, Selectable, Identifiable, Serialize, Valuable, Debug, Clone, PartialEq,
)]
#[diesel(table_name = collection_session, check_for_backend(Pg))]
pub struct CollectionSessionSummary {
    #[valuable(skip)]
    id: Uuid,
    #[valuable(skip)]
    session_date: NaiveDate,
    technicians: Vec<String>,
    client: String,
    site: Option<String>,
    lot: Option<String>,
    medium: Option<String>,
    recipients: Option<String>,
    purpose: SessionPurpose,
    #[valuable(skip)]
    started_at: Option<NaiveTime>,
    #[valuable(skip)]
    ended_at: Option<NaiveTime>,
    notes: Option<String>,
    #[valuable(skip)]
    created_at: NaiveDateTime,
}

impl CollectionSessionSummary {
    #[must_use]
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    #[must_use]
    pub fn session_date(&self) -> NaiveDate {
        self.session_date
    }

    #[must_use]
    pub fn technicians(&self) -> &[String] {
        &self.technicians
    }

    #[must_use]
    pub fn client(&self) -> &str {
        &self.client
    }

    #[must_use]
    pub fn recipients(&self) -> Option<&str> {
        self.recipients.as_deref()
    }

    #[must_use]
    pub fn purpose(&self) -> SessionPurpose {
        self.purpose
    }

    #[must_use]
    pub fn started_at(&self) -> Option<NaiveTime> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<NaiveTime> {
        self.ended_at
    }

    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

#[derive(
    Queryable,
    Selectable,
    Identifiable,
    Associations,
    Serialize,
    Valuable,
    Debug,
    Clone,
    PartialEq,
)]
#[diesel(
    table_name = donor_extraction,
    belongs_to(CollectionSessionSummary, foreign_key = session_id),
    check_for_backend(Pg)
)]
pub struct DonorExtraction {
    #[valuable(skip)]
    id: Uuid,
    #[valuable(skip)]
    session_id: Uuid,
    #[valuable(skip)]
    donor_id: Uuid,
    sequence_number: i32,
    #[valuable(skip)]
    started_at: Option<NaiveTime>,
    #[valuable(skip)]
    ended_at: Option<NaiveTime>,
    bull_a: Option<String>,
    bull_b: Option<String>,
    bull_breed: Option<String>,
    corpus_luteum: Option<String>,
    body_condition: Option<String>,
    ovarian_status: Option<String>,
    field_estimate: Option<i32>,
    grade_1: i32,
    grade_2: i32,
    grade_3: i32,
    denuded: i32,
    irregular: i32,
    notes: Option<String>,
}

impl DonorExtraction {
    #[must_use]
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    #[must_use]
    pub fn donor_id(&self) -> &Uuid {
        &self.donor_id
    }

    #[must_use]
    pub fn sequence_number(&self) -> i32 {
        self.sequence_number
    }

    /// Every oocyte counted at the microscope, regardless of grade.
    #[must_use]
    pub fn total_oocytes(&self) -> i32 {
        self.grade_1 + self.grade_2 + self.grade_3 + self.denuded + self.irregular
    }
}

/// A collection session with its per-donor extraction records, ordered by
/// chute sequence.
#[derive(Serialize, Valuable, Debug, Clone, PartialEq)]
pub struct CollectionSession {
    #[serde(flatten)]
    summary: CollectionSessionSummary,
    extractions: Vec<DonorExtraction>,
}

impl CollectionSession {
    #[must_use]
    pub fn summary(&self) -> &CollectionSessionSummary {
        &self.summary
    }

    #[must_use]
    pub fn extractions(&self) -> &[DonorExtraction] {
        &self.extractions
    }
}

impl AsDieselQueryBase for CollectionSessionSummary {
    type QueryBase = collection_session::table;

    fn as_diesel_query_base() -> Self::QueryBase {
        collection_session::table
    }
}

impl model::FetchById for CollectionSession {
    type Id = Uuid;

    async fn fetch_by_id(id: &Self::Id, db_conn: &mut AsyncPgConnection) -> error::Result<Self> {
        let summary = CollectionSessionSummary::as_diesel_query_base()
            .find(id)
            .select(CollectionSessionSummary::as_select())
            .first(db_conn)
            .await?;

        let extractions = DonorExtraction::belonging_to(&summary)
            .select(DonorExtraction::as_select())
            .order_by((sequence_number_col.asc(), extraction_id_col.asc()))
            .load(db_conn)
            .await?;

        Ok(Self {
            summary,
            extractions,
        })
    }
}

#[derive(Deserialize, Valuable, Debug, Clone)]
pub struct CollectionSessionQuery {
    pub client: Option<String>,
    #[valuable(skip)]
    pub date_from: Option<NaiveDate>,
    #[valuable(skip)]
    pub date_to: Option<NaiveDate>,
    #[serde(default = "default_query_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for CollectionSessionQuery {
    fn default() -> Self {
        Self {
            client: None,
            date_from: None,
            date_to: None,
            limit: default_query_limit(),
            offset: 0,
        }
    }
}

impl<QuerySource> AsDieselFilter<QuerySource> for CollectionSessionQuery
where
    client_col: SelectableExpression<QuerySource>,
    session_date_col: SelectableExpression<QuerySource>,
{
    fn as_diesel_filter<'a>(&'a self) -> Option<BoxedDieselExpression<'a, QuerySource>>
    where
        QuerySource: 'a,
    {
        let Self {
            client,
            date_from,
            date_to,
            ..
        } = self;

        let mut query = DieselExpressionBuilder::default();

        if let Some(client) = client {
            query = query.and(client_col.ilike(client.as_ilike()));
        }

        if let Some(date_from) = date_from {
            query = query.and(session_date_col.ge(*date_from));
        }

        if let Some(date_to) = date_to {
            query = query.and(session_date_col.le(*date_to));
        }

        query.build()
    }
}

impl model::FetchByQuery for CollectionSession {
    type QueryParams = CollectionSessionQuery;

    async fn fetch_by_query(
        query: &Self::QueryParams,
        db_conn: &mut AsyncPgConnection,
    ) -> error::Result<Vec<Self>> {
        let CollectionSessionQuery { limit, offset, .. } = query;

        let mut statement = CollectionSessionSummary::as_diesel_query_base()
            .select(CollectionSessionSummary::as_select())
            .order_by((session_date_col.desc(), created_at_col.desc()))
            .limit(*limit)
            .offset(*offset)
            .into_boxed();

        if let Some(filter) = query.as_diesel_filter() {
            statement = statement.filter(filter);
        }

        let summaries: Vec<CollectionSessionSummary> = statement.load(db_conn).await?;

        let extractions = DonorExtraction::belonging_to(&summaries)
            .select(DonorExtraction::as_select())
            .order_by((sequence_number_col.asc(), extraction_id_col.asc()))
            .load(db_conn)
            .await?
            .grouped_by(&summaries);

        Ok(summaries
            .into_iter()
            .zip(extractions)
            .map(|(summary, extractions)| Self {
                summary,
                extractions,
            })
            .collect())
    }
}

/// One extraction record as submitted by a client. The donor is given either
/// by id or as an inline registration, and `id` is the client's claim that
/// this entry corresponds to an already-persisted row of the same session.
#[derive(Deserialize, Validate, Valuable, Debug, Clone, Default)]
#[garde(allow_unvalidated)]
pub struct DonorExtractionEntry {
    #[valuable(skip)]
    pub id: Option<Uuid>,
    #[serde(flatten)]
    #[garde(dive)]
    pub donor: DonorReference,
    #[garde(range(min = 0))]
    pub sequence_number: i32,
    #[valuable(skip)]
    pub started_at: Option<NaiveTime>,
    #[valuable(skip)]
    pub ended_at: Option<NaiveTime>,
    pub bull_a: Option<String>,
    pub bull_b: Option<String>,
    pub bull_breed: Option<String>,
    pub corpus_luteum: Option<String>,
    pub body_condition: Option<String>,
    pub ovarian_status: Option<String>,
    #[garde(range(min = 0))]
    pub field_estimate: Option<i32>,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub grade_1: i32,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub grade_2: i32,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub grade_3: i32,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub denuded: i32,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub irregular: i32,
    pub notes: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = donor_extraction, check_for_backend(Pg))]
struct NewDonorExtraction {
    session_id: Uuid,
    donor_id: Uuid,
    sequence_number: i32,
    started_at: Option<NaiveTime>,
    ended_at: Option<NaiveTime>,
    bull_a: Option<String>,
    bull_b: Option<String>,
    bull_breed: Option<String>,
    corpus_luteum: Option<String>,
    body_condition: Option<String>,
    ovarian_status: Option<String>,
    field_estimate: Option<i32>,
    grade_1: i32,
    grade_2: i32,
    grade_3: i32,
    denuded: i32,
    irregular: i32,
    notes: Option<String>,
}

impl NewDonorExtraction {
    fn from_entry(session_id: Uuid, donor_id: Uuid, entry: DonorExtractionEntry) -> Self {
        let DonorExtractionEntry {
            sequence_number,
            started_at,
            ended_at,
            bull_a,
            bull_b,
            bull_breed,
            corpus_luteum,
            body_condition,
            ovarian_status,
            field_estimate,
            grade_1,
            grade_2,
            grade_3,
            denuded,
            irregular,
            notes,
            ..
        } = entry;

        Self {
            session_id,
            donor_id,
            sequence_number,
            started_at,
            ended_at,
            bull_a,
            bull_b,
            bull_breed,
            corpus_luteum,
            body_condition,
            ovarian_status,
            field_estimate,
            grade_1,
            grade_2,
            grade_3,
            denuded,
            irregular,
            notes,
        }
    }
}

// The submitted entry is authoritative for every column, so `None` here means
// "set to null", not "leave alone". `session_id` is absent on purpose: a
// reconciled row can never move to another session.
#[derive(Identifiable, AsChangeset)]
#[diesel(table_name = donor_extraction, treat_none_as_null = true)]
struct DonorExtractionChangeset {
    id: Uuid,
    donor_id: Uuid,
    sequence_number: i32,
    started_at: Option<NaiveTime>,
    ended_at: Option<NaiveTime>,
    bull_a: Option<String>,
    bull_b: Option<String>,
    bull_breed: Option<String>,
    corpus_luteum: Option<String>,
    body_condition: Option<String>,
    ovarian_status: Option<String>,
    field_estimate: Option<i32>,
    grade_1: i32,
    grade_2: i32,
    grade_3: i32,
    denuded: i32,
    irregular: i32,
    notes: Option<String>,
}

impl DonorExtractionChangeset {
    fn from_entry(id: Uuid, donor_id: Uuid, entry: DonorExtractionEntry) -> Self {
        let DonorExtractionEntry {
            sequence_number,
            started_at,
            ended_at,
            bull_a,
            bull_b,
            bull_breed,
            corpus_luteum,
            body_condition,
            ovarian_status,
            field_estimate,
            grade_1,
            grade_2,
            grade_3,
            denuded,
            irregular,
            notes,
            ..
        } = entry;

        Self {
            id,
            donor_id,
            sequence_number,
            started_at,
            ended_at,
            bull_a,
            bull_b,
            bull_breed,
            corpus_luteum,
            body_condition,
            ovarian_status,
            field_estimate,
            grade_1,
            grade_2,
            grade_3,
            denuded,
            irregular,
            notes,
        }
    }
}

/// Reconciles a session's persisted extraction rows against the submitted
/// set, which is authoritative. Rows whose ids are echoed back are updated in
/// place, rows left out are deleted, and everything else is inserted fresh.
/// An entry carrying an id that doesn't belong to this session is treated as
/// brand-new and its submitted id is discarded.
async fn sync_extractions(
    session_id: Uuid,
    entries: Vec<DonorExtractionEntry>,
    db_conn: &mut AsyncPgConnection,
) -> error::Result<()> {
    let mut seen = HashSet::new();
    for id in entries.iter().filter_map(|entry| entry.id) {
        if !seen.insert(id) {
            return Err(Error::invalid_entry(format!(
                "extraction id {id} appears more than once"
            )));
        }
    }

    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let donor_id = entry.donor.resolve_or_create(db_conn).await?;
        resolved.push((entry, donor_id));
    }

    let persisted: HashSet<Uuid> = donor_extraction::table
        .filter(extraction_session_col.eq(session_id))
        .select(extraction_id_col)
        .load(db_conn)
        .await?
        .into_iter()
        .collect();

    let (updates, inserts): (Vec<_>, Vec<_>) = resolved
        .into_iter()
        .partition(|(entry, _)| entry.id.is_some_and(|id| persisted.contains(&id)));

    let kept_ids: Vec<Uuid> = updates.iter().filter_map(|(entry, _)| entry.id).collect();

    // Deletions go first so a freed-up sequence number can be reused within
    // the same submission.
    diesel::delete(donor_extraction::table)
        .filter(extraction_session_col.eq(session_id))
        .filter(extraction_id_col.ne_all(kept_ids))
        .execute(db_conn)
        .await?;

    for (entry, donor_id) in updates {
        let Some(id) = entry.id else {
            continue;
        };

        let changeset = DonorExtractionChangeset::from_entry(id, donor_id, entry);
        diesel::update(&changeset)
            .set(&changeset)
            .execute(db_conn)
            .await?;
    }

    let new_rows: Vec<_> = inserts
        .into_iter()
        .map(|(entry, donor_id)| NewDonorExtraction::from_entry(session_id, donor_id, entry))
        .collect();

    if !new_rows.is_empty() {
        diesel::insert_into(donor_extraction::table)
            .values(new_rows)
            .execute(db_conn)
            .await?;
    }

    Ok(())
}

#[derive(Insertable, Deserialize, Validate, Valuable, Debug, Clone)]
#[diesel(table_name = collection_session, check_for_backend(Pg))]
#[garde(allow_unvalidated)]
pub struct NewCollectionSession {
    #[valuable(skip)]
    pub session_date: NaiveDate,
    #[garde(length(min = 1), inner(length(min = 1)))]
    pub technicians: Vec<String>,
    #[garde(length(min = 1))]
    pub client: String,
    pub site: Option<String>,
    pub lot: Option<String>,
    pub medium: Option<String>,
    pub recipients: Option<String>,
    #[garde(custom(is_known_purpose))]
    pub purpose: SessionPurpose,
    #[valuable(skip)]
    pub started_at: Option<NaiveTime>,
    #[valuable(skip)]
    pub ended_at: Option<NaiveTime>,
    pub notes: Option<String>,
    #[diesel(skip_insertion)]
    #[serde(default)]
    #[garde(dive)]
    pub extractions: Vec<DonorExtractionEntry>,
}

impl model::Write for NewCollectionSession {
    type Returns = CollectionSession;

    async fn write(mut self, db_conn: &mut AsyncPgConnection) -> error::Result<Self::Returns> {
        let extractions = std::mem::take(&mut self.extractions);

        let id = diesel::insert_into(collection_session::table)
            .values(&self)
            .returning(session_id_col)
            .get_result(db_conn)
            .await?;

        sync_extractions(id, extractions, db_conn).await?;

        CollectionSession::fetch_by_id(&id, db_conn).await
    }
}

#[derive(Identifiable, AsChangeset)]
#[diesel(table_name = collection_session)]
struct CollectionSessionChangeset {
    id: Uuid,
    session_date: Option<NaiveDate>,
    technicians: Option<Vec<String>>,
    client: Option<String>,
    site: Option<String>,
    lot: Option<String>,
    medium: Option<String>,
    recipients: Option<String>,
    purpose: Option<SessionPurpose>,
    started_at: Option<NaiveTime>,
    ended_at: Option<NaiveTime>,
    notes: Option<String>,
}

impl CollectionSessionChangeset {
    fn is_empty(&self) -> bool {
        matches!(
            self,
            Self {
                session_date: None,
                technicians: None,
                client: None,
                site: None,
                lot: None,
                medium: None,
                recipients: None,
                purpose: None,
                started_at: None,
                ended_at: None,
                notes: None,
                ..
            }
        )
    }
}

/// A patch for a session's own attributes, plus (optionally) the full
/// replacement set of its extraction records. Attribute fields left out of
/// the request keep their current values; an omitted `extractions` leaves the
/// records untouched, while a present one is reconciled wholesale.
#[derive(Deserialize, Validate, Valuable, Debug, Clone, Default)]
#[garde(allow_unvalidated)]
#[serde(deny_unknown_fields)]
pub struct CollectionSessionUpdate {
    #[serde(skip)]
    #[valuable(skip)]
    pub id: Uuid,
    #[valuable(skip)]
    pub session_date: Option<NaiveDate>,
    #[garde(length(min = 1), inner(length(min = 1)))]
    pub technicians: Option<Vec<String>>,
    #[garde(length(min = 1))]
    pub client: Option<String>,
    pub site: Option<String>,
    pub lot: Option<String>,
    pub medium: Option<String>,
    pub recipients: Option<String>,
    #[garde(inner(custom(is_known_purpose)))]
    pub purpose: Option<SessionPurpose>,
    #[valuable(skip)]
    pub started_at: Option<NaiveTime>,
    #[valuable(skip)]
    pub ended_at: Option<NaiveTime>,
    pub notes: Option<String>,
    #[garde(dive)]
    pub extractions: Option<Vec<DonorExtractionEntry>>,
}

impl model::Write for CollectionSessionUpdate {
    type Returns = CollectionSession;

    async fn write(self, db_conn: &mut AsyncPgConnection) -> error::Result<Self::Returns> {
        let Self {
            id,
            session_date,
            technicians,
            client,
            site,
            lot,
            medium,
            recipients,
            purpose,
            started_at,
            ended_at,
            notes,
            extractions,
        } = self;

        collection_session::table
            .find(id)
            .select(session_id_col)
            .first::<Uuid>(db_conn)
            .await?;

        let changeset = CollectionSessionChangeset {
            id,
            session_date,
            technicians,
            client,
            site,
            lot,
            medium,
            recipients,
            purpose,
            started_at,
            ended_at,
            notes,
        };

        if !changeset.is_empty() {
            diesel::update(&changeset)
                .set(&changeset)
                .execute(db_conn)
                .await?;
        }

        if let Some(entries) = extractions {
            sync_extractions(id, entries, db_conn).await?;
        }

        CollectionSession::fetch_by_id(&id, db_conn).await
    }
}

#[derive(Deserialize, Valuable, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeMarker {
    Start,
    End,
}

/// Stamps a session's start or end time with whatever the client sends,
/// overwriting any previous value.
#[derive(Deserialize, Validate, Valuable, Debug, Clone)]
#[garde(allow_unvalidated)]
#[serde(deny_unknown_fields)]
pub struct SessionTimeMarker {
    #[serde(skip)]
    #[valuable(skip)]
    pub id: Uuid,
    pub marker: TimeMarker,
    #[valuable(skip)]
    pub time: NaiveTime,
}

impl model::Write for SessionTimeMarker {
    type Returns = CollectionSession;

    async fn write(self, db_conn: &mut AsyncPgConnection) -> error::Result<Self::Returns> {
        let Self { id, marker, time } = self;

        let target = collection_session::table.find(id);
        let n_updated = match marker {
            TimeMarker::Start => {
                diesel::update(target)
                    .set(started_at_col.eq(time))
                    .execute(db_conn)
                    .await?
            }
            TimeMarker::End => {
                diesel::update(target)
                    .set(ended_at_col.eq(time))
                    .execute(db_conn)
                    .await?
            }
        };

        if n_updated == 0 {
            return Err(Error::RecordNotFound);
        }

        CollectionSession::fetch_by_id(&id, db_conn).await
    }
}

impl model::Delete for CollectionSession {
    type Id = Uuid;

    async fn delete(id: &Self::Id, db_conn: &mut AsyncPgConnection) -> error::Result<()> {
        let n_deleted = diesel::delete(collection_session::table.find(id))
            .execute(db_conn)
            .await?;

        if n_deleted == 0 {
            return Err(Error::RecordNotFound);
        }

        Ok(())
    }
}
