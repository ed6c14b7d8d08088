use chrono::{NaiveDate, NaiveDateTime};
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
        model::{self, AsDieselFilter, AsDieselQueryBase, FetchById, default_query_limit},
        util::{AsIlike, BoxedDieselExpression, DbEnum, DieselExpressionBuilder},
    },
    schema::donor::{
        self, active as active_col, breed as breed_col, cattle_type as cattle_type_col,
        id as id_col, name as name_col, registration_number as registration_number_col,
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
pub enum CattleType {
    Beef,
    Dairy,
    #[default]
    Unknown,
}
impl DbEnum for CattleType {}

impl FromSql<sql_types::Text, Pg> for CattleType {
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> diesel::deserialize::Result<Self> {
        Self::from_sql_inner(bytes)
    }
}

impl ToSql<sql_types::Text, Pg> for CattleType {
    fn to_sql<'b>(
        &'b self,
        out: &mut diesel::serialize::Output<'b, '_, Pg>,
    ) -> diesel::serialize::Result {
        self.to_sql_inner(out)
    }
}

fn is_known_cattle_type(cattle_type: &CattleType, _: &()) -> garde::Result {
    if matches!(cattle_type, CattleType::Unknown) {
        return Err(garde::Error::new("cattle_type must be beef or dairy"));
    }

    Ok(())
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Valuable, Debug, Clone, PartialEq)]
#[diesel(table_name = donor, check_for_backend(Pg))]
pub struct Donor {
    #[valuable(skip)]
    id: Uuid,
    name: String,
    registration_number: String,
    breed: String,
    cattle_type: CattleType,
    owner_name: String,
    owner_contact: Option<String>,
    #[valuable(skip)]
    birth_date: Option<NaiveDate>,
    weight_kg: Option<f64>,
    notes: Option<String>,
    active: bool,
    #[valuable(skip)]
    created_at: NaiveDateTime,
}

impl Donor {
    #[must_use]
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn registration_number(&self) -> &str {
        &self.registration_number
    }

    #[must_use]
    pub fn breed(&self) -> &str {
        &self.breed
    }

    #[must_use]
    pub fn cattle_type(&self) -> CattleType {
        self.cattle_type
    }

    #[must_use]
    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    #[must_use]
    pub fn weight_kg(&self) -> Option<f64> {
        self.weight_kg
    }

    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Insertable, Deserialize, Validate, Valuable, Debug, Clone)]
#[diesel(table_name = donor, check_for_backend(Pg))]
#[garde(allow_unvalidated)]
pub struct NewDonor {
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(length(min = 1))]
    pub registration_number: String,
    #[garde(length(min = 1))]
    pub breed: String,
    #[garde(custom(is_known_cattle_type))]
    pub cattle_type: CattleType,
    #[garde(length(min = 1))]
    pub owner_name: String,
    pub owner_contact: Option<String>,
    #[valuable(skip)]
    pub birth_date: Option<NaiveDate>,
    #[garde(range(min = 0.0))]
    pub weight_kg: Option<f64>,
    pub notes: Option<String>,
}

impl model::Write for NewDonor {
    type Returns = Donor;

    async fn write(self, db_conn: &mut AsyncPgConnection) -> error::Result<Self::Returns> {
        Ok(diesel::insert_into(donor::table)
            .values(&self)
            .returning(Donor::as_returning())
            .get_result(db_conn)
            .await?)
    }
}

/// A detail record's pointer at its donor: either the id of a registered
/// donor or an inline payload for one that may not exist yet. Exactly one of
/// the two must be given.
#[derive(Deserialize, Validate, Valuable, Debug, Clone, Default)]
#[garde(allow_unvalidated)]
pub struct DonorReference {
    #[valuable(skip)]
    pub donor_id: Option<Uuid>,
    #[garde(dive)]
    pub new_donor: Option<NewDonor>,
}

impl DonorReference {
    /// Resolves this reference to a donor id, creating the donor only when
    /// no row carries the submitted registration number. Resolution by
    /// registration number is idempotent: re-submitting the same inline
    /// payload returns the existing id untouched.
    pub async fn resolve_or_create(&self, db_conn: &mut AsyncPgConnection) -> error::Result<Uuid> {
        match (self.donor_id, &self.new_donor) {
            (Some(id), None) => {
                donor::table
                    .find(id)
                    .select(id_col)
                    .first::<Uuid>(db_conn)
                    .await?;

                Ok(id)
            }
            (None, Some(new_donor)) => {
                let existing = donor::table
                    .filter(registration_number_col.eq(&new_donor.registration_number))
                    .select(id_col)
                    .first::<Uuid>(db_conn)
                    .await
                    .optional()?;

                if let Some(id) = existing {
                    return Ok(id);
                }

                Ok(diesel::insert_into(donor::table)
                    .values(new_donor)
                    .returning(id_col)
                    .get_result(db_conn)
                    .await?)
            }
            (None, None) => Err(Error::invalid_entry(
                "either donor_id or new_donor must be supplied",
            )),
            (Some(_), Some(_)) => Err(Error::invalid_entry(
                "donor_id and new_donor are mutually exclusive",
            )),
        }
    }
}

#[derive(Identifiable, AsChangeset, Deserialize, Validate, Valuable, Debug, Clone, Default)]
#[diesel(table_name = donor, check_for_backend(Pg))]
#[garde(allow_unvalidated)]
#[serde(deny_unknown_fields)]
pub struct DonorUpdate {
    #[serde(skip)]
    #[valuable(skip)]
    pub id: Uuid,
    #[garde(length(min = 1))]
    pub name: Option<String>,
    #[garde(length(min = 1))]
    pub registration_number: Option<String>,
    #[garde(length(min = 1))]
    pub breed: Option<String>,
    #[garde(inner(custom(is_known_cattle_type)))]
    pub cattle_type: Option<CattleType>,
    #[garde(length(min = 1))]
    pub owner_name: Option<String>,
    pub owner_contact: Option<String>,
    #[valuable(skip)]
    pub birth_date: Option<NaiveDate>,
    #[garde(range(min = 0.0))]
    pub weight_kg: Option<f64>,
    pub notes: Option<String>,
    pub active: Option<bool>,
}

impl model::Write for DonorUpdate {
    type Returns = Donor;

    async fn write(self, db_conn: &mut AsyncPgConnection) -> error::Result<Self::Returns> {
        if let Self {
            name: None,
            registration_number: None,
            breed: None,
            cattle_type: None,
            owner_name: None,
            owner_contact: None,
            birth_date: None,
            weight_kg: None,
            notes: None,
            active: None,
            ..
        } = &self
        {
            return Donor::fetch_by_id(&self.id, db_conn).await;
        }

        Ok(diesel::update(&self)
            .set(&self)
            .returning(Donor::as_returning())
            .get_result(db_conn)
            .await?)
    }
}

impl AsDieselQueryBase for Donor {
    type QueryBase = donor::table;

    fn as_diesel_query_base() -> Self::QueryBase {
        donor::table
    }
}

impl model::FetchById for Donor {
    type Id = Uuid;

    async fn fetch_by_id(id: &Self::Id, db_conn: &mut AsyncPgConnection) -> error::Result<Self> {
        Ok(Self::as_diesel_query_base()
            .find(id)
            .select(Self::as_select())
            .first(db_conn)
            .await?)
    }
}

#[derive(Deserialize, Valuable, Debug, Clone)]
pub struct DonorQuery {
    pub search: Option<String>,
    pub breed: Option<String>,
    pub cattle_type: Option<CattleType>,
    pub active: Option<bool>,
    #[serde(default = "default_query_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for DonorQuery {
    fn default() -> Self {
        Self {
            search: None,
            breed: None,
            cattle_type: None,
            active: None,
            limit: default_query_limit(),
            offset: 0,
        }
    }
}

impl<QuerySource> AsDieselFilter<QuerySource> for DonorQuery
where
    name_col: SelectableExpression<QuerySource>,
    registration_number_col: SelectableExpression<QuerySource>,
    breed_col: SelectableExpression<QuerySource>,
    cattle_type_col: SelectableExpression<QuerySource>,
    active_col: SelectableExpression<QuerySource>,
{
    fn as_diesel_filter<'a>(&'a self) -> Option<BoxedDieselExpression<'a, QuerySource>>
    where
        QuerySource: 'a,
    {
        let Self {
            search,
            breed,
            cattle_type,
            active,
            ..
        } = self;

        let mut query = DieselExpressionBuilder::default();

        if let Some(search) = search {
            query = query.and(
                name_col
                    .ilike(search.as_ilike())
                    .or(registration_number_col.ilike(search.as_ilike())),
            );
        }

        if let Some(breed) = breed {
            query = query.and(breed_col.eq(breed));
        }

        if let Some(cattle_type) = cattle_type {
            query = query.and(cattle_type_col.eq(cattle_type));
        }

        if let Some(active) = active {
            query = query.and(active_col.eq(active));
        }

        query.build()
    }
}

impl model::FetchByQuery for Donor {
    type QueryParams = DonorQuery;

    async fn fetch_by_query(
        query: &Self::QueryParams,
        db_conn: &mut AsyncPgConnection,
    ) -> error::Result<Vec<Self>> {
        let DonorQuery { limit, offset, .. } = query;

        let mut statement = Self::as_diesel_query_base()
            .select(Self::as_select())
            .order_by(name_col)
            .limit(*limit)
            .offset(*offset)
            .into_boxed();

        if let Some(filter) = query.as_diesel_filter() {
            statement = statement.filter(filter);
        }

        Ok(statement.load(db_conn).await?)
    }
}
