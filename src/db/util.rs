use std::str::FromStr;

use diesel::{
    backend::Backend,
    deserialize::{FromSql, FromSqlRow},
    expression::AsExpression,
    pg::Pg,
    prelude::*,
    serialize::ToSql,
    sql_types,
};

pub(super) type BoxedDieselExpression<'a, Table> =
    Box<dyn BoxableExpression<Table, Pg, SqlType = sql_types::Bool> + 'a>;

pub(super) struct DieselExpressionBuilder<'a, Table>(Option<BoxedDieselExpression<'a, Table>>);
impl<Table> Default for DieselExpressionBuilder<'_, Table> {
    fn default() -> Self {
        Self(None)
    }
}

impl<'a, Table: 'a> DieselExpressionBuilder<'a, Table> {
    pub fn and<Expr>(self, condition: Expr) -> Self
    where
        Expr: BoxableExpression<Table, Pg, SqlType = sql_types::Bool> + 'a,
    {
        let condition: BoxedDieselExpression<Table> = Box::new(condition);

        match self {
            Self(None) => Self(Some(condition)),
            Self(Some(current)) => Self(Some(Box::new(current.and(condition)))),
        }
    }

    pub fn build(self) -> Option<BoxedDieselExpression<'a, Table>> {
        self.0
    }
}

pub(super) trait AsIlike {
    fn as_ilike(&self) -> String;
}

impl AsIlike for str {
    fn as_ilike(&self) -> String {
        format!("%{self}%")
    }
}

/// Enums stored as `text` columns. Unrecognized database values fall back to
/// the enum's default variant rather than failing the whole row.
pub(super) trait DbEnum:
    FromStr
    + Into<&'static str>
    + FromSqlRow<sql_types::Text, Pg>
    + AsExpression<sql_types::Text>
    + Copy
    + Default
{
    fn from_sql_inner(bytes: <Pg as Backend>::RawValue<'_>) -> diesel::deserialize::Result<Self> {
        let raw: String = FromSql::<sql_types::Text, Pg>::from_sql(bytes)?;

        Ok(Self::from_str(&raw).unwrap_or_default())
    }

    fn to_sql_inner<'b>(
        self,
        out: &mut diesel::serialize::Output<'b, '_, Pg>,
    ) -> diesel::serialize::Result {
        let as_str = self.into();

        ToSql::<sql_types::Text, Pg>::to_sql(as_str, out)
    }
}
