use std::fmt::Debug;

use chrono::{Days, NaiveDate};
use diesel_async::{
    AsyncConnection, AsyncPgConnection,
    pooled_connection::{
        AsyncDieselConnectionManager,
        deadpool::{Object, Pool},
    },
};
use pretty_assertions::assert_eq;
use rstest::fixture;
use tokio::sync::OnceCell;

use crate::{
    db::model::{
        FetchByQuery, Write,
        donor::{CattleType, DonorReference, NewDonor},
        session::{DonorExtractionEntry, NewCollectionSession, SessionPurpose},
    },
    server::{run_migrations, util::DevContainer},
};

pub const N_DONORS: usize = 10;
pub const N_SESSIONS: usize = 8;

struct TestState {
    _container: DevContainer,
    db_pool: Pool<AsyncPgConnection>,
}

impl TestState {
    async fn new() -> Self {
        let container = DevContainer::new("herdbook-backend_unit_test", false)
            .await
            .unwrap();
        let db_url = container.db_url().await.unwrap();

        let migrations_conn = AsyncPgConnection::establish(&db_url).await.unwrap();
        run_migrations(migrations_conn).await.unwrap();

        let manager = AsyncDieselConnectionManager::new(db_url);
        let db_pool = Pool::builder(manager).build().unwrap();

        let mut db_conn = db_pool.get().await.unwrap();
        insert_seed_data(&mut db_conn).await;

        Self {
            _container: container,
            db_pool,
        }
    }
}

async fn insert_seed_data(db_conn: &mut AsyncPgConnection) {
    let mut donor_ids = Vec::with_capacity(N_DONORS);

    for i in 0..N_DONORS {
        let donor = NewDonor {
            name: format!("donor{i}"),
            registration_number: format!("REG-{i:02}"),
            breed: if i % 2 == 0 { "Gyr" } else { "Holstein" }.to_string(),
            cattle_type: if i % 2 == 0 {
                CattleType::Beef
            } else {
                CattleType::Dairy
            },
            owner_name: format!("owner{i}"),
            owner_contact: None,
            birth_date: None,
            weight_kg: None,
            notes: None,
        }
        .write(db_conn)
        .await
        .unwrap();

        donor_ids.push(*donor.id());
    }

    let first_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

    for i in 0..N_SESSIONS {
        let extractions = [donor_ids[i], donor_ids[(i + 1) % N_DONORS]]
            .into_iter()
            .enumerate()
            .map(|(seq, donor_id)| DonorExtractionEntry {
                donor: DonorReference {
                    donor_id: Some(donor_id),
                    new_donor: None,
                },
                sequence_number: i32::try_from(seq).unwrap() + 1,
                ..Default::default()
            })
            .collect();

        NewCollectionSession {
            session_date: first_date + Days::new(u64::try_from(i).unwrap()),
            technicians: vec!["tech_a".to_string(), "tech_b".to_string()],
            client: format!("client{i}"),
            site: None,
            lot: None,
            medium: None,
            recipients: None,
            purpose: if i % 2 == 0 {
                SessionPurpose::Fresh
            } else {
                SessionPurpose::Vitrified
            },
            started_at: None,
            ended_at: None,
            notes: None,
            extractions,
        }
        .write(db_conn)
        .await
        .unwrap();
    }
}

static TEST_STATE: OnceCell<TestState> = OnceCell::const_new();

pub type DbConnection = Object<AsyncPgConnection>;

#[fixture]
pub async fn db_conn() -> DbConnection {
    let TestState { db_pool, .. } = TEST_STATE.get_or_init(TestState::new).await;

    db_pool.get().await.unwrap()
}

pub async fn test_query<Record, Query, Cmp, Expected>(
    query: Query,
    mut db_conn: DbConnection,
    expected_len: usize,
    comparison_fn: fn(&Record) -> Cmp,
    expected: &[(usize, Expected)],
) where
    Record: FetchByQuery<QueryParams = Query>,
    Cmp: PartialEq<Expected> + Debug,
    Expected: Debug,
{
    let records = Record::fetch_by_query(&query, &mut db_conn).await.unwrap();
    assert_eq!(records.len(), expected_len);

    for (i, expected_value) in expected {
        assert_eq!(comparison_fn(&records[*i]), *expected_value);
    }
}
