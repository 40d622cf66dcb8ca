use diesel::{
    dsl, BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl,
};
use std::time::SystemTime;

use crate::db::{DaoError, DbThreadPool};
use crate::models::throttle_record::{NewThrottleRecord, ThrottleRecord};
use crate::schema::throttle_records as throttle_record_fields;
use crate::schema::throttle_records::dsl::throttle_records;
use crate::throttle::{ThrottleKey, ThrottleStore};

pub struct Dao {
    db_thread_pool: DbThreadPool,
}

impl Dao {
    pub fn new(db_thread_pool: &DbThreadPool) -> Self {
        Self {
            db_thread_pool: db_thread_pool.clone(),
        }
    }
}

impl ThrottleStore for Dao {
    fn find(&self, key: &ThrottleKey) -> Result<Option<ThrottleRecord>, DaoError> {
        let (namespace, identifier_kind, identifier) = key.db_columns();

        Ok(throttle_records
            .find((namespace, identifier_kind, identifier))
            .get_result::<ThrottleRecord>(&mut self.db_thread_pool.get()?)
            .optional()?)
    }

    fn record_failure(
        &self,
        key: &ThrottleKey,
        max_attempts: i32,
        block_until: SystemTime,
        now: SystemTime,
    ) -> Result<ThrottleRecord, DaoError> {
        let (namespace, identifier_kind, identifier) = key.db_columns();

        let new_record = NewThrottleRecord {
            namespace,
            identifier_kind,
            identifier,
            attempts: 1,
            last_attempt: now,
            blocked: false,
            blocked_until: None,
        };

        let mut db_connection = self.db_thread_pool.get()?;

        // The upsert holds the row lock until commit, so concurrent failures for the same key
        // each observe their own increment
        let record = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                let record = dsl::insert_into(throttle_records)
                    .values(&new_record)
                    .on_conflict((
                        throttle_record_fields::namespace,
                        throttle_record_fields::identifier_kind,
                        throttle_record_fields::identifier,
                    ))
                    .do_update()
                    .set((
                        throttle_record_fields::attempts.eq(throttle_record_fields::attempts + 1),
                        throttle_record_fields::last_attempt.eq(now),
                    ))
                    .get_result::<ThrottleRecord>(conn)?;

                if record.attempts < max_attempts {
                    return Ok(record);
                }

                dsl::update(throttle_records.find((namespace, identifier_kind, identifier)))
                    .set((
                        throttle_record_fields::blocked.eq(true),
                        throttle_record_fields::blocked_until.eq(Some(block_until)),
                    ))
                    .get_result::<ThrottleRecord>(conn)
            })?;

        Ok(record)
    }

    fn reset(&self, key: &ThrottleKey, now: SystemTime) -> Result<(), DaoError> {
        let (namespace, identifier_kind, identifier) = key.db_columns();

        let new_record = NewThrottleRecord {
            namespace,
            identifier_kind,
            identifier,
            attempts: 0,
            last_attempt: now,
            blocked: false,
            blocked_until: None,
        };

        dsl::insert_into(throttle_records)
            .values(&new_record)
            .on_conflict((
                throttle_record_fields::namespace,
                throttle_record_fields::identifier_kind,
                throttle_record_fields::identifier,
            ))
            .do_update()
            .set((
                throttle_record_fields::attempts.eq(0),
                throttle_record_fields::blocked.eq(false),
                throttle_record_fields::blocked_until.eq(None::<SystemTime>),
            ))
            .execute(&mut self.db_thread_pool.get()?)?;

        Ok(())
    }

    fn lift_block(&self, key: &ThrottleKey, now: SystemTime) -> Result<(), DaoError> {
        let (namespace, identifier_kind, identifier) = key.db_columns();

        // A failure recorded since the expired block was read may have re-blocked the record
        dsl::update(
            throttle_records
                .find((namespace, identifier_kind, identifier))
                .filter(throttle_record_fields::blocked.eq(true))
                .filter(throttle_record_fields::blocked_until.lt(now)),
        )
        .set((
            throttle_record_fields::attempts.eq(0),
            throttle_record_fields::blocked.eq(false),
            throttle_record_fields::blocked_until.eq(None::<SystemTime>),
        ))
        .execute(&mut self.db_thread_pool.get()?)?;

        Ok(())
    }

    fn delete_stale(&self, cutoff: SystemTime) -> Result<usize, DaoError> {
        Ok(diesel::delete(
            throttle_records
                .filter(throttle_record_fields::last_attempt.lt(cutoff))
                .filter(
                    throttle_record_fields::blocked
                        .eq(false)
                        .or(throttle_record_fields::blocked_until.lt(cutoff)),
                ),
        )
        .execute(&mut self.db_thread_pool.get()?)?)
    }
}
