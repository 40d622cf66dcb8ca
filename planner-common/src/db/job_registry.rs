use diesel::{dsl, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use std::time::SystemTime;

use crate::db::{DaoError, DbThreadPool};
use crate::models::job_registry_item::NewJobRegistryItem;
use crate::schema::job_registry as job_registry_fields;
use crate::schema::job_registry::dsl::job_registry;

/// Where the job scheduler remembers when each job last ran, so restarts don't rerun every job.
pub trait JobRegistry: Send + Sync {
    fn get_job_last_run_timestamp(&self, job_name: &str) -> Result<Option<SystemTime>, DaoError>;

    fn set_job_last_run_timestamp(
        &self,
        job_name: &str,
        timestamp: SystemTime,
    ) -> Result<(), DaoError>;
}

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

impl JobRegistry for Dao {
    fn get_job_last_run_timestamp(&self, job_name: &str) -> Result<Option<SystemTime>, DaoError> {
        Ok(job_registry
            .select(job_registry_fields::last_run_timestamp)
            .find(job_name)
            .get_result(&mut self.db_thread_pool.get()?)
            .optional()?)
    }

    fn set_job_last_run_timestamp(
        &self,
        job_name: &str,
        timestamp: SystemTime,
    ) -> Result<(), DaoError> {
        let registry_item = NewJobRegistryItem {
            job_name,
            last_run_timestamp: timestamp,
        };

        dsl::insert_into(job_registry)
            .values(&registry_item)
            .on_conflict(job_registry_fields::job_name)
            .do_update()
            .set(job_registry_fields::last_run_timestamp.eq(timestamp))
            .execute(&mut self.db_thread_pool.get()?)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils;
    use std::time::{Duration, UNIX_EPOCH};

    fn dao() -> Dao {
        Dao::new(test_utils::db_pool())
    }

    #[test]
    #[ignore = "requires a Postgres database"]
    fn job_registry_persists_and_updates_timestamps() {
        let dao = dao();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let job_name = format!("test-job-{nanos}");

        assert!(dao.get_job_last_run_timestamp(&job_name).unwrap().is_none());

        // Postgres timestamps have microsecond precision
        let timestamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        dao.set_job_last_run_timestamp(&job_name, timestamp)
            .unwrap();

        let stored = dao.get_job_last_run_timestamp(&job_name).unwrap();
        assert_eq!(stored, Some(timestamp));

        let new_timestamp = timestamp + Duration::from_secs(60);
        dao.set_job_last_run_timestamp(&job_name, new_timestamp)
            .unwrap();

        let updated = dao.get_job_last_run_timestamp(&job_name).unwrap();
        assert_eq!(updated, Some(new_timestamp));
    }
}
