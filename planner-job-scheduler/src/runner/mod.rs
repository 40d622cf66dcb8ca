use planner_common::db::job_registry::JobRegistry;

use futures::future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time;

use crate::jobs::Job;

struct JobContainer {
    job: Box<dyn Job>,
    run_frequency: Duration,
    last_run_time: SystemTime,
}

pub struct JobRunner {
    jobs: Vec<JobContainer>,
    update_frequency: Duration,
    job_registry: Arc<dyn JobRegistry>,
}

impl JobRunner {
    pub fn new(update_frequency: Duration, job_registry: Arc<dyn JobRegistry>) -> Self {
        Self {
            jobs: Vec::new(),
            update_frequency,
            job_registry,
        }
    }

    /// A job that has never run before is first run one `run_frequency` after registration.
    pub async fn register(&mut self, job: Box<dyn Job>, run_frequency: Duration) {
        let job_name_ref = job.name();

        log::info!(
            "Registered job \"{}\" to run every {} seconds",
            job_name_ref,
            run_frequency.as_secs()
        );

        let job_registry = Arc::clone(&self.job_registry);
        let last_run_time = tokio::task::spawn_blocking(move || {
            job_registry
                .get_job_last_run_timestamp(job_name_ref)
                .unwrap_or_else(|e| {
                    log::error!(
                        "Failed to get last run timestamp for job '{}': {}",
                        job_name_ref,
                        e
                    );
                    None
                })
        })
        .await
        .unwrap_or_else(|e| {
            log::error!("Failed to join Tokio task: {}", e);
            None
        });

        let job_container = JobContainer {
            job,
            run_frequency,
            last_run_time: last_run_time.unwrap_or(SystemTime::now()),
        };

        self.jobs.push(job_container);
    }

    pub async fn start(&mut self) -> ! {
        loop {
            let before = Instant::now();

            let mut job_names = Vec::with_capacity(self.jobs.len());
            let mut job_futures = Vec::with_capacity(self.jobs.len());
            let mut record_job_run_futures = Vec::with_capacity(self.jobs.len());

            for job_container in &mut self.jobs {
                let now = SystemTime::now();

                let time_elapsed_since_last_run = now
                    .duration_since(job_container.last_run_time)
                    .unwrap_or(Duration::from_nanos(0));
                let is_time_to_run = time_elapsed_since_last_run >= job_container.run_frequency;

                if is_time_to_run && job_container.job.is_ready() {
                    job_container.last_run_time = now;

                    let name_ref = job_container.job.name();
                    log::info!("Executing job \"{}\"", name_ref);
                    job_names.push(name_ref);
                    job_futures.push(job_container.job.execute());

                    let job_registry = Arc::clone(&self.job_registry);
                    let record_run_task = tokio::task::spawn_blocking(move || {
                        job_registry.set_job_last_run_timestamp(name_ref, now)
                    });

                    record_job_run_futures.push(record_run_task);
                }
            }

            let (job_results, recording_results) = future::join(
                future::join_all(job_futures),
                future::join_all(record_job_run_futures),
            )
            .await;

            for (i, result) in job_results.into_iter().enumerate() {
                if let Err(e) = result {
                    log::error!("Job \"{}\" failed: {}", job_names[i], e);
                } else {
                    log::info!("Job \"{}\" finished successfully", job_names[i]);
                }
            }

            for result in recording_results.into_iter() {
                match result {
                    Ok(Ok(())) => (),
                    Ok(Err(e)) => log::error!("Error recording job run: {}", e),
                    Err(e) => log::error!("Failed to join Tokio task: {}", e),
                }
            }

            let after = Instant::now();
            let delta = after - before;

            if delta < self.update_frequency {
                time::sleep(self.update_frequency - delta).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use planner_common::db::DaoError;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::jobs::tests::MockJob;

    #[derive(Default)]
    struct InMemoryJobRegistry {
        timestamps: Mutex<HashMap<String, SystemTime>>,
    }

    impl JobRegistry for InMemoryJobRegistry {
        fn get_job_last_run_timestamp(
            &self,
            job_name: &str,
        ) -> Result<Option<SystemTime>, DaoError> {
            Ok(self.timestamps.lock().unwrap().get(job_name).copied())
        }

        fn set_job_last_run_timestamp(
            &self,
            job_name: &str,
            timestamp: SystemTime,
        ) -> Result<(), DaoError> {
            self.timestamps
                .lock()
                .unwrap()
                .insert(String::from(job_name), timestamp);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register() {
        let registry = Arc::new(InMemoryJobRegistry::default());
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        registry.set_job_last_run_timestamp("Job 2", long_ago).unwrap();

        let mut job_runner = JobRunner::new(Duration::from_micros(200), registry);
        assert_eq!(job_runner.update_frequency, Duration::from_micros(200));
        assert!(job_runner.jobs.is_empty());

        let before_register = SystemTime::now();

        job_runner
            .register(Box::new(MockJob::new("Job 1")), Duration::from_millis(1))
            .await;
        assert_eq!(job_runner.jobs.len(), 1);
        assert!(job_runner.jobs[0].last_run_time >= before_register);

        job_runner
            .register(Box::new(MockJob::new("Job 2")), Duration::from_millis(3))
            .await;
        assert_eq!(job_runner.jobs.len(), 2);
        assert_eq!(job_runner.jobs[1].last_run_time, long_ago);
    }

    #[tokio::test]
    async fn test_start() {
        let registry = Arc::new(InMemoryJobRegistry::default());
        let mut job_runner = JobRunner::new(Duration::from_millis(1), registry.clone());

        let job1 = MockJob::new("Job 1");
        let job2 = MockJob::new("Job 2");

        let job1_run_count = Arc::clone(&job1.runs);
        let job2_run_count = Arc::clone(&job2.runs);

        job_runner
            .register(Box::new(job1), Duration::from_millis(100))
            .await;
        job_runner
            .register(Box::new(job2), Duration::from_millis(250))
            .await;

        assert_eq!(*job1_run_count.lock().unwrap(), 0);
        assert_eq!(*job2_run_count.lock().unwrap(), 0);

        tokio::task::spawn(async move { job_runner.start().await });

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*job1_run_count.lock().unwrap(), 1);
        assert_eq!(*job2_run_count.lock().unwrap(), 0);

        time::sleep(Duration::from_millis(130)).await;
        assert_eq!(*job1_run_count.lock().unwrap(), 2);
        assert_eq!(*job2_run_count.lock().unwrap(), 1);

        let timestamps = registry.timestamps.lock().unwrap();
        assert!(timestamps.contains_key("Job 1"));
        assert!(timestamps.contains_key("Job 2"));
    }

    #[tokio::test]
    async fn test_overdue_job_runs_immediately() {
        let registry = Arc::new(InMemoryJobRegistry::default());
        registry
            .set_job_last_run_timestamp("Job 1", SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let mut job_runner = JobRunner::new(Duration::from_millis(1), registry);

        let job = MockJob::new("Job 1");
        let run_count = Arc::clone(&job.runs);

        job_runner
            .register(Box::new(job), Duration::from_secs(60))
            .await;

        tokio::task::spawn(async move { job_runner.start().await });

        time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*run_count.lock().unwrap(), 1);
    }
}
