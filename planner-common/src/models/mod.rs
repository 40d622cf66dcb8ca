pub mod job_registry_item;
pub mod throttle_record;
