use diesel::{Insertable, Queryable};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::schema::throttle_records;
use crate::throttle::{IdentifierKind, ThrottleNamespace};

/// One row per (namespace, identifier kind, identifier). `identifier_kind` is 0 for keys that
/// carry no kind (the pure-IP throttle).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Queryable)]
#[diesel(table_name = throttle_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ThrottleRecord {
    pub namespace: i16,
    pub identifier_kind: i16,
    pub identifier: String,
    pub attempts: i32,
    pub last_attempt: SystemTime,
    pub blocked: bool,
    pub blocked_until: Option<SystemTime>,
}

impl ThrottleRecord {
    pub fn namespace(&self) -> Option<ThrottleNamespace> {
        ThrottleNamespace::from_db(self.namespace)
    }

    pub fn kind(&self) -> Option<IdentifierKind> {
        IdentifierKind::from_db(self.identifier_kind)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = throttle_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewThrottleRecord<'a> {
    pub namespace: i16,
    pub identifier_kind: i16,
    pub identifier: &'a str,
    pub attempts: i32,
    pub last_attempt: SystemTime,
    pub blocked: bool,
    pub blocked_until: Option<SystemTime>,
}
