use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::db::DaoError;
use crate::models::throttle_record::ThrottleRecord;

pub mod memory;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
pub const IP_THROTTLE_BLOCK_MINS: u64 = 15;
pub const SPAM_PREVENTION_BLOCK_MINS: u64 = 60;

const NO_KIND: i16 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Email,
    Ip,
    User,
}

impl IdentifierKind {
    pub const fn to_db(self) -> i16 {
        match self {
            IdentifierKind::Email => 1,
            IdentifierKind::Ip => 2,
            IdentifierKind::User => 3,
        }
    }

    pub fn from_db(value: i16) -> Option<Self> {
        match value {
            1 => Some(IdentifierKind::Email),
            2 => Some(IdentifierKind::Ip),
            3 => Some(IdentifierKind::User),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            IdentifierKind::Email => "email",
            IdentifierKind::Ip => "ip",
            IdentifierKind::User => "user",
        }
    }
}

impl FromStr for IdentifierKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(IdentifierKind::Email),
            "ip" => Ok(IdentifierKind::Ip),
            "user" => Ok(IdentifierKind::User),
            _ => Err(ParseError::UnknownKind(String::from(s))),
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThrottleNamespace {
    IpThrottle,
    SpamPrevention,
}

impl ThrottleNamespace {
    pub const fn to_db(self) -> i16 {
        match self {
            ThrottleNamespace::IpThrottle => 1,
            ThrottleNamespace::SpamPrevention => 2,
        }
    }

    pub fn from_db(value: i16) -> Option<Self> {
        match value {
            1 => Some(ThrottleNamespace::IpThrottle),
            2 => Some(ThrottleNamespace::SpamPrevention),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ThrottleNamespace::IpThrottle => "ip-throttle",
            ThrottleNamespace::SpamPrevention => "spam-prevention",
        }
    }
}

impl FromStr for ThrottleNamespace {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip-throttle" => Ok(ThrottleNamespace::IpThrottle),
            "spam-prevention" => Ok(ThrottleNamespace::SpamPrevention),
            _ => Err(ParseError::UnknownNamespace(String::from(s))),
        }
    }
}

impl fmt::Display for ThrottleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    UnknownKind(String),
    UnknownNamespace(String),
}

impl std::error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownKind(k) => write!(f, "Unknown identifier kind '{k}'"),
            ParseError::UnknownNamespace(n) => write!(f, "Unknown throttle namespace '{n}'"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub namespace: ThrottleNamespace,
    pub kind: Option<IdentifierKind>,
    pub identifier: String,
}

impl ThrottleKey {
    pub fn new(
        namespace: ThrottleNamespace,
        kind: Option<IdentifierKind>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            kind,
            identifier: identifier.into(),
        }
    }

    /// The primary key columns of `throttle_records`, in table order.
    pub fn db_columns(&self) -> (i16, i16, &str) {
        (
            self.namespace.to_db(),
            self.kind.map_or(NO_KIND, IdentifierKind::to_db),
            &self.identifier,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub namespace: ThrottleNamespace,
    pub max_attempts: i32,
    pub block_duration: Duration,
}

impl ThrottlePolicy {
    pub const fn ip_throttle() -> Self {
        Self {
            namespace: ThrottleNamespace::IpThrottle,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            block_duration: Duration::from_secs(IP_THROTTLE_BLOCK_MINS * 60),
        }
    }

    pub const fn spam_prevention() -> Self {
        Self {
            namespace: ThrottleNamespace::SpamPrevention,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            block_duration: Duration::from_secs(SPAM_PREVENTION_BLOCK_MINS * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Clear,
    /// `until` is `None` for a block with no expiry.
    Blocked { until: Option<SystemTime> },
}

impl BlockStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockStatus::Blocked { .. })
    }
}

/// Persistent storage for throttle records.
///
/// All state lives behind this trait; nothing is cached in process. Implementations must apply
/// each method as a single atomic unit per record. Methods are blocking, so async callers should
/// run them on a blocking thread pool.
pub trait ThrottleStore: Send + Sync {
    /// Pure read. Never creates a record.
    fn find(&self, key: &ThrottleKey) -> Result<Option<ThrottleRecord>, DaoError>;

    /// Creates the record with one attempt or increments its attempts, refreshing
    /// `last_attempt`. If the resulting count is at least `max_attempts`, the record is blocked
    /// until `block_until` as part of the same unit.
    fn record_failure(
        &self,
        key: &ThrottleKey,
        max_attempts: i32,
        block_until: SystemTime,
        now: SystemTime,
    ) -> Result<ThrottleRecord, DaoError>;

    /// Creates or overwrites the record with zero attempts and no block.
    fn reset(&self, key: &ThrottleKey, now: SystemTime) -> Result<(), DaoError>;

    /// Clears the block and attempts of an existing record whose block expired before `now`.
    /// Absent records are left absent, and a block that has since been extended is kept.
    fn lift_block(&self, key: &ThrottleKey, now: SystemTime) -> Result<(), DaoError>;

    /// Deletes records with no attempt since `cutoff` that are not under a block extending past
    /// `cutoff`. Returns the number of records deleted.
    fn delete_stale(&self, cutoff: SystemTime) -> Result<usize, DaoError>;
}

#[derive(Clone)]
pub struct Throttle {
    store: Arc<dyn ThrottleStore>,
    policy: ThrottlePolicy,
}

impl Throttle {
    pub fn new(store: Arc<dyn ThrottleStore>, policy: ThrottlePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ThrottleStore> {
        &self.store
    }

    fn key(&self, identifier: &str, kind: Option<IdentifierKind>) -> ThrottleKey {
        ThrottleKey::new(self.policy.namespace, kind, identifier)
    }

    /// May write: a block whose expiry has passed is lifted (and its attempts cleared) before
    /// reporting the identifier as clear.
    pub fn check(
        &self,
        identifier: &str,
        kind: Option<IdentifierKind>,
    ) -> Result<BlockStatus, DaoError> {
        let key = self.key(identifier, kind);

        let Some(record) = self.store.find(&key)? else {
            return Ok(BlockStatus::Clear);
        };

        if !record.blocked {
            return Ok(BlockStatus::Clear);
        }

        let now = SystemTime::now();

        match record.blocked_until {
            Some(until) if until < now => {
                self.store.lift_block(&key, now)?;
                log::debug!(
                    "Lifted expired block (namespace={}, kind={})",
                    self.policy.namespace,
                    kind.map_or("none", IdentifierKind::as_str),
                );
                Ok(BlockStatus::Clear)
            }
            until => Ok(BlockStatus::Blocked { until }),
        }
    }

    pub fn is_blocked(
        &self,
        identifier: &str,
        kind: Option<IdentifierKind>,
    ) -> Result<bool, DaoError> {
        Ok(self.check(identifier, kind)?.is_blocked())
    }

    pub fn record_failed_attempt(
        &self,
        identifier: &str,
        kind: Option<IdentifierKind>,
    ) -> Result<ThrottleRecord, DaoError> {
        self.record_failed_attempt_with(
            identifier,
            kind,
            self.policy.max_attempts,
            self.policy.block_duration,
        )
    }

    pub fn record_failed_attempt_with(
        &self,
        identifier: &str,
        kind: Option<IdentifierKind>,
        max_attempts: i32,
        block_duration: Duration,
    ) -> Result<ThrottleRecord, DaoError> {
        let key = self.key(identifier, kind);
        let now = SystemTime::now();

        let record = self
            .store
            .record_failure(&key, max_attempts, now + block_duration, now)?;

        if record.blocked && record.attempts == max_attempts {
            log::info!(
                "Blocking identifier for {} mins (namespace={}, kind={}, attempts={})",
                block_duration.as_secs() / 60,
                self.policy.namespace,
                kind.map_or("none", IdentifierKind::as_str),
                record.attempts,
            );
        }

        Ok(record)
    }

    pub fn reset_attempts(
        &self,
        identifier: &str,
        kind: Option<IdentifierKind>,
    ) -> Result<(), DaoError> {
        self.store
            .reset(&self.key(identifier, kind), SystemTime::now())
    }

    pub fn get_attempt_count(
        &self,
        identifier: &str,
        kind: Option<IdentifierKind>,
    ) -> Result<i32, DaoError> {
        Ok(self
            .store
            .find(&self.key(identifier, kind))?
            .map_or(0, |r| r.attempts))
    }
}

/// Throttle keyed by bare client IP address.
#[derive(Clone)]
pub struct IpThrottle {
    throttle: Throttle,
}

impl IpThrottle {
    pub fn new(store: Arc<dyn ThrottleStore>, max_attempts: i32, block_duration: Duration) -> Self {
        Self {
            throttle: Throttle::new(
                store,
                ThrottlePolicy {
                    max_attempts,
                    block_duration,
                    ..ThrottlePolicy::ip_throttle()
                },
            ),
        }
    }

    pub fn with_defaults(store: Arc<dyn ThrottleStore>) -> Self {
        Self {
            throttle: Throttle::new(store, ThrottlePolicy::ip_throttle()),
        }
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn check(&self, ip: &str) -> Result<BlockStatus, DaoError> {
        self.throttle.check(ip, None)
    }

    pub fn is_blocked(&self, ip: &str) -> Result<bool, DaoError> {
        self.throttle.is_blocked(ip, None)
    }

    pub fn record_failed_attempt(&self, ip: &str) -> Result<ThrottleRecord, DaoError> {
        self.throttle.record_failed_attempt(ip, None)
    }

    pub fn reset_attempts(&self, ip: &str) -> Result<(), DaoError> {
        self.throttle.reset_attempts(ip, None)
    }

    pub fn get_attempt_count(&self, ip: &str) -> Result<i32, DaoError> {
        self.throttle.get_attempt_count(ip, None)
    }
}

/// Throttle keyed by an identifier and its kind, so an email and an IP with the same text are
/// tracked separately.
#[derive(Clone)]
pub struct SpamPrevention {
    throttle: Throttle,
}

impl SpamPrevention {
    pub fn new(store: Arc<dyn ThrottleStore>, max_attempts: i32, block_duration: Duration) -> Self {
        Self {
            throttle: Throttle::new(
                store,
                ThrottlePolicy {
                    max_attempts,
                    block_duration,
                    ..ThrottlePolicy::spam_prevention()
                },
            ),
        }
    }

    pub fn with_defaults(store: Arc<dyn ThrottleStore>) -> Self {
        Self {
            throttle: Throttle::new(store, ThrottlePolicy::spam_prevention()),
        }
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn check(&self, identifier: &str, kind: IdentifierKind) -> Result<BlockStatus, DaoError> {
        self.throttle.check(identifier, Some(kind))
    }

    pub fn is_blocked(&self, identifier: &str, kind: IdentifierKind) -> Result<bool, DaoError> {
        self.throttle.is_blocked(identifier, Some(kind))
    }

    pub fn record_attempt(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<ThrottleRecord, DaoError> {
        self.throttle.record_failed_attempt(identifier, Some(kind))
    }

    pub fn reset_attempts(&self, identifier: &str, kind: IdentifierKind) -> Result<(), DaoError> {
        self.throttle.reset_attempts(identifier, Some(kind))
    }

    pub fn get_attempt_count(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<i32, DaoError> {
        self.throttle.get_attempt_count(identifier, Some(kind))
    }
}
