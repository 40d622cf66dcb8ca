pub mod client_addr;
pub mod throttle_guard;

pub use throttle_guard::ThrottleGuard;
