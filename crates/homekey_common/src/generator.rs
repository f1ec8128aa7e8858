//! A source of values that are impure to construct directly (current time, random
//! identifiers), so that callers can inject deterministic stand-ins in tests.

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

pub trait Generator<T> {
    fn generate(&self) -> T;
}

/// The generator used by the running service: wall-clock time, random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGenerator;

impl Generator<DateTime<Utc>> for SystemGenerator {
    fn generate(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Generator<Uuid> for SystemGenerator {
    fn generate(&self) -> Uuid {
        Uuid::new_v4()
    }
}
