//! IdGenerator port - ドキュメント ID の発行
//!
//! store は作成した document に ID を割り当てます。ULID のタイムスタンプ部分を
//! `Clock` 経由でテストから制御できるように抽象化しています。

use ulid::Ulid;

use crate::domain::DocumentId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_document_id(&self) -> DocumentId;
}

/// ULID-based generator: timestamp from the clock, randomness from `rand`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_document_id(&self) -> DocumentId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        DocumentId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_document_id();
        let id2 = id_gen.generate_document_id();
        let id3 = id_gen.generate_document_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_document_id();
        let id2 = id_gen.generate_document_id();

        // Random half still differs.
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
    }
}
