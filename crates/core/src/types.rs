/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// 1-based slide page number; the partition key for pins.
pub type SlidePage = u32;
