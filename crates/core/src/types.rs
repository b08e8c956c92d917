/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque sequence token returned by the transport for a transmitted message.
pub type Timetoken = String;
