use crate::TransferId;

/// Length of the random suffix.
const SUFFIX_LEN: usize = 9;

/// Generates a new transfer identifier: `<unix millis>-<random suffix>`.
///
/// Collisions are not guarded against; the random suffix makes them
/// vanishingly unlikely within a session.
pub fn new_transfer_id() -> TransferId {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{millis}-{}", &random[..SUFFIX_LEN])
}
