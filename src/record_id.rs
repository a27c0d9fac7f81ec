use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::node_id::ScheduleId;

/// Generates a record id of the form `<schedule-slug>-<4 hex>`.
pub fn generate_record_id<F>(schedule: &ScheduleId, mut exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let slug = schedule_slug(schedule);

    for _ in 0..64 {
        let seed = Uuid::now_v7().to_string();
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let short = &digest[..4];
        let candidate = format!("{}-{}", slug, short);
        if !exists(&candidate) {
            return candidate;
        }
    }

    format!("{}-{}", slug, &Uuid::now_v7().simple().to_string()[..8])
}

pub fn schedule_slug(schedule: &ScheduleId) -> String {
    let normalized = schedule
        .as_str()
        .chars()
        .map(|ch| ch.to_ascii_lowercase())
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        .collect::<String>();
    let trimmed = normalized.trim_matches('-');
    if trimmed.is_empty() {
        "act".to_string()
    } else {
        trimmed.to_string()
    }
}
