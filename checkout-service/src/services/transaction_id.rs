use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Build a transaction id: `<prefix>_<unix-millis>_<32 hex chars>`.
///
/// The suffix is a full v4 UUID, so two ids minted in the same millisecond
/// still differ; the store's unique key catches the rest.
pub fn generate_transaction_id(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        now.timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_format() {
        let now = Utc::now();
        let id = generate_transaction_id("FIT", now);
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "FIT");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_unique_within_same_millisecond() {
        let now = Utc::now();
        let ids: HashSet<String> = (0..10_000)
            .map(|_| generate_transaction_id("FIT", now))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }
}
