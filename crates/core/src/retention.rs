use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::Archive;

/// Age-based cleanup guarded by a minimum retained count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub min_retained: usize,
}

/// Result of a cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionDecision {
    pub deleted: Vec<String>,
    pub kept: usize,
}

impl RetentionPolicy {
    pub fn new(retention_days: u32, min_retained: usize) -> Self {
        Self {
            retention_days,
            min_retained,
        }
    }

    /// Filenames eligible for deletion, oldest last.
    ///
    /// The count floor is checked before age: the newest `min_retained`
    /// archives are never eligible, whatever their age.
    pub fn eligible(&self, archives: &[Archive], now: DateTime<Utc>) -> Vec<String> {
        if archives.len() <= self.min_retained {
            return Vec::new();
        }

        let mut sorted: Vec<&Archive> = archives.iter().collect();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        // a cutoff before the representable range means nothing is old enough
        let Some(cutoff) = Duration::try_days(i64::from(self.retention_days))
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Vec::new();
        };
        sorted
            .into_iter()
            .skip(self.min_retained)
            .filter(|a| a.created_at < cutoff)
            .map(|a| a.filename.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveKind;

    fn archive(name: &str, age_days: i64, now: DateTime<Utc>) -> Archive {
        Archive {
            filename: name.to_owned(),
            created_at: now - Duration::days(age_days),
            size_bytes: 1,
            kind: ArchiveKind::Scheduled,
        }
    }

    fn fleet(ages: &[i64], now: DateTime<Utc>) -> Vec<Archive> {
        ages.iter()
            .enumerate()
            .map(|(i, age)| archive(&format!("a{i}"), *age, now))
            .collect()
    }

    #[test]
    fn nothing_is_eligible_at_or_below_the_floor() {
        let now = Utc::now();
        let archives = fleet(&[400, 500, 600], now);
        assert!(RetentionPolicy::new(30, 3).eligible(&archives, now).is_empty());
        assert!(RetentionPolicy::new(30, 5).eligible(&archives, now).is_empty());
    }

    #[test]
    fn old_archives_past_the_floor_are_eligible() {
        let now = Utc::now();
        let archives = fleet(&[1, 2, 3, 40, 50], now);
        let doomed = RetentionPolicy::new(30, 2).eligible(&archives, now);
        assert_eq!(doomed, vec!["a3".to_owned(), "a4".to_owned()]);
    }

    #[test]
    fn recent_archives_past_the_floor_are_kept() {
        let now = Utc::now();
        let archives = fleet(&[1, 2, 3, 4, 5], now);
        assert!(RetentionPolicy::new(30, 1).eligible(&archives, now).is_empty());
    }

    #[test]
    fn floor_wins_over_age() {
        // 12 archives, the 5 oldest past 30 days, floor of 10.
        let now = Utc::now();
        let ages = [1, 2, 3, 4, 5, 6, 7, 31, 32, 33, 34, 35];
        let archives = fleet(&ages, now);
        let doomed = RetentionPolicy::new(30, 10).eligible(&archives, now);
        assert_eq!(doomed, vec!["a10".to_owned(), "a11".to_owned()]);
        assert_eq!(archives.len() - doomed.len(), 10);
    }

    #[test]
    fn input_order_does_not_matter() {
        let now = Utc::now();
        let mut archives = fleet(&[60, 1, 90, 2], now);
        archives.reverse();
        let doomed = RetentionPolicy::new(30, 2).eligible(&archives, now);
        assert_eq!(doomed.len(), 2);
        assert!(doomed.contains(&"a0".to_owned()));
        assert!(doomed.contains(&"a2".to_owned()));
    }

    #[test]
    fn unrepresentable_cutoff_deletes_nothing() {
        let now = Utc::now();
        let archives = fleet(&[100, 2000, 30_000], now);
        assert!(RetentionPolicy::new(u32::MAX, 1)
            .eligible(&archives, now)
            .is_empty());
        assert!(RetentionPolicy::new(u32::MAX, 0)
            .eligible(&archives, now)
            .is_empty());
    }

    #[test]
    fn floor_holds_for_every_threshold() {
        let now = Utc::now();
        let archives = fleet(&[100, 200, 300, 400, 500, 600, 700], now);
        for min in 0..=archives.len() {
            for days in [0, 1, 30, 365] {
                let doomed = RetentionPolicy::new(days, min).eligible(&archives, now);
                assert!(archives.len() - doomed.len() >= min.min(archives.len()));
            }
        }
    }
}
