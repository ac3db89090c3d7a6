//! Break-on-fail propagation within a directory group.

use crate::record::DeliveryRecord;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Record map keyed by target key.
pub type RecordMap = BTreeMap<String, DeliveryRecord>;

/// Cancels the not-yet-uploading siblings of the failed record at `failed_key`.
///
/// Does nothing unless `break_on_fail` is set, the record is cancelled, its
/// upload never started, and it belongs to a directory group. Siblings are
/// visited in source-path order. Returns the keys that were cancelled.
pub fn cascade(records: &mut RecordMap, failed_key: &str, break_on_fail: bool) -> Vec<String> {
    if !break_on_fail {
        return Vec::new();
    }
    let Some(failed) = records.get(failed_key) else {
        return Vec::new();
    };
    if failed.proceed() || !failed.upload_pending() {
        return Vec::new();
    }
    let Some(group) = failed.directory_group.clone() else {
        return Vec::new();
    };

    let origin = failed.source.clone();
    let reason = format!(
        "cancelled because {} failed: {}",
        origin.display(),
        failed.error()
    );

    let mut siblings: Vec<(PathBuf, String)> = records
        .iter()
        .filter(|(key, r)| {
            key.as_str() != failed_key
                && r.directory_group.as_ref() == Some(&group)
                && r.proceed()
                && r.upload_pending()
        })
        .map(|(key, r)| (r.source.clone(), key.clone()))
        .collect();
    siblings.sort();

    let mut cancelled = Vec::with_capacity(siblings.len());
    for (_, key) in siblings {
        if let Some(record) = records.get_mut(&key) {
            record.cancel_cascaded(reason.clone(), &origin);
            debug!("{key}: {reason}");
            cancelled.push(key);
        }
    }

    if !cancelled.is_empty() {
        warn!(
            "directory {}: {} file(s) cancelled after {} failed",
            group.display(),
            cancelled.len(),
            failed_key
        );
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Stage;

    fn group_record(name: &str) -> DeliveryRecord {
        DeliveryRecord::new(
            PathBuf::from(format!("/in/dir/{name}")),
            format!("proj/dir/{name}.zst.c4gh"),
            1,
            false,
        )
        .in_group("/in/dir")
    }

    fn map(records: Vec<DeliveryRecord>) -> RecordMap {
        records
            .into_iter()
            .map(|r| (r.target_key.clone(), r))
            .collect()
    }

    #[test]
    fn cancels_pending_siblings_only() {
        let mut records = map(vec![group_record("a"), group_record("b"), group_record("c")]);

        let uploading = records.get_mut("proj/dir/c.zst.c4gh").unwrap();
        uploading.accept().unwrap();
        uploading.begin(Stage::Processing).unwrap();
        uploading.finish(Stage::Processing).unwrap();
        uploading.begin(Stage::Upload).unwrap();

        records.get_mut("proj/dir/a.zst.c4gh").unwrap().cancel("boom");
        let cancelled = cascade(&mut records, "proj/dir/a.zst.c4gh", true);

        assert_eq!(cancelled, vec!["proj/dir/b.zst.c4gh".to_string()]);
        let b = &records["proj/dir/b.zst.c4gh"];
        assert!(!b.proceed());
        assert!(b.error().contains("/in/dir/a"));
        assert!(b.error().contains("boom"));
        assert_eq!(b.cancelled_by(), Some(std::path::Path::new("/in/dir/a")));
        assert!(records["proj/dir/c.zst.c4gh"].proceed());
    }

    #[test]
    fn disabled_policy_is_noop() {
        let mut records = map(vec![group_record("a"), group_record("b")]);
        records.get_mut("proj/dir/a.zst.c4gh").unwrap().cancel("boom");
        assert!(cascade(&mut records, "proj/dir/a.zst.c4gh", false).is_empty());
        assert!(records["proj/dir/b.zst.c4gh"].proceed());
    }

    #[test]
    fn ungrouped_record_is_noop() {
        let mut lone = DeliveryRecord::new("/in/x".into(), "proj/x.zst.c4gh".into(), 1, false);
        lone.cancel("boom");
        let mut records = map(vec![lone, group_record("b")]);
        assert!(cascade(&mut records, "proj/x.zst.c4gh", true).is_empty());
        assert!(records["proj/dir/b.zst.c4gh"].proceed());
    }

    #[test]
    fn other_groups_are_untouched() {
        let other = DeliveryRecord::new("/in/other/z".into(), "proj/other/z.zst.c4gh".into(), 1, false)
            .in_group("/in/other");
        let mut records = map(vec![group_record("a"), other]);
        records.get_mut("proj/dir/a.zst.c4gh").unwrap().cancel("boom");
        assert!(cascade(&mut records, "proj/dir/a.zst.c4gh", true).is_empty());
        assert!(records["proj/other/z.zst.c4gh"].proceed());
    }
}
