//! Ordering keys derived from record info
//!
//! Two chunks of the same sink that share a key are delivered in chunk order.

use crate::application::worker::constants::{JOB_BARRIER_KEY_PREFIX, SEQUENTIAL_ORDERING_KEY};
use crate::domain::{JobSpecification, OrderingPolicy, RecordInfo, Sink};
use std::collections::BTreeSet;

/// Keys for one item under the sink's ordering policy
pub fn item_keys(policy: OrderingPolicy, record_info: Option<&RecordInfo>) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    match policy {
        OrderingPolicy::None => {}
        OrderingPolicy::Sequential => {
            keys.insert(SEQUENTIAL_ORDERING_KEY.to_string());
        }
        OrderingPolicy::PerRecord => {
            if let Some(info) = record_info {
                if !info.id.is_empty() {
                    keys.insert(info.id.clone());
                }
                // children wait for their parent
                if let Some(parent) = info.parent_id.as_ref().filter(|p| !p.is_empty()) {
                    keys.insert(parent.clone());
                }
            }
        }
        OrderingPolicy::PerAgency => {
            if let Some(agency) = record_info.and_then(|i| i.agency_id) {
                keys.insert(agency.to_string());
            }
        }
    }
    keys
}

/// Union of the item keys of a whole chunk
pub fn chunk_keys<'a>(
    policy: OrderingPolicy,
    record_infos: impl IntoIterator<Item = Option<&'a RecordInfo>>,
) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    if policy == OrderingPolicy::Sequential {
        keys.insert(SEQUENTIAL_ORDERING_KEY.to_string());
        return keys;
    }
    for info in record_infos {
        keys.extend(item_keys(policy, info));
    }
    keys
}

/// Barrier key shared by a job's termination chunk and the first chunk of the
/// next job from the same submitter. None unless the sink terminates jobs.
pub fn barrier_key(sink: &Sink, specification: &JobSpecification) -> Option<String> {
    sink.job_termination
        .then(|| format!("{}{}", JOB_BARRIER_KEY_PREFIX, specification.submitter_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobType, Priority};

    fn info(id: &str, parent: Option<&str>, agency: Option<i64>) -> RecordInfo {
        RecordInfo {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            agency_id: agency,
        }
    }

    #[test]
    fn test_no_ordering_yields_no_keys() {
        let record = info("rec1", None, Some(870970));
        assert!(item_keys(OrderingPolicy::None, Some(&record)).is_empty());
    }

    #[test]
    fn test_per_record_includes_parent() {
        let record = info("vol1", Some("head1"), None);
        let keys = item_keys(OrderingPolicy::PerRecord, Some(&record));
        assert_eq!(
            keys,
            BTreeSet::from(["head1".to_string(), "vol1".to_string()])
        );
    }

    #[test]
    fn test_per_agency_and_missing_info() {
        let record = info("rec1", None, Some(870970));
        assert_eq!(
            item_keys(OrderingPolicy::PerAgency, Some(&record)),
            BTreeSet::from(["870970".to_string()])
        );
        assert!(item_keys(OrderingPolicy::PerAgency, None).is_empty());
        assert!(item_keys(OrderingPolicy::PerRecord, None).is_empty());
    }

    #[test]
    fn test_chunk_keys_union() {
        let a = info("rec1", None, None);
        let b = info("rec2", Some("rec1"), None);
        let keys = chunk_keys(OrderingPolicy::PerRecord, [Some(&a), Some(&b), None]);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_sequential_is_one_constant_key() {
        let keys = chunk_keys(OrderingPolicy::Sequential, std::iter::empty());
        assert_eq!(keys, BTreeSet::from([SEQUENTIAL_ORDERING_KEY.to_string()]));
    }

    #[test]
    fn test_barrier_key_only_for_terminating_sinks() {
        let mut sink = Sink {
            id: 5,
            version: 1,
            name: "dummy".to_string(),
            destination: "sink::dummy".to_string(),
            ordering: OrderingPolicy::None,
            job_termination: false,
        };
        let specification = JobSpecification {
            packaging: "lin".to_string(),
            format: "marc2".to_string(),
            charset: "utf8".to_string(),
            destination: "broend".to_string(),
            submitter_id: 870970,
            data_file: "data.lin".to_string(),
            job_type: JobType::Transient,
            priority: Priority::Normal,
        };
        assert_eq!(barrier_key(&sink, &specification), None);

        sink.job_termination = true;
        let key = barrier_key(&sink, &specification).unwrap();
        assert!(key.ends_with("870970"));
        assert_ne!(key, "870970", "must not collide with agency keys");
    }
}
