//! Clearing through scripted repair primitives: ordering, isolation of
//! failures and fatal aborts.

mod common;

use common::{bad, ext, range, Scenario, Scripted};
use pmem_badblocks::{
    BadBlocksList, ClearRequest, ClearStatus, Clearer, Error, Target,
};
use std::collections::HashMap;
use std::path::Path;
use tempfile::NamedTempFile;

fn three_ranges() -> BadBlocksList {
    BadBlocksList::from_ranges(vec![range(0, 10), range(100, 10), range(200, 10)])
}

#[test]
fn test_clear_all_ranges_succeed() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario::default().build();

    let report = backend.badblocks_clear(file.path(), &three_ranges()).unwrap();
    assert_eq!(report.len(), 3);
    assert!(report.is_complete());
    assert_eq!(report.bytes_cleared(), 30);
    assert!(report.ensure_complete().is_ok());
    assert_eq!(
        *calls.repair_calls.lock().unwrap(),
        vec![range(0, 10), range(100, 10), range(200, 10)]
    );
}

#[test]
fn test_empty_clear_does_no_io() {
    let (backend, calls) = Scenario::default().build();

    // The path does not exist: any attempt to open it would fail.
    let report = backend
        .badblocks_clear(Path::new("/no/such/pool"), &BadBlocksList::default())
        .unwrap();
    assert!(report.is_empty());
    assert!(report.is_complete());
    assert!(calls.repair_calls.lock().unwrap().is_empty());
}

#[test]
fn test_non_fatal_failure_is_isolated() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario {
        script: HashMap::from([(100, Scripted::Fail(libc::EIO))]),
        ..Default::default()
    }
    .build();

    let report = backend.badblocks_clear(file.path(), &three_ranges()).unwrap();
    let outcomes = report.outcomes();
    assert!(matches!(outcomes[0].status, ClearStatus::Cleared));
    assert!(matches!(
        &outcomes[1].status,
        ClearStatus::Failed { cause } if cause.os_error() == Some(libc::EIO)
    ));
    assert!(matches!(outcomes[2].status, ClearStatus::Cleared));
    assert_eq!(calls.repair_calls.lock().unwrap().len(), 3);

    match report.ensure_complete() {
        Err(Error::PartialClear {
            cleared,
            partial,
            failed,
            skipped,
        }) => assert_eq!((cleared, partial, failed, skipped), (2, 0, 1, 0)),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_fatal_failure_skips_the_rest() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario {
        script: HashMap::from([(100, Scripted::Fail(libc::ENODEV))]),
        ..Default::default()
    }
    .build();

    let report = backend.badblocks_clear(file.path(), &three_ranges()).unwrap();
    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0].status, ClearStatus::Cleared));
    assert!(matches!(outcomes[1].status, ClearStatus::Failed { .. }));
    assert!(matches!(outcomes[2].status, ClearStatus::Skipped));
    assert_eq!(outcomes[2].range, range(200, 10));
    // The skipped range never reached the repair primitive.
    assert_eq!(calls.repair_calls.lock().unwrap().len(), 2);
    assert_eq!(report.skipped(), 1);
}

#[test]
fn test_partial_clear_is_reported() {
    let file = NamedTempFile::new().unwrap();
    let (backend, _) = Scenario {
        script: HashMap::from([(0, Scripted::Partial(4, libc::EIO))]),
        ..Default::default()
    }
    .build();

    let report = backend.badblocks_clear(file.path(), &three_ranges()).unwrap();
    assert!(matches!(
        report.outcomes()[0].status,
        ClearStatus::Partial {
            bytes_cleared: 4,
            ..
        }
    ));
    assert_eq!(report.partial(), 1);
    assert_eq!(report.bytes_cleared(), 24);
    assert!(!report.is_complete());
}

#[test]
fn test_ranges_are_cleared_in_offset_order() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario::default().build();
    let target = Target::open_writable(file.path()).unwrap();

    // Overlapping and unsorted on purpose: sorted, never merged.
    let ranges = [range(300, 10), range(0, 50), range(20, 50)];
    let report = Clearer::new(&backend)
        .clear(&target, ClearRequest::Ranges(&ranges))
        .unwrap();

    let cleared: Vec<_> = report.outcomes().iter().map(|o| o.range).collect();
    assert_eq!(cleared, vec![range(0, 50), range(20, 50), range(300, 10)]);
    assert_eq!(*calls.repair_calls.lock().unwrap(), cleared);
}

#[test]
fn test_zero_length_range_fails_without_repair() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario::default().build();
    let target = Target::open_writable(file.path()).unwrap();

    let ranges = [range(0, 0), range(512, 512)];
    let report = Clearer::new(&backend)
        .clear(&target, ClearRequest::Ranges(&ranges))
        .unwrap();

    assert!(matches!(
        &report.outcomes()[0].status,
        ClearStatus::Failed {
            cause: Error::InvariantViolation(_)
        }
    ));
    assert!(matches!(report.outcomes()[1].status, ClearStatus::Cleared));
    assert_eq!(*calls.repair_calls.lock().unwrap(), vec![range(512, 512)]);
}

#[test]
fn test_clear_all_discovers_ranges() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario {
        block_size: 512,
        extents: Ok(vec![ext(0, 4096, 4096), ext(4096, 65536, 4096)]),
        bad: Ok(vec![bad(4096 + 100, 10), bad(65536 + 1024, 1024)]),
        ..Default::default()
    }
    .build();

    let report = backend.badblocks_clear_all(file.path()).unwrap();
    assert!(report.is_complete());
    assert_eq!(
        *calls.repair_calls.lock().unwrap(),
        vec![range(0, 512), range(5120, 1024)]
    );
}

#[test]
fn test_clear_all_with_nothing_bad() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario {
        extents: Ok(vec![ext(0, 0, 4096)]),
        ..Default::default()
    }
    .build();

    let report = backend.badblocks_clear_all(file.path()).unwrap();
    assert!(report.is_empty());
    assert!(calls.repair_calls.lock().unwrap().is_empty());
}

#[test]
fn test_devdax_clear_all_requires_dax_device() {
    let file = NamedTempFile::new().unwrap();
    let (backend, calls) = Scenario::default().build();

    let err = backend.badblocks_devdax_clear_all(file.path()).unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(calls.repair_calls.lock().unwrap().is_empty());
}

#[test]
fn test_report_serializes_for_cli() {
    let file = NamedTempFile::new().unwrap();
    let (backend, _) = Scenario {
        script: HashMap::from([(200, Scripted::Fail(libc::EIO))]),
        ..Default::default()
    }
    .build();

    let report = backend.badblocks_clear(file.path(), &three_ranges()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    let statuses: Vec<_> = json["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["cleared", "cleared", "failed"]);
}
