//! Property tests for the replayer: strict sequencing, determinism, and carry-forward.

use chrono::{TimeZone, Utc};
use keel_journal::{JournalError, JournalReplayer, SequencingError};
use keel_state::{
    Deployment, EntryKind, JournalEntry, OpType, SerializedResource, verify_integrity,
};
use proptest::prelude::*;

fn res(i: usize) -> SerializedResource {
    let mut res = SerializedResource::new(
        format!("urn:pulumi:dev::proj::pkg:index:Res::r{i}").as_str(),
        "pkg:index:Res",
        true,
    );
    res.id = i.to_string().as_str().into();
    res
}

/// Begin/Success pairs creating `n` resources, sequenced from 1.
fn creates(n: usize) -> Vec<JournalEntry> {
    let mut entries = Vec::with_capacity(n * 2);
    for i in 0..n {
        let begin = (i * 2 + 1) as i64;
        entries.push(
            JournalEntry::new(EntryKind::Begin)
                .with_seq(begin)
                .with_op(OpType::Create)
                .with_state(res(i)),
        );
        entries.push(
            JournalEntry::new(EntryKind::Success)
                .with_seq(begin + 1)
                .with_op(OpType::Create)
                .with_new(begin)
                .with_state(res(i)),
        );
    }
    entries
}

proptest! {
    #[test]
    fn only_the_next_sequence_number_is_accepted(seqs in prop::collection::vec(0i64..12, 1..40)) {
        let mut replayer = JournalReplayer::new();
        for seq in seqs {
            let latest = replayer.latest();
            let before = format!("{replayer:?}");
            let result = replayer.replay(JournalEntry::new(EntryKind::Begin).with_seq(seq));
            if seq == latest + 1 {
                prop_assert!(result.is_ok());
                prop_assert_eq!(replayer.latest(), seq);
            } else {
                let is_out_of_order = matches!(
                    result,
                    Err(JournalError::Sequencing(SequencingError::OutOfOrder { .. }))
                );
                prop_assert!(is_out_of_order);
                prop_assert_eq!(format!("{replayer:?}"), before);
            }
        }
    }

    #[test]
    fn replay_is_deterministic(n in 0usize..12, in_flight in 0usize..4) {
        let mut entries = creates(n);
        let next = entries.len() as i64 + 1;
        for k in 0..in_flight {
            entries.push(
                JournalEntry::new(EntryKind::Begin)
                    .with_seq(next + k as i64)
                    .with_op(OpType::Update)
                    .with_state(res(100 + k)),
            );
        }
        let time = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let base = Deployment::empty();

        let run = |entries: Vec<JournalEntry>| {
            let mut replayer = JournalReplayer::new();
            for entry in entries {
                replayer.replay(entry).unwrap();
            }
            serde_json::to_vec(&replayer.finish_at(&base, time).unwrap()).unwrap()
        };
        prop_assert_eq!(run(entries.clone()), run(entries));
    }

    #[test]
    fn valid_base_carries_forward_unchanged(
        parents in prop::collection::vec(prop::option::of(0usize..64), 0..24),
    ) {
        // Resource i may name any earlier resource as its parent.
        let mut base = Deployment::empty();
        for (i, parent) in parents.iter().enumerate() {
            let mut r = res(i);
            if let Some(p) = parent {
                if i > 0 {
                    r.parent = res(p % i).urn;
                    r.dependencies = vec![res(p % i).urn];
                }
            }
            base.resources.push(r);
        }
        prop_assert!(verify_integrity(Some(&base)).is_ok());

        let snapshot = JournalReplayer::new().finish(&base).unwrap();
        prop_assert_eq!(snapshot.resources, base.resources);
    }
}
