use tristore_rev::{
    test, ChangeKind, Result, RevisionStore, StatementSet, StoreOptions,
};

const REPO: u32 = 1;
const KEY: &str = "http://example.org/resource/1";

/// Produces distinct statements with poorly compressible object literals, so
/// blob sizes roughly track statement counts.
fn numbered(i: usize) -> String {
    format!(
        "<http://example.org/s/{}> <http://example.org/p> \"{:016x}\" .",
        i,
        (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    )
}

fn numbered_state(range: std::ops::Range<usize>) -> StatementSet {
    range.map(numbered).collect()
}

test! {
    async fn the_first_change_is_a_snapshot(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        store.put(REPO, KEY, 1, &numbered_state(0..5)).await?;
        let last = store.last_change(REPO, KEY).await?.unwrap();
        assert_eq!(last.kind, ChangeKind::Snapshot);
        assert!(last.len > 0);
    }
}

test! {
    async fn a_small_change_to_a_large_state_is_a_delta(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        let mut state = numbered_state(0..20);
        store.put(REPO, KEY, 1, &state).await?;
        let base = store.last_change(REPO, KEY).await?.unwrap();

        state.insert(numbered(1000));
        store.put(REPO, KEY, 2, &state).await?;
        let last = store.last_change(REPO, KEY).await?.unwrap();
        assert_eq!(last.kind, ChangeKind::Delta);
        assert!(last.len < base.len);

        assert_eq!(store.get_at(REPO, KEY, 2).await?, Some(state));
    }
}

test! {
    async fn replacing_the_whole_state_is_a_snapshot(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        store.put(REPO, KEY, 1, &numbered_state(0..20)).await?;

        // A patch would have to delete 20 and add 20 statements, twice the
        // size of a fresh snapshot of the 20 new ones.
        let replaced = numbered_state(100..120);
        store.put(REPO, KEY, 2, &replaced).await?;
        let last = store.last_change(REPO, KEY).await?.unwrap();
        assert_eq!(last.kind, ChangeKind::Snapshot);

        assert_eq!(store.get_at(REPO, KEY, 2).await?, Some(replaced));
    }
}

test! {
    async fn accumulated_deltas_force_a_snapshot(storage) -> Result<()> {
        let options = StoreOptions {
            snapshot_factor: 2.0,
            ..StoreOptions::default()
        };
        let store = RevisionStore::open_with(storage, options).await?;

        let mut state = numbered_state(0..10);
        store.put(REPO, KEY, 1, &state).await?;
        assert_eq!(
            store.last_change(REPO, KEY).await?.unwrap().kind,
            ChangeKind::Snapshot
        );

        let mut kinds = Vec::new();
        let mut states = Vec::new();
        for i in 0..50usize {
            let ts = i as u64 + 2;
            state.insert(numbered(1000 + i));
            store.put(REPO, KEY, ts, &state).await?;
            kinds.push(store.last_change(REPO, KEY).await?.unwrap().kind);
            states.push((ts, state.clone()));
        }

        assert_eq!(kinds[0], ChangeKind::Delta);
        let forced = match kinds.iter().position(|k| *k == ChangeKind::Snapshot) {
            Some(at) => at,
            None => panic!("the growing delta chain never forced a snapshot"),
        };
        // The forced snapshot starts a fresh chain, so the next small change
        // is a delta again.
        assert_eq!(kinds[forced + 1], ChangeKind::Delta);

        // Reconstruction is exact before, at and after the chain boundary.
        for at in [forced - 1, forced, forced + 1, states.len() - 1] {
            let (ts, expected) = &states[at];
            assert_eq!(store.get_at(REPO, KEY, *ts).await?.as_ref(), Some(expected));
        }
    }
}

test! {
    async fn a_lower_snapshot_factor_snapshots_sooner(storage) -> Result<()> {
        let options = StoreOptions {
            snapshot_factor: 1.0,
            ..StoreOptions::default()
        };
        let store = RevisionStore::open_with(storage, options).await?;

        let mut state = numbered_state(0..10);
        store.put(REPO, KEY, 1, &state).await?;

        let mut deltas_before_snapshot = 0;
        for i in 0..50usize {
            state.insert(numbered(2000 + i));
            store.put(REPO, KEY, i as u64 + 2, &state).await?;
            match store.last_change(REPO, KEY).await?.unwrap().kind {
                ChangeKind::Delta => deltas_before_snapshot += 1,
                ChangeKind::Snapshot => break,
                ChangeKind::Delete => unreachable!(),
            }
        }
        // With factor 1 the chain may only grow to the base snapshot's size,
        // which a handful of patches already exceeds.
        assert!(deltas_before_snapshot < 25);
    }
}
