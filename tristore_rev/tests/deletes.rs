use tristore_rev::{
    storage, storage::Storage, test, ChangeKind, Error, Result, RevisionStore, StatementSet,
};

const REPO: u32 = 1;
const KEY: &str = "http://example.org/resource/1";

fn stmts(strs: &[&str]) -> StatementSet {
    strs.iter().map(|s| s.to_string()).collect()
}

test! {
    async fn delete_hides_the_key_but_not_its_history(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        let state = stmts(&["s1 .", "s2 ."]);

        store.put(REPO, KEY, 1, &state).await?;
        store.delete(REPO, KEY, 2).await?;

        assert_eq!(store.get_at(REPO, KEY, 2).await?, None);
        assert_eq!(store.get_at(REPO, KEY, 100).await?, None);
        assert_eq!(store.get_at(REPO, KEY, 1).await?, Some(state));

        let last = store.last_change(REPO, KEY).await?.unwrap();
        assert_eq!(last.kind, ChangeKind::Delete);
        assert_eq!(last.time, 2);
        assert_eq!(last.len, 0);
    }
}

test! {
    async fn put_after_delete_stores_a_snapshot(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        let s1 = stmts(&["s1 ."]);
        let s2 = stmts(&["s1 .", "s2 ."]);

        store.put(REPO, KEY, 1, &s1).await?;
        store.delete(REPO, KEY, 2).await?;
        store.put(REPO, KEY, 3, &s2).await?;

        // The preceding record is a delete, so there is no previous state to
        // patch against.
        let last = store.last_change(REPO, KEY).await?.unwrap();
        assert_eq!(last.kind, ChangeKind::Snapshot);

        assert_eq!(store.get_at(REPO, KEY, 3).await?, Some(s2));
        assert_eq!(store.get_at(REPO, KEY, 2).await?, None);
        assert_eq!(store.get_at(REPO, KEY, 1).await?, Some(s1));
    }
}

test! {
    async fn deleting_an_unknown_key_fails(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        match store.delete(REPO, KEY, 1).await {
            Err(Error::NotFound) => {}
            instead => panic!("expected a not-found error, but found {:?}", instead),
        }
    }
}

test! {
    async fn deleting_twice_fails(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        store.put(REPO, KEY, 1, &stmts(&["s1 ."])).await?;
        store.delete(REPO, KEY, 2).await?;
        match store.delete(REPO, KEY, 3).await {
            Err(Error::NotFound) => {}
            instead => panic!("expected a not-found error, but found {:?}", instead),
        }
        assert_eq!(store.timemap(REPO, KEY).await?, vec![2, 1]);
    }
}

test! {
    async fn delete_times_must_be_monotonic(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        store.put(REPO, KEY, 5, &stmts(&["s1 ."])).await?;
        match store.delete(REPO, KEY, 5).await {
            Err(Error::NonMonotonic { last: 5, requested: 5 }) => {}
            instead => panic!("expected a non-monotonic error, but found {:?}", instead),
        }
        match store.delete(REPO, KEY, 4).await {
            Err(Error::NonMonotonic { last: 5, requested: 4 }) => {}
            instead => panic!("expected a non-monotonic error, but found {:?}", instead),
        }
        assert_eq!(store.timemap(REPO, KEY).await?, vec![5]);
    }
}

test! {
    async fn deletes_survive_a_reopen(storage) -> Result<()> {
        let store_name = String::from(storage.name());
        let store = RevisionStore::open(storage).await?;
        let state = stmts(&["s1 ."]);

        store.put(REPO, KEY, 1, &state).await?;
        store.delete(REPO, KEY, 2).await?;
        drop(store);

        let storage = storage::open(&store_name).await?;
        let store = RevisionStore::open(storage).await?;
        assert_eq!(store.get_at(REPO, KEY, 2).await?, None);
        assert_eq!(store.get_at(REPO, KEY, 1).await?, Some(state));
        assert_eq!(store.timemap(REPO, KEY).await?, vec![2, 1]);
    }
}
