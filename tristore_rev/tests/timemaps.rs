use tristore_rev::{
    storage::Storage, test, Result, RevisionStore, StatementSet, StoreOptions,
};

const REPO: u32 = 1;

fn stmts(strs: &[&str]) -> StatementSet {
    strs.iter().map(|s| s.to_string()).collect()
}

fn key(i: usize) -> String {
    format!("http://example.org/resource/{}", i)
}

async fn live_at<S: Storage>(store: &RevisionStore<S>, ts: u64) -> Result<Vec<String>> {
    let mut keys = store.index_at(REPO, ts, 1).await?;
    keys.sort();
    Ok(keys)
}

test! {
    async fn timemap_lists_change_times_newest_first(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        let key = key(1);

        store.put(REPO, &key, 10, &stmts(&["s1 ."])).await?;
        store.put(REPO, &key, 20, &stmts(&["s2 ."])).await?;
        store.put(REPO, &key, 30, &stmts(&["s3 ."])).await?;
        store.delete(REPO, &key, 40).await?;

        assert_eq!(store.timemap(REPO, &key).await?, vec![40, 30, 20, 10]);
        assert_eq!(store.timemap(REPO, "http://example.org/unknown").await?, Vec::<u64>::new());
        assert_eq!(store.timemap(2, &key).await?, Vec::<u64>::new());
    }
}

test! {
    async fn index_lists_keys_live_at_a_time(storage) -> Result<()> {
        let store = RevisionStore::open(storage).await?;
        for i in 0..5 {
            store.put(REPO, &key(i), 1, &stmts(&["s1 ."])).await?;
        }
        store.delete(REPO, &key(2), 2).await?;
        store.put(REPO, &key(5), 3, &stmts(&["s2 ."])).await?;
        store.put(2, &key(9), 1, &stmts(&["s3 ."])).await?;

        // Before any write the index is empty.
        assert_eq!(live_at(&store, 0).await?, Vec::<String>::new());
        // At ts 1 all five keys are live.
        let expected: Vec<String> = (0..5).map(key).collect();
        assert_eq!(live_at(&store, 1).await?, expected);
        // The deleted key disappears from ts 2 on, a later key appears at 3.
        let expected: Vec<String> = vec![key(0), key(1), key(3), key(4)];
        assert_eq!(live_at(&store, 2).await?, expected);
        let expected: Vec<String> = vec![key(0), key(1), key(3), key(4), key(5)];
        assert_eq!(live_at(&store, 3).await?, expected);

        // Repos are isolated.
        assert_eq!(store.index_at(2, 3, 1).await?, vec![key(9)]);
    }
}

test! {
    async fn index_pages_through_the_keys(storage) -> Result<()> {
        let options = StoreOptions {
            index_page_size: 2,
            ..StoreOptions::default()
        };
        let store = RevisionStore::open_with(storage, options).await?;
        for i in 0..5 {
            store.put(REPO, &key(i), 1, &stmts(&["s1 ."])).await?;
        }

        let mut seen = Vec::new();
        let mut pages = 0;
        for page in 1.. {
            let keys = store.index_at(REPO, 1, page).await?;
            if keys.is_empty() {
                break;
            }
            assert!(keys.len() <= 2);
            pages += 1;
            seen.extend(keys);
        }
        assert_eq!(pages, 3);
        seen.sort();
        let expected: Vec<String> = (0..5).map(key).collect();
        assert_eq!(seen, expected);
    }
}
