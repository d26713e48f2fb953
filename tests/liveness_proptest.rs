use consing_map::{Config, ConsingMap, Interned};
use proptest::prelude::*;

// Model operations on ConsingMap and assert entry liveness matches outstanding handles.
proptest! {
    #[test]
    fn prop_consing_liveness(keys in 1usize..=6, ops in proptest::collection::vec((0u8..=4u8, 0usize..100usize), 1..200)) {
        let config = Config::builder().background_sweep(false).build().unwrap();
        let map: ConsingMap<String> = ConsingMap::with_config(config);
        let mut live: Vec<Vec<Interned<String>>> = vec![Vec::new(); keys];

        for (op, raw_k) in ops {
            let k = raw_k % keys;
            let key = format!("k{}", k);
            match op {
                // Intern a fresh but equal candidate
                0 => {
                    let interned = map.intern(key.clone());
                    prop_assert_eq!(&*interned, &key);
                    if let Some(existing) = live[k].first() {
                        prop_assert!(Interned::ptr_eq(existing, &interned));
                    }
                    live[k].push(interned);
                }
                // Lookup only finds what is still held
                1 => {
                    let found = map.lookup(key.as_str());
                    prop_assert_eq!(found.is_some(), !live[k].is_empty());
                    if let Some(found) = found {
                        prop_assert!(Interned::ptr_eq(&live[k][0], &found));
                    }
                }
                // Drop one handle
                2 => {
                    live[k].pop();
                }
                // Drop every handle for this key
                3 => {
                    live[k].clear();
                }
                // Sweep now
                4 => {
                    map.sweep();
                }
                _ => unreachable!(),
            }
        }

        map.sweep();
        let expected_len = live.iter().filter(|v| !v.is_empty()).count();
        prop_assert_eq!(map.len(), expected_len);
    }
}
