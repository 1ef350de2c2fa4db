//! Property-based тесты сопоставления путей и реестра подписок.

use std::collections::BTreeSet;

use proptest::prelude::*;
use volna::{matches, LocalSink, Message, Path, Pattern, Sink, SubscriptionRegistry};

const PROPTEST_CASES: u32 = 256;

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,6}"
}

fn segments(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..=max)
}

fn join(parts: &[String]) -> String {
    format!("/{}", parts.join("/"))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: PROPTEST_CASES,
        ..ProptestConfig::default()
    })]

    /// Точный шаблон совпадает только с тем же путём.
    #[test]
    fn prop_literal_matches_itself(a in segments(5), b in segments(5)) {
        let pattern = Pattern::parse(&join(&a)).unwrap();
        prop_assert!(matches(&pattern, &Path::parse(&join(&a)).unwrap()));
        prop_assert_eq!(matches(&pattern, &Path::parse(&join(&b)).unwrap()), a == b);
    }

    /// `*` заменяет ровно один сегмент в любой позиции.
    #[test]
    fn prop_single_wildcard(parts in segments(5), pos in 0usize..5, extra in segment()) {
        let pos = pos % parts.len();
        let mut pattern_parts = parts.clone();
        pattern_parts[pos] = "*".to_string();
        let pattern = Pattern::parse(&join(&pattern_parts)).unwrap();

        prop_assert!(matches(&pattern, &Path::parse(&join(&parts)).unwrap()));

        let mut longer = parts.clone();
        longer.push(extra);
        prop_assert!(!matches(&pattern, &Path::parse(&join(&longer)).unwrap()));

        if parts.len() > 1 {
            let shorter = &parts[..parts.len() - 1];
            prop_assert!(!matches(&pattern, &Path::parse(&join(shorter)).unwrap()));
        }
    }

    /// `**` в конце совпадает с любым продолжением префикса.
    #[test]
    fn prop_multi_wildcard_prefix(prefix in segments(3), tail in prop::collection::vec(segment(), 0..4)) {
        let pattern = Pattern::parse(&format!("{}/**", join(&prefix))).unwrap();
        let mut full = prefix.clone();
        full.extend(tail);
        prop_assert!(matches(&pattern, &Path::parse(&join(&full)).unwrap()));

        let mut other = prefix.clone();
        other[0] = format!("{}x", other[0]);
        prop_assert!(!matches(&pattern, &Path::parse(&join(&other)).unwrap()));
    }

    /// `**` не в конце шаблона отклоняется.
    #[test]
    fn prop_multi_wildcard_must_be_last(head in segments(3), tail in segments(3)) {
        let raw = format!("{}/**{}", join(&head), join(&tail));
        prop_assert!(Pattern::parse(&raw).is_err());
    }

    /// После отписки подписка не находится ни одним сообщением, а
    /// оставшиеся находятся по-прежнему.
    #[test]
    fn prop_registry_no_resurrection(
        paths in prop::collection::vec(segments(3), 1..8),
        remove_mask in prop::collection::vec(any::<bool>(), 8),
    ) {
        let registry = SubscriptionRegistry::new();
        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for parts in &paths {
            let (sink, rx) = LocalSink::channel(4);
            receivers.push(rx);
            let handle = registry.subscribe(Pattern::parse(&join(parts)).unwrap(), Sink::Local(sink), None);
            handles.push(handle);
        }

        let mut removed = BTreeSet::new();
        for (handle, remove) in handles.iter().zip(&remove_mask) {
            if *remove {
                prop_assert!(registry.unsubscribe(*handle).is_some());
                removed.insert(*handle);
            }
        }

        for parts in &paths {
            let msg = Message::new(Path::parse(&join(parts)).unwrap(), Vec::<u8>::new());
            let found: BTreeSet<_> = registry
                .matching_sinks(&msg)
                .iter()
                .map(|s| s.handle())
                .collect();
            prop_assert!(found.is_disjoint(&removed));
            for (handle, other) in handles.iter().zip(&paths) {
                if other == parts && !removed.contains(handle) {
                    prop_assert!(found.contains(handle));
                }
            }
        }
        prop_assert_eq!(registry.len(), handles.len() - removed.len());
    }
}
