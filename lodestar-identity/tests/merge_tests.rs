use lodestar_identity::{
    BucketKind, IdentityCache, IdentityConfig, IdentityError, KeepExisting, RecordToken,
    ResourceData,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Which side of a merge the test hook keeps.
#[derive(Clone, Copy)]
enum Keep {
    Current,
    Candidate,
    Neither,
}

struct Harness {
    cache: IdentityCache,
    merges: Arc<AtomicUsize>,
    forgotten: Arc<Mutex<Vec<String>>>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_harness(keep: Keep) -> Harness {
    init_tracing();
    let forgotten = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&forgotten);
    let config = IdentityConfig::default().with_forget_hook(Arc::new(
        move |token: &RecordToken, _bucket: BucketKind| {
            sink.lock().unwrap().push(token.local_key().to_owned());
        },
    ));

    let merges = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&merges);
    let cache = IdentityCache::new(config).with_merge_hook(Arc::new(
        move |current: &RecordToken, candidate: &RecordToken, _data: &ResourceData| {
            counter.fetch_add(1, Ordering::SeqCst);
            match keep {
                Keep::Current => Some(current.clone()),
                Keep::Candidate => Some(candidate.clone()),
                Keep::Neither => None,
            }
        },
    ));

    Harness {
        cache,
        merges,
        forgotten,
    }
}

impl Harness {
    fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }
}

fn tag(id: &str) -> ResourceData {
    ResourceData::reference("tag", id)
}

// ── Duplicate external identity ──────────────────────────────────

#[test]
fn merge_keeping_existing_token() {
    let mut h = make_harness(Keep::Candidate);
    let existing = h.cache.get_or_create(tag("3")).unwrap();
    let draft = h.cache.create_for_new(&ResourceData::new("tag")).unwrap();

    let mut data = tag("3").with_lid(existing.local_key());
    let kept = h.cache.update(&draft, &mut data).unwrap();

    assert_eq!(kept, existing);
    assert_eq!(h.merges(), 1);
    assert_eq!(h.forgotten(), vec![draft.local_key().to_owned()]);
    assert!(!draft.is_live());
    assert_eq!(data.lid(), Some(existing.local_key()));

    assert_eq!(h.cache.peek(tag("3")).unwrap(), Some(existing.clone()));
    let all: Vec<RecordToken> = h.cache.tokens_of_type("tag").cloned().collect();
    assert_eq!(all, vec![existing]);
}

#[test]
fn merge_keeping_new_token() {
    let mut h = make_harness(Keep::Current);
    let existing = h.cache.get_or_create(tag("3")).unwrap();
    let draft = h.cache.create_for_new(&ResourceData::new("tag")).unwrap();

    let mut data = tag("3").with_lid(existing.local_key());
    let kept = h.cache.update(&draft, &mut data).unwrap();

    assert_eq!(kept, draft);
    assert_eq!(h.merges(), 1);
    assert_eq!(h.forgotten(), vec![existing.local_key().to_owned()]);
    assert!(!existing.is_live());
    assert_eq!(draft.external_key(), Some("3"));
    assert_eq!(data.lid(), Some(draft.local_key()));

    assert_eq!(h.cache.peek(tag("3")).unwrap(), Some(draft.clone()));
    let all: Vec<RecordToken> = h.cache.tokens_of_type("tag").cloned().collect();
    assert_eq!(all, vec![draft]);
}

#[test]
fn abandoned_local_key_aliases_the_survivor() {
    let mut h = make_harness(Keep::Current);
    let existing = h.cache.get_or_create(tag("3")).unwrap();
    let draft = h.cache.create_for_new(&ResourceData::new("tag")).unwrap();
    h.cache.update(&draft, &mut tag("3")).unwrap();

    let old_lid = existing.local_key();
    assert_eq!(h.cache.peek_local_key(old_lid), Some(&draft));
    let by_old_lid = ResourceData::new("tag").with_lid(old_lid);
    assert_eq!(h.cache.peek(by_old_lid.clone()).unwrap(), Some(draft.clone()));

    // Updates that still carry the old lid land on the survivor.
    let mut data = by_old_lid.clone();
    assert_eq!(h.cache.update(&draft, &mut data).unwrap(), draft);

    // Forgetting the survivor drops the alias too.
    h.cache.forget(&draft).unwrap();
    assert_eq!(h.cache.peek_local_key(old_lid), None);
    assert_eq!(h.cache.peek(by_old_lid).unwrap(), None);
}

#[test]
fn forgetting_merged_away_token_is_a_noop() {
    let mut h = make_harness(Keep::Current);
    let existing = h.cache.get_or_create(tag("3")).unwrap();
    let draft = h.cache.create_for_new(&ResourceData::new("tag")).unwrap();
    h.cache.update(&draft, &mut tag("3")).unwrap();

    assert!(!h.cache.forget(&existing).unwrap());
    assert!(draft.is_live());
    assert_eq!(h.forgotten().len(), 1);
}

#[test]
fn declined_merge_leaves_duplicates() {
    let mut h = make_harness(Keep::Neither);
    let existing = h.cache.get_or_create(tag("3")).unwrap();
    let draft = h.cache.create_for_new(&ResourceData::new("tag")).unwrap();

    let kept = h.cache.update(&draft, &mut tag("3")).unwrap();

    assert_eq!(kept, draft);
    assert_eq!(h.merges(), 1);
    assert!(h.forgotten().is_empty());
    assert!(existing.is_live());
    assert_eq!(existing.external_key(), Some("3"));
    assert_eq!(draft.external_key(), Some("3"));
    // The most recently assigned token answers for the external key.
    assert_eq!(h.cache.peek(tag("3")).unwrap(), Some(draft));
    assert_eq!(h.cache.len(), 2);
}

#[test]
fn no_merge_hook_means_no_merge() {
    let mut cache = IdentityCache::new(IdentityConfig::default());
    let existing = cache.get_or_create(tag("3")).unwrap();
    let draft = cache.create_for_new(&ResourceData::new("tag")).unwrap();

    let kept = cache.update(&draft, &mut tag("3")).unwrap();
    assert_eq!(kept, draft);
    assert!(existing.is_live());
    assert_eq!(cache.len(), 2);
}

#[test]
fn survivor_must_be_a_participant() {
    init_tracing();
    let mut cache = IdentityCache::new(IdentityConfig::default());
    let outsider = cache.get_or_create(tag("99")).unwrap();
    let chosen = outsider.clone();
    cache.set_merge_hook(Arc::new(
        move |_current: &RecordToken, _candidate: &RecordToken, _data: &ResourceData| {
            Some(chosen.clone())
        },
    ));
    cache.get_or_create(tag("3")).unwrap();
    let draft = cache.create_for_new(&ResourceData::new("tag")).unwrap();

    let result = cache.update(&draft, &mut tag("3"));
    assert_eq!(
        result,
        Err(IdentityError::UnknownSurvivor {
            local_key: outsider.local_key().to_owned()
        })
    );
}

#[test]
fn different_new_external_key_only_merges_on_hit() {
    let mut h = make_harness(Keep::Candidate);
    let five = h.cache.get_or_create(tag("5")).unwrap();

    // No token claims "6": nothing to merge, and "5" stays put.
    let kept = h.cache.update(&five, &mut ResourceData::with_only_id("6")).unwrap();
    assert_eq!(kept, five);
    assert_eq!(h.merges(), 0);
    assert_eq!(five.external_key(), Some("5"));

    // Now "7" exists: the update of "5" with id "7" is a merge candidate.
    let seven = h.cache.get_or_create(tag("7")).unwrap();
    let kept = h.cache.update(&five, &mut ResourceData::with_only_id("7")).unwrap();
    assert_eq!(kept, seven);
    assert_eq!(h.merges(), 1);
    assert!(!five.is_live());
}

// ── Same external key, two local keys ────────────────────────────

#[test]
fn duplicate_aliases_merge_on_later_update() {
    // Without a merge hook both tokens end up claiming external key "3".
    let mut cache = IdentityCache::new(IdentityConfig::default());
    let existing = cache.get_or_create(tag("3")).unwrap();
    let draft = cache.create_for_new(&ResourceData::new("tag")).unwrap();
    cache.update(&draft, &mut ResourceData::with_only_id("3")).unwrap();
    assert_eq!(draft.external_key(), Some("3"));

    let merges = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&merges);
    cache.set_merge_hook(Arc::new(
        move |_current: &RecordToken, candidate: &RecordToken, _data: &ResourceData| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(candidate.clone())
        },
    ));

    let mut data = tag("3").with_lid(existing.local_key());
    let kept = cache.update(&draft, &mut data).unwrap();

    assert_eq!(kept, existing);
    assert_eq!(merges.load(Ordering::SeqCst), 1);
    assert!(!draft.is_live());
    assert_eq!(cache.peek(tag("3")).unwrap(), Some(existing));
}

// ── Type reclassification ────────────────────────────────────────

#[test]
fn reclassified_type_merges_with_existing_token_of_new_type() {
    let mut h = make_harness(Keep::Candidate);
    let person = h.cache.get_or_create(ResourceData::reference("person", "1")).unwrap();
    let author = h.cache.get_or_create(ResourceData::reference("author", "1")).unwrap();

    let mut data = ResourceData::reference("author", "1").with_lid(person.local_key());
    let kept = h.cache.update(&person, &mut data).unwrap();

    assert_eq!(kept, author);
    assert_eq!(h.merges(), 1);
    assert!(!person.is_live());
    assert_eq!(data.lid(), Some(author.local_key()));
    // Both type indices now answer external key "1" with the survivor.
    assert_eq!(
        h.cache.peek(ResourceData::reference("person", "1")).unwrap(),
        Some(author.clone())
    );
    assert_eq!(
        h.cache.peek(ResourceData::reference("author", "1")).unwrap(),
        Some(author)
    );
}

#[test]
fn type_change_resolves_separate_identity() {
    let mut h = make_harness(Keep::Candidate);
    let person = h.cache.get_or_create(ResourceData::reference("person", "1")).unwrap();

    let kept = h.cache.update(&person, &mut ResourceData::new("author")).unwrap();

    assert_ne!(kept, person);
    assert_eq!(kept.resource_type(), "author");
    assert_eq!(h.merges(), 1);
    assert!(!person.is_live());
    assert_eq!(h.cache.tokens_of_type("person").count(), 0);
}

#[test]
fn declined_type_change_is_fatal() {
    let mut h = make_harness(Keep::Neither);
    let person = h.cache.get_or_create(ResourceData::reference("person", "1")).unwrap();

    let result = h.cache.update(&person, &mut ResourceData::new("author"));
    assert!(matches!(result, Err(IdentityError::TypeChanged { .. })));
    assert!(person.is_live());

    // The author token offered to the hook does not outlive the error.
    assert_eq!(h.merges(), 1);
    assert!(h.forgotten().is_empty());
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.tokens_of_type("author").count(), 0);
    assert!(h.cache.types().all(|t| t != "author"));
    assert_eq!(h.cache.peek(ResourceData::reference("author", "1")).unwrap(), None);
}

#[test]
fn type_change_keeping_old_type_leaves_no_trace() {
    let mut h = make_harness(Keep::Current);
    let person = h.cache.get_or_create(ResourceData::reference("person", "1")).unwrap();

    let result = h.cache.update(&person, &mut ResourceData::new("author"));
    assert!(matches!(result, Err(IdentityError::TypeChanged { .. })));
    assert_eq!(h.merges(), 1);
    assert!(person.is_live());
    assert!(h.forgotten().is_empty());
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.tokens_of_type("author").count(), 0);
}

#[test]
fn survivor_of_wrong_type_is_rejected_before_merging() {
    let mut h = make_harness(Keep::Current);
    let person = h.cache.get_or_create(ResourceData::reference("person", "1")).unwrap();
    let author = h.cache.get_or_create(ResourceData::reference("author", "1")).unwrap();

    let mut data = ResourceData::reference("author", "1").with_lid(person.local_key());
    let result = h.cache.update(&person, &mut data);

    assert_eq!(
        result,
        Err(IdentityError::TypeChanged {
            local_key: person.local_key().to_owned(),
            from: "person".to_owned(),
            to: "author".to_owned(),
        })
    );
    assert_eq!(h.merges(), 1);
    assert!(h.forgotten().is_empty());
    assert!(person.is_live());
    assert!(author.is_live());
    assert_eq!(data.lid(), Some(person.local_key()));
    assert_eq!(
        h.cache.peek(ResourceData::reference("author", "1")).unwrap(),
        Some(author)
    );
    assert_eq!(
        h.cache.peek(ResourceData::reference("person", "1")).unwrap(),
        Some(person)
    );
}

#[test]
fn unknown_new_external_key_skips_type_checks() {
    // A token that already has an external key and receives a different,
    // unknown one is not a merge candidate, even when the type changes too.
    let mut h = make_harness(Keep::Candidate);
    let person = h.cache.get_or_create(ResourceData::reference("person", "1")).unwrap();

    let result = h.cache.update(&person, &mut ResourceData::reference("author", "2"));
    assert!(matches!(result, Err(IdentityError::TypeChanged { .. })));
    assert_eq!(h.merges(), 0);
    assert!(person.is_live());
    assert_eq!(person.external_key(), Some("1"));
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.tokens_of_type("author").count(), 0);
}

// ── Stock hooks ──────────────────────────────────────────────────

#[test]
fn keep_existing_hook_keeps_prior_holder() {
    let mut cache =
        IdentityCache::new(IdentityConfig::default()).with_merge_hook(Arc::new(KeepExisting));
    let existing = cache.get_or_create(tag("3")).unwrap();
    let draft = cache.create_for_new(&ResourceData::new("tag")).unwrap();

    let kept = cache.update(&draft, &mut tag("3")).unwrap();
    assert_eq!(kept, existing);
    assert!(!draft.is_live());
}
