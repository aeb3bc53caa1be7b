//! End-to-end coverage for the cache's transactional update path (§4.7),
//! combining multiple index families in one cache rather than testing
//! each index in isolation.

use kairos_rt::cache::{Cache, Change, Identified};
use kairos_rt::index::many_to_many::ManyToManyIndex;
use kairos_rt::index::one_to_one::OneToOneIndex;

#[derive(Debug, Clone, PartialEq)]
struct Account {
    id: u64,
    email: String,
    roles: Vec<String>,
}

impl Identified for Account {
    type Id = u64;
    fn id(&self) -> u64 {
        self.id
    }
}

fn account(id: u64, email: &str, roles: &[&str]) -> Account {
    Account {
        id,
        email: email.to_string(),
        roles: roles.iter().map(|s| s.to_string()).collect(),
    }
}

fn cache_with_indices() -> Cache<Account> {
    Cache::new(vec![
        Box::new(OneToOneIndex::new("by_email", |a: &Account| Some(a.email.clone()))),
        Box::new(ManyToManyIndex::new("by_role", |a: &Account| a.roles.clone())),
    ])
}

#[test]
fn a_batch_spanning_two_index_families_commits_to_both() {
    let cache = cache_with_indices();
    cache
        .add_all(vec![
            account(1, "a@example.com", &["admin", "billing"]),
            account(2, "b@example.com", &["billing"]),
        ])
        .unwrap();

    assert_eq!(cache.size().unwrap(), 2);
    assert_eq!(cache.get(&1).unwrap().unwrap().email, "a@example.com");
}

#[test]
fn a_colliding_email_rolls_back_the_whole_batch_including_the_untouched_index() {
    let cache = cache_with_indices();
    cache.add(account(1, "a@example.com", &["admin"])).unwrap();

    let batch = vec![
        Change::add(account(2, "new@example.com", &["billing"])),
        Change::add(account(3, "a@example.com", &["billing"])),
    ];
    assert!(cache.update_all(batch).is_err());

    assert_eq!(cache.size().unwrap(), 1);
    assert!(cache.get(&2).unwrap().is_none());
    assert!(cache.get(&3).unwrap().is_none());
}

#[test]
fn update_changes_identity_and_index_membership_together() {
    let cache = cache_with_indices();
    let before = account(1, "a@example.com", &["admin"]);
    cache.add(before.clone()).unwrap();

    let after = account(1, "a2@example.com", &["admin", "billing"]);
    cache.update(before, after.clone()).unwrap();

    assert_eq!(cache.get(&1).unwrap().unwrap(), after);
}

#[test]
fn clear_empties_the_store_and_every_index() {
    let cache = cache_with_indices();
    cache
        .add_all(vec![
            account(1, "a@example.com", &["admin"]),
            account(2, "b@example.com", &["billing"]),
        ])
        .unwrap();
    cache.clear().unwrap();
    assert_eq!(cache.size().unwrap(), 0);
}
