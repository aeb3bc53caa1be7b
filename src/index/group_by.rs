//! Cached group-by aggregation (§4.8): maintains a derived `map<K, A>` by
//! re-folding each affected key's bucket whenever it changes, rather than
//! threading a true incremental delta through an `Aggregator` trait. This
//! trades some update throughput for a much smaller, obviously-correct
//! implementation — recorded as an open-question resolution in this
//! crate's design notes rather than left unstated.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct CachedGroupBy<R, K, A> {
    name: String,
    hint: IndexHint,
    key_fn: Box<dyn Fn(&R) -> Option<K> + Send + Sync>,
    fold: Box<dyn Fn(&[R]) -> A + Send + Sync>,
    buckets: Mutex<HashMap<K, (Vec<R>, A)>>,
}

impl<R, K, A> std::fmt::Debug for CachedGroupBy<R, K, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedGroupBy")
            .field("name", &self.name)
            .field("buckets", &self.buckets.lock().unwrap().len())
            .finish()
    }
}

impl<R, K, A> CachedGroupBy<R, K, A>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
    A: Clone + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        key_fn: impl Fn(&R) -> Option<K> + Send + Sync + 'static,
        fold: impl Fn(&[R]) -> A + Send + Sync + 'static,
    ) -> Self {
        CachedGroupBy {
            name: name.into(),
            hint: IndexHint::default(),
            key_fn: Box::new(key_fn),
            fold: Box::new(fold),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hint(mut self, hint: IndexHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn get(&self, key: &K) -> Option<A> {
        self.buckets.lock().unwrap().get(key).map(|(_, agg)| agg.clone())
    }
}

impl<R, K, A> Index<R> for CachedGroupBy<R, K, A>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
    A: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut buckets = self.buckets.lock().unwrap();
        let mut touched: Vec<K> = Vec::new();

        for change in changes {
            if let Some(old) = &change.old {
                if let Some(key) = (self.key_fn)(old) {
                    if let Some((records, _)) = buckets.get_mut(&key) {
                        records.retain(|r| r != old);
                    }
                    touched.push(key);
                }
            }
            if let Some(new) = &change.new {
                if let Some(key) = (self.key_fn)(new) {
                    buckets.entry(key.clone()).or_insert_with(|| (Vec::new(), (self.fold)(&[])));
                    buckets.get_mut(&key).unwrap().0.push(new.clone());
                    touched.push(key);
                }
            }
        }

        for key in touched {
            if let Some((records, agg)) = buckets.get_mut(&key) {
                *agg = (self.fold)(records);
            }
        }
        buckets.retain(|_, (records, _)| !records.is_empty());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct Order {
        id: u64,
        customer: String,
        amount: i64,
    }

    #[test]
    fn aggregate_reflects_current_bucket_contents() {
        let idx: CachedGroupBy<Order, String, i64> = CachedGroupBy::new(
            "spend_by_customer",
            |o| Some(o.customer.clone()),
            |orders| orders.iter().map(|o| o.amount).sum(),
        );
        idx.update_all(&[
            Change::add(Order { id: 1, customer: "alice".into(), amount: 10 }),
            Change::add(Order { id: 2, customer: "alice".into(), amount: 5 }),
        ])
        .unwrap();
        assert_eq!(idx.get(&"alice".to_string()), Some(15));
    }

    #[test]
    fn removing_the_last_record_drops_the_bucket() {
        let idx: CachedGroupBy<Order, String, i64> = CachedGroupBy::new(
            "spend_by_customer",
            |o| Some(o.customer.clone()),
            |orders| orders.iter().map(|o| o.amount).sum(),
        );
        let o = Order { id: 1, customer: "alice".into(), amount: 10 };
        idx.update_all(&[Change::add(o.clone())]).unwrap();
        idx.update_all(&[Change::remove(o)]).unwrap();
        assert_eq!(idx.get(&"alice".to_string()), None);
    }
}
