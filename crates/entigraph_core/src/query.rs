//! Declarative queries over one transaction's view.
//!
//! A [`Query`] is an ordered collection of [`EntityView`]s loaded from a
//! single snapshot. Every combinator is a pure in-memory transformation, so
//! predicates may freely inspect properties and link sets.
//!
//! ```rust
//! # use entigraph_core::{CoreResult, Transaction};
//! # fn demo(txn: &Transaction<'_>) -> CoreResult<()> {
//! let twentieth_century = txn
//!     .query("Book")?
//!     .filter(|b| b.integer("year").is_some_and(|y| (1900..1999).contains(&y)))
//!     .sorted_by(|b| b.integer("year"));
//! for book in &twentieth_century {
//!     println!("{}", book.string("title").unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

use crate::entity::EntityId;
use crate::error::CoreResult;
use crate::handle::EntityView;
use crate::transaction::Transaction;
use std::collections::HashSet;

/// An ordered result set bound to the transaction that produced it.
#[derive(Debug, Clone)]
pub struct Query<'t, 's> {
    txn: &'t Transaction<'s>,
    items: Vec<EntityView<'s>>,
}

impl<'t, 's> Query<'t, 's> {
    /// Every live entity of `type_name`, in creation order.
    pub fn all(txn: &'t Transaction<'s>, type_name: &str) -> CoreResult<Self> {
        let ids = txn.scan(type_name)?.collect();
        Self::from_ids(txn, ids)
    }

    /// The given entities, in the given order.
    pub fn from_ids(txn: &'t Transaction<'s>, ids: Vec<EntityId>) -> CoreResult<Self> {
        let items = ids
            .into_iter()
            .map(|id| txn.entity(id))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { txn, items })
    }

    /// Keeps entities matching `predicate`.
    #[must_use]
    pub fn filter(mut self, mut predicate: impl FnMut(&EntityView<'s>) -> bool) -> Self {
        self.items.retain(|view| predicate(view));
        self
    }

    /// Like [`Query::filter`] for predicates that read through the
    /// transaction and can fail.
    pub fn try_filter(
        self,
        mut predicate: impl FnMut(&Transaction<'s>, &EntityView<'s>) -> CoreResult<bool>,
    ) -> CoreResult<Self> {
        let txn = self.txn;
        let mut items = Vec::with_capacity(self.items.len());
        for view in self.items {
            if predicate(txn, &view)? {
                items.push(view);
            }
        }
        Ok(Self { txn, items })
    }

    /// Keeps entities whose `link` contains `target`.
    #[must_use]
    pub fn linked_to(self, link: &str, target: EntityId) -> Self {
        self.filter(|view| view.has_link(link, target))
    }

    /// Stable ascending sort. `None` keys sort first.
    #[must_use]
    pub fn sorted_by<K: Ord>(mut self, mut key: impl FnMut(&EntityView<'s>) -> K) -> Self {
        self.items.sort_by_key(|view| key(view));
        self
    }

    /// Stable descending sort.
    #[must_use]
    pub fn sorted_by_desc<K: Ord>(mut self, mut key: impl FnMut(&EntityView<'s>) -> K) -> Self {
        self.items.sort_by(|a, b| key(b).cmp(&key(a)));
        self
    }

    /// Maps each entity to related ids and loads the union, dropping
    /// duplicates and keeping first-seen order.
    pub fn flat_map_distinct<I>(self, mut f: impl FnMut(&EntityView<'s>) -> I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = EntityId>,
    {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for view in &self.items {
            for id in f(view) {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        Self::from_ids(self.txn, ids)
    }

    /// Number of entities.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Whether the result is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the result contains `id`.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.items.iter().any(|view| view.id() == id)
    }

    /// The first entity, if any.
    #[must_use]
    pub fn first(&self) -> Option<&EntityView<'s>> {
        self.items.first()
    }

    /// Ids in result order.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        self.items.iter().map(EntityView::id).collect()
    }

    /// The views in result order.
    #[must_use]
    pub fn views(&self) -> &[EntityView<'s>] {
        &self.items
    }

    /// Consumes the query, returning its views.
    #[must_use]
    pub fn into_vec(self) -> Vec<EntityView<'s>> {
        self.items
    }

    /// Iterates over the views.
    pub fn iter(&self) -> std::slice::Iter<'_, EntityView<'s>> {
        self.items.iter()
    }
}

impl<'s> IntoIterator for Query<'_, 's> {
    type Item = EntityView<'s>;
    type IntoIter = std::vec::IntoIter<EntityView<'s>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'q, 's> IntoIterator for &'q Query<'_, 's> {
    type Item = &'q EntityView<'s>;
    type IntoIter = std::slice::Iter<'q, EntityView<'s>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
