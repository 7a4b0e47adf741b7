use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;

use super::window::{ComicId, Window};
use super::xkcd::Comic;

/// Most unresolved ids claimed by a single resolve pass. A scroll of the
/// list triggers another pass, so a large window fills in 20 ids at a time.
pub const FETCH_CAP: usize = 20;

/// Ids fetched concurrently; batches run strictly one after another.
pub const BATCH_SIZE: usize = 5;

/// Per-id fetch lifecycle. Unresolved ids are simply absent from the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    InFlight,
    Resolved,
    Failed,
}

/// One fetch outcome: the id that was requested, and the comic if the
/// fetch produced one.
pub type FetchOutcome = (ComicId, Option<Comic>);

/// Session-local store of list comics and their resolution states.
///
/// Owned by the event loop; fetch tasks never touch it directly. They
/// publish settled batches over a channel and the loop calls [`apply`].
///
/// [`apply`]: ComicStore::apply
#[derive(Default)]
pub struct ComicStore {
    states: HashMap<ComicId, ResolutionState>,
    comics: HashMap<ComicId, Comic>,
}

impl ComicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: ComicId) -> Option<ResolutionState> {
        self.states.get(&id).copied()
    }

    pub fn get(&self, id: ComicId) -> Option<&Comic> {
        self.comics.get(&id)
    }

    /// Seeds a comic obtained outside the list path (the primary fetch).
    pub fn insert(&mut self, comic: Comic) {
        self.states.insert(comic.id, ResolutionState::Resolved);
        self.comics.insert(comic.id, comic);
    }

    /// Selects up to [`FETCH_CAP`] unresolved ids in the window and marks
    /// them in-flight before returning. Marking happens synchronously, so
    /// a second claim while fetches are still settling yields a disjoint
    /// list and no id is ever fetched twice concurrently. An empty result
    /// means there is nothing to do.
    pub fn claim(&mut self, window: Window) -> Vec<ComicId> {
        let ids: Vec<ComicId> = window
            .ids()
            .filter(|id| !self.states.contains_key(id))
            .take(FETCH_CAP)
            .collect();

        for &id in &ids {
            self.states.insert(id, ResolutionState::InFlight);
        }

        ids
    }

    /// Merges one settled batch. A comic is stored under the id the API
    /// returned, not the one requested; the requested id still transitions
    /// so it is never re-claimed. Failed is terminal until the caller
    /// resets the id with [`forget`].
    ///
    /// [`forget`]: ComicStore::forget
    pub fn apply(&mut self, batch: Vec<FetchOutcome>) {
        for (requested, outcome) in batch {
            match outcome {
                Some(comic) => {
                    self.states.insert(requested, ResolutionState::Resolved);
                    self.comics.insert(comic.id, comic);
                }
                None => {
                    self.states.insert(requested, ResolutionState::Failed);
                }
            }
        }
    }

    /// Returns a failed id to unresolved so the next claim retries it.
    pub fn forget(&mut self, id: ComicId) {
        if self.state(id) == Some(ResolutionState::Failed) {
            self.states.remove(&id);
        }
    }
}

/// Fetches claimed ids in fixed batches of [`BATCH_SIZE`]: all fetches in
/// a batch run concurrently, batch N+1 starts only after batch N has fully
/// settled, and `publish` is invoked once per settled batch so observers
/// see incremental progress. A failed fetch never aborts its siblings.
/// There is no cancellation; an in-flight batch always runs to completion.
pub async fn fetch_batches<F, Fut, P>(ids: Vec<ComicId>, fetch_one: F, mut publish: P)
where
    F: Fn(ComicId) -> Fut,
    Fut: Future<Output = Option<Comic>>,
    P: FnMut(Vec<FetchOutcome>),
{
    for batch in ids.chunks(BATCH_SIZE) {
        let settled = join_all(batch.iter().map(|&id| {
            let fut = fetch_one(id);
            async move { (id, fut.await) }
        }))
        .await;

        publish(settled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::window::select_window;
    use std::cell::RefCell;
    use std::collections::HashSet;

    fn comic(id: ComicId) -> Comic {
        Comic {
            id,
            title: format!("Comic {id}"),
            image_url: format!("https://imgs.xkcd.com/comics/{id}.png"),
            alt_text: String::new(),
            day: "1".into(),
            month: "1".into(),
            year: "2020".into(),
            transcript: String::new(),
            news: String::new(),
        }
    }

    #[test]
    fn claim_caps_work_per_pass() {
        let mut store = ComicStore::new();
        let window = select_window(250, 125);

        let ids = store.claim(window);
        assert_eq!(ids.len(), FETCH_CAP);
        assert_eq!(ids[0], window.start);
        for id in &ids {
            assert_eq!(store.state(*id), Some(ResolutionState::InFlight));
        }
    }

    #[test]
    fn second_claim_is_disjoint_and_then_empty() {
        let mut store = ComicStore::new();
        let window = Window { start: 1, end: 30 };

        let first = store.claim(window);
        let second = store.claim(window);
        let third = store.claim(window);

        assert_eq!(first.len(), 20);
        assert_eq!(second.len(), 10);
        assert!(third.is_empty());

        let all: HashSet<ComicId> = first.iter().chain(&second).copied().collect();
        assert_eq!(all.len(), 30);
    }

    #[test]
    fn claim_skips_resolved_and_failed_ids() {
        let mut store = ComicStore::new();
        store.insert(comic(2));
        store.apply(vec![(3, None)]);

        let ids = store.claim(Window { start: 1, end: 5 });
        assert_eq!(ids, vec![1, 4, 5]);
    }

    #[test]
    fn forget_makes_a_failed_id_claimable_again() {
        let mut store = ComicStore::new();
        store.apply(vec![(9, None)]);
        assert_eq!(store.state(9), Some(ResolutionState::Failed));

        store.forget(9);
        assert_eq!(store.state(9), None);
        assert_eq!(store.claim(Window { start: 9, end: 9 }), vec![9]);

        // In-flight ids are not forgettable.
        store.forget(9);
        assert_eq!(store.state(9), Some(ResolutionState::InFlight));
    }

    #[test]
    fn comic_is_stored_under_the_returned_id() {
        let mut store = ComicStore::new();
        store.claim(Window { start: 5, end: 5 });

        // The API answered with a different comic than requested.
        store.apply(vec![(5, Some(comic(6)))]);

        assert_eq!(store.state(5), Some(ResolutionState::Resolved));
        assert!(store.get(5).is_none());
        assert_eq!(store.get(6).unwrap().id, 6);
    }

    #[tokio::test]
    async fn batches_are_sequential_and_bounded() {
        let published: RefCell<Vec<Vec<FetchOutcome>>> = RefCell::new(Vec::new());

        let ids: Vec<ComicId> = (1..=12).collect();
        fetch_batches(
            ids,
            |id| async move { Some(comic(id)) },
            |batch| published.borrow_mut().push(batch),
        )
        .await;

        let published = published.into_inner();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].len(), 5);
        assert_eq!(published[1].len(), 5);
        assert_eq!(published[2].len(), 2);
        assert_eq!(published[2][1].0, 12);
    }

    #[tokio::test]
    async fn one_failure_never_aborts_its_batch() {
        let mut store = ComicStore::new();
        let ids = store.claim(Window { start: 1, end: 5 });

        let batches: RefCell<Vec<Vec<FetchOutcome>>> = RefCell::new(Vec::new());
        fetch_batches(
            ids,
            |id| async move { if id == 3 { None } else { Some(comic(id)) } },
            |batch| batches.borrow_mut().push(batch),
        )
        .await;

        for batch in batches.into_inner() {
            store.apply(batch);
        }

        for id in [1, 2, 4, 5] {
            assert_eq!(store.state(id), Some(ResolutionState::Resolved));
            assert!(store.get(id).is_some());
        }
        assert_eq!(store.state(3), Some(ResolutionState::Failed));
        assert!(store.get(3).is_none());
    }

    #[tokio::test]
    async fn reinvocation_while_in_flight_fetches_nothing_twice() {
        let mut store = ComicStore::new();
        let window = Window { start: 1, end: 40 };

        // First pass claims 20 ids; before any of them settle, a second
        // pass runs. It must claim the next 20, never the in-flight ones.
        let first = store.claim(window);
        let second = store.claim(window);

        let fetched: RefCell<Vec<ComicId>> = RefCell::new(Vec::new());
        let fetch = |id: ComicId| {
            fetched.borrow_mut().push(id);
            async move { Some(comic(id)) }
        };

        fetch_batches(first.clone(), &fetch, |_| {}).await;
        fetch_batches(second.clone(), &fetch, |_| {}).await;

        let fetched = fetched.into_inner();
        let unique: HashSet<ComicId> = fetched.iter().copied().collect();
        assert_eq!(fetched.len(), 40);
        assert_eq!(unique.len(), 40);
    }
}
