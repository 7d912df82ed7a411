use crate::runtime::{Application, EventId};
use crate::time::SimTime;
use fxhash::FxHashMap;

///
/// An entry of the future event set.
///
/// The `id` is the insertion order counter, which doubles as the stable
/// FIFO tiebreak and as the handle for arbitrary removal.
///
pub(crate) struct EventNode<A>
where
    A: Application,
{
    pub(crate) time: SimTime,
    pub(crate) priority: i16,
    pub(crate) id: EventId,
    pub(crate) event: A::EventSet,
}

impl<A> EventNode<A>
where
    A: Application,
{
    /// Strict ordering by (arrival time, scheduling priority, insertion order).
    fn before(&self, other: &Self) -> bool {
        (self.time, self.priority, self.id) < (other.time, other.priority, other.id)
    }
}

///
/// The priority store of all pending events.
///
/// A binary heap over (time, priority, insertion-order), augmented with an
/// id-indexed back-map so that any scheduled event can be removed again in
/// O(log n) (required for event cancellation).
///
pub(crate) struct FutureEventSet<A>
where
    A: Application,
{
    heap: Vec<EventNode<A>>,
    pos: FxHashMap<EventId, usize>,

    counter: EventId,
    last_event_time: SimTime,
}

impl<A> FutureEventSet<A>
where
    A: Application,
{
    pub(crate) fn new(start_time: SimTime) -> Self {
        Self {
            heap: Vec::with_capacity(64),
            pos: FxHashMap::default(),
            counter: 0,
            last_event_time: start_time,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The number of events ever inserted.
    pub(crate) fn counter(&self) -> usize {
        self.counter as usize
    }

    /// The (time, priority) of the next event without removing it.
    pub(crate) fn peek(&self) -> Option<(SimTime, i16)> {
        self.heap.first().map(|node| (node.time, node.priority))
    }

    ///
    /// Inserts an event, assigning the next insertion-order counter.
    /// Returns the id under which the event can be removed again.
    ///
    /// # Panics
    ///
    /// Panics if the event is scheduled before the last dispatched event,
    /// since simulation time is monotone.
    ///
    pub(crate) fn add(&mut self, time: SimTime, priority: i16, event: A::EventSet) -> EventId {
        assert!(
            time >= self.last_event_time,
            "cannot schedule an event into the past ({} < {})",
            time,
            self.last_event_time
        );

        let id = self.counter;
        self.counter += 1;

        self.heap.push(EventNode { time, priority, id, event });
        self.pos.insert(id, self.heap.len() - 1);
        self.sift_up(self.heap.len() - 1);
        id
    }

    ///
    /// Removes and returns the next event in (time, priority, order).
    ///
    /// The caller must guarantee that at least one event exists.
    ///
    pub(crate) fn fetch_next(&mut self) -> EventNode<A> {
        debug_assert!(!self.heap.is_empty());
        let node = self.remove_at(0);
        self.last_event_time = node.time;
        node
    }

    /// Removes the event with the given id, if it is still pending.
    pub(crate) fn remove(&mut self, id: EventId) -> Option<EventNode<A>> {
        let idx = *self.pos.get(&id)?;
        Some(self.remove_at(idx))
    }

    fn remove_at(&mut self, idx: usize) -> EventNode<A> {
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        let node = self.heap.pop().expect("heap underflow");
        self.pos.remove(&node.id);

        if idx < self.heap.len() {
            self.pos.insert(self.heap[idx].id, idx);
            self.sift_down(idx);
            self.sift_up(idx);
        }
        node
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx].before(&self.heap[parent]) {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let mut smallest = idx;
            for child in [2 * idx + 1, 2 * idx + 2] {
                if child < self.heap.len() && self.heap[child].before(&self.heap[smallest]) {
                    smallest = child;
                }
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos.insert(self.heap[a].id, a);
        self.pos.insert(self.heap[b].id, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Application, EventSet, Runtime};

    struct App;
    impl Application for App {
        type EventSet = usize;
        type Lifecycle = ();
    }
    impl EventSet<App> for usize {
        fn handle(self, _rt: &mut Runtime<App>) {}
    }

    fn fes() -> FutureEventSet<App> {
        FutureEventSet::new(SimTime::ZERO)
    }

    #[test]
    fn orders_by_time() {
        let mut fes = fes();
        fes.add(3.0.into(), 0, 3);
        fes.add(1.0.into(), 0, 1);
        fes.add(2.0.into(), 0, 2);

        let order: Vec<_> = (0..3).map(|_| fes.fetch_next().event).collect();
        assert_eq!(order, [1, 2, 3]);
    }

    #[test]
    fn equal_time_is_fifo() {
        let mut fes = fes();
        for value in 0..10 {
            fes.add(5.0.into(), 0, value);
        }
        let order: Vec<_> = (0..10).map(|_| fes.fetch_next().event).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn priority_breaks_time_ties() {
        let mut fes = fes();
        fes.add(5.0.into(), 10, 1);
        fes.add(5.0.into(), 0, 2);
        fes.add(5.0.into(), 10, 3);

        let order: Vec<_> = (0..3).map(|_| fes.fetch_next().event).collect();
        assert_eq!(order, [2, 1, 3]);
    }

    #[test]
    fn removal_by_id() {
        let mut fes = fes();
        let _a = fes.add(1.0.into(), 0, 1);
        let b = fes.add(2.0.into(), 0, 2);
        let _c = fes.add(3.0.into(), 0, 3);

        let removed = fes.remove(b).expect("event should be pending");
        assert_eq!(removed.event, 2);
        assert!(fes.remove(b).is_none());

        let order: Vec<_> = (0..2).map(|_| fes.fetch_next().event).collect();
        assert_eq!(order, [1, 3]);
        assert!(fes.is_empty());
    }

    #[test]
    fn removal_keeps_heap_valid() {
        let mut fes = fes();
        let ids: Vec<_> = (0..50).map(|i| fes.add((f64::from(i % 7)).into(), 0, i as usize)).collect();
        for id in ids.iter().step_by(3) {
            fes.remove(*id);
        }

        let mut last = (SimTime::ZERO, 0, 0);
        while !fes.is_empty() {
            let node = fes.fetch_next();
            let key = (node.time, node.priority, node.id);
            assert!(key > last || last == (SimTime::ZERO, 0, 0));
            last = key;
        }
    }

    #[test]
    #[should_panic(expected = "cannot schedule an event into the past")]
    fn rejects_past_events() {
        let mut fes = fes();
        fes.add(5.0.into(), 0, 1);
        fes.fetch_next();
        fes.add(1.0.into(), 0, 2);
    }
}
