//! Ordered play queue with loop and shuffle policies.
//!
//! ## Design
//! - Entries are shared descriptors; the queue never resolves anything itself.
//! - The cursor is `None` only when the queue is empty, otherwise it is a valid index.
//! - Shuffle uses a fixed permutation with the current entry first, so the current entry is
//!   never its own successor (unless it is the only one). The permutation is recomputed
//!   whenever the underlying sequence changes.
//! - Removing the current entry moves the cursor to its successor (the sequential neighbour,
//!   or the next entry of the permutation when shuffled) and marks the queue *detached*: the
//!   next forward step returns that successor instead of skipping past it.
//! - `next`/`previous` follow the loop mode as-is and drive automatic advance. The user steps
//!   `skip_next`/`skip_previous` treat loop `one` like `all`, so they always move on.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use media_engine_types::{LoopMode, QueueSnapshot, SharedDescriptor};

pub struct PlayQueue {
    items: Vec<SharedDescriptor>,
    cursor: Option<usize>,
    detached: bool,
    loop_mode: LoopMode,
    shuffle: Option<ShuffleOrder>,
    seed: u64,
    generation: u64,
}

/// Permutation of item indices. `order[position]` is always the cursor.
struct ShuffleOrder {
    order: Vec<usize>,
    position: usize,
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new(rand::random())
    }
}

impl PlayQueue {
    /// Empty queue whose shuffle permutations derive from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
            detached: false,
            loop_mode: LoopMode::Off,
            shuffle: None,
            seed,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle.is_some()
    }

    pub fn items(&self) -> &[SharedDescriptor] {
        &self.items
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<&SharedDescriptor> {
        self.cursor.and_then(|index| self.items.get(index))
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    /// Insert `descriptor` at `position` (clamped; `None` appends). Returns the index used.
    ///
    /// Inserting at or before the cursor shifts the cursor so it keeps its entry.
    pub fn enqueue(&mut self, descriptor: SharedDescriptor, position: Option<usize>) -> usize {
        let at = position.unwrap_or(self.items.len()).min(self.items.len());
        self.items.insert(at, descriptor);
        self.cursor = match self.cursor {
            None => Some(at),
            Some(cursor) if at <= cursor => Some(cursor + 1),
            keep => keep,
        };
        self.sequence_changed();
        at
    }

    /// Remove the entry at `index`.
    pub fn remove(&mut self, index: usize) -> Option<SharedDescriptor> {
        if index >= self.items.len() {
            return None;
        }
        let shuffled_successor = match (&self.shuffle, self.cursor) {
            (Some(shuffle), Some(cursor)) if cursor == index => {
                Some(shuffle.order.get(shuffle.position + 1).copied())
            }
            _ => None,
        };
        let removed = self.items.remove(index);
        let len = self.items.len();
        self.cursor = match self.cursor {
            _ if len == 0 => {
                self.detached = false;
                None
            }
            Some(cursor) if index < cursor => Some(cursor - 1),
            Some(cursor) if index == cursor => match shuffled_successor {
                Some(Some(successor)) => {
                    self.detached = true;
                    Some(if successor > index { successor - 1 } else { successor })
                }
                // Current was last in the permutation.
                Some(None) => {
                    self.detached = false;
                    Some(cursor.min(len - 1))
                }
                None if cursor < len => {
                    // Successor slid into the cursor slot.
                    self.detached = true;
                    Some(cursor)
                }
                None => {
                    self.detached = false;
                    Some(len - 1)
                }
            },
            keep => keep,
        };
        self.sequence_changed();
        Some(removed)
    }

    /// Move the entry at `from` to `to`; the cursor follows its entry.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let len = self.items.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        if let Some(cursor) = self.cursor {
            self.cursor = Some(if cursor == from {
                to
            } else if from < cursor && to >= cursor {
                cursor - 1
            } else if from > cursor && to <= cursor {
                cursor + 1
            } else {
                cursor
            });
        }
        self.sequence_changed();
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = None;
        self.detached = false;
        self.sequence_changed();
    }

    /// Point the cursor at `index` and return that entry.
    pub fn move_to(&mut self, index: usize) -> Option<SharedDescriptor> {
        let item = self.items.get(index)?.clone();
        self.cursor = Some(index);
        self.detached = false;
        if let Some(shuffle) = self.shuffle.as_mut() {
            if let Some(position) = shuffle.order.iter().position(|&i| i == index) {
                shuffle.position = position;
            }
        }
        Some(item)
    }

    /// Advance the cursor according to the loop and shuffle policies.
    ///
    /// Returns `None` at the end of the queue with loop off; the cursor is left unchanged.
    pub fn next(&mut self) -> Option<SharedDescriptor> {
        self.step(true, self.loop_mode)
    }

    /// Step the cursor back according to the loop and shuffle policies.
    pub fn previous(&mut self) -> Option<SharedDescriptor> {
        self.step(false, self.loop_mode)
    }

    /// Explicit skip forward: like [`PlayQueue::next`], but loop `one` wraps like `all`.
    pub fn skip_next(&mut self) -> Option<SharedDescriptor> {
        self.step(true, skip_mode(self.loop_mode))
    }

    /// Explicit skip back: like [`PlayQueue::previous`], but loop `one` wraps like `all`.
    pub fn skip_previous(&mut self) -> Option<SharedDescriptor> {
        self.step(false, skip_mode(self.loop_mode))
    }

    fn step(&mut self, forward: bool, mode: LoopMode) -> Option<SharedDescriptor> {
        let cursor = self.cursor?;
        let detached = std::mem::take(&mut self.detached);
        if (forward && detached) || mode == LoopMode::One {
            return self.items.get(cursor).cloned();
        }
        let len = self.items.len();
        let wrap = mode == LoopMode::All;
        let move_by = if forward { step_forward } else { step_back };
        let target = match self.shuffle.as_mut() {
            None => move_by(cursor, len, wrap)?,
            Some(shuffle) => {
                shuffle.position = move_by(shuffle.position, len, wrap)?;
                shuffle.order[shuffle.position]
            }
        };
        self.cursor = Some(target);
        self.items.get(target).cloned()
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Turning shuffle on draws a fresh permutation starting at the current entry; turning it
    /// off continues sequentially from the current entry.
    pub fn set_shuffle(&mut self, enabled: bool) {
        match (enabled, self.shuffle.is_some()) {
            (true, false) => self.shuffle = Some(self.permutation()),
            (false, true) => self.shuffle = None,
            _ => {}
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.clone(),
            cursor: self.cursor,
            loop_mode: self.loop_mode,
            shuffle: self.shuffle.is_some(),
        }
    }

    fn sequence_changed(&mut self) {
        if self.shuffle.is_some() {
            self.shuffle = Some(self.permutation());
        }
    }

    fn permutation(&mut self) -> ShuffleOrder {
        let Some(cursor) = self.cursor else {
            return ShuffleOrder {
                order: Vec::new(),
                position: 0,
            };
        };
        let mut rest: Vec<usize> = (0..self.items.len()).filter(|&i| i != cursor).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.generation));
        self.generation = self.generation.wrapping_add(1);
        rest.shuffle(&mut rng);

        let mut order = Vec::with_capacity(self.items.len());
        order.push(cursor);
        order.extend(rest);
        ShuffleOrder { order, position: 0 }
    }
}

fn skip_mode(mode: LoopMode) -> LoopMode {
    match mode {
        LoopMode::One => LoopMode::All,
        other => other,
    }
}

fn step_forward(position: usize, len: usize, wrap: bool) -> Option<usize> {
    if position + 1 < len {
        Some(position + 1)
    } else if wrap {
        Some(0)
    } else {
        None
    }
}

fn step_back(position: usize, len: usize, wrap: bool) -> Option<usize> {
    if position > 0 {
        Some(position - 1)
    } else if wrap {
        Some(len - 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;
    use media_engine_types::Provenance;
    use rand::Rng;

    fn queue_of(ids: &[&str]) -> PlayQueue {
        let mut queue = PlayQueue::new(42);
        for id in ids {
            queue.enqueue(descriptor(id, Provenance::Local), None);
        }
        queue
    }

    fn ids(queue: &PlayQueue) -> Vec<String> {
        queue.items().iter().map(|d| d.id().to_string()).collect()
    }

    fn next_id(queue: &mut PlayQueue) -> Option<String> {
        queue.next().map(|d| d.id().to_string())
    }

    #[test]
    fn first_enqueue_sets_cursor() {
        let mut queue = PlayQueue::new(1);
        assert_eq!(queue.cursor(), None);
        queue.enqueue(descriptor("a", Provenance::Local), None);
        assert_eq!(queue.cursor(), Some(0));
    }

    #[test]
    fn sequential_next_respects_loop_mode() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.move_to(2);

        assert_eq!(queue.next(), None);
        assert_eq!(queue.cursor(), Some(2));

        queue.set_loop_mode(LoopMode::All);
        assert_eq!(next_id(&mut queue).as_deref(), Some("a"));
        assert_eq!(queue.cursor(), Some(0));

        queue.set_loop_mode(LoopMode::One);
        assert_eq!(next_id(&mut queue).as_deref(), Some("a"));
        assert_eq!(queue.cursor(), Some(0));
    }

    #[test]
    fn previous_mirrors_next() {
        let mut queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.previous(), None);

        queue.set_loop_mode(LoopMode::All);
        assert_eq!(queue.previous().map(|d| d.id().to_string()).as_deref(), Some("c"));
        assert_eq!(queue.previous().map(|d| d.id().to_string()).as_deref(), Some("b"));
    }

    #[test]
    fn insert_before_cursor_keeps_current() {
        let mut queue = queue_of(&["a", "b"]);
        queue.move_to(1);

        queue.enqueue(descriptor("x", Provenance::Local), Some(0));

        assert_eq!(queue.cursor(), Some(2));
        assert_eq!(queue.current().unwrap().id(), "b");
        assert_eq!(ids(&queue), ["x", "a", "b"]);
    }

    #[test]
    fn removing_current_plays_successor_next() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.move_to(1);

        let removed = queue.remove(1).unwrap();

        assert_eq!(removed.id(), "b");
        assert_eq!(queue.cursor(), Some(1));
        assert_eq!(next_id(&mut queue).as_deref(), Some("c"));
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn removing_current_while_shuffled_follows_the_permutation() {
        let build = |seed| {
            let mut queue = PlayQueue::new(seed);
            for id in ["a", "b", "c", "d", "e", "f"] {
                queue.enqueue(descriptor(id, Provenance::Local), None);
            }
            queue.set_shuffle(true);
            queue
        };
        for seed in 0..50 {
            let expected = next_id(&mut build(seed)).unwrap();
            let mut queue = build(seed);

            assert_eq!(queue.remove(0).unwrap().id(), "a");

            assert_eq!(queue.current().unwrap().id(), expected, "seed {seed}");
            assert_eq!(next_id(&mut queue).as_deref(), Some(expected.as_str()), "seed {seed}");
            let mut visited = vec![expected];
            while let Some(id) = next_id(&mut queue) {
                visited.push(id);
            }
            visited.sort();
            assert_eq!(visited, ["b", "c", "d", "e", "f"], "seed {seed}");
        }
    }

    #[test]
    fn skips_move_on_under_loop_one() {
        let mut queue = queue_of(&["a", "b"]);
        queue.set_loop_mode(LoopMode::One);
        let id = |d: Option<SharedDescriptor>| d.map(|d| d.id().to_string());

        assert_eq!(id(queue.skip_next()).as_deref(), Some("b"));
        assert_eq!(id(queue.skip_next()).as_deref(), Some("a"));
        assert_eq!(id(queue.skip_previous()).as_deref(), Some("b"));
        assert_eq!(next_id(&mut queue).as_deref(), Some("b"));
        assert_eq!(queue.cursor(), Some(1));

        queue.set_loop_mode(LoopMode::Off);
        assert_eq!(queue.skip_next(), None);
        assert_eq!(id(queue.skip_previous()).as_deref(), Some("a"));
    }

    #[test]
    fn removing_current_last_entry_ends_queue() {
        let mut queue = queue_of(&["a", "b"]);
        queue.move_to(1);

        queue.remove(1);

        assert_eq!(queue.cursor(), Some(0));
        assert_eq!(queue.next(), None);
        queue.set_loop_mode(LoopMode::All);
        assert_eq!(next_id(&mut queue).as_deref(), Some("a"));
    }

    #[test]
    fn removing_everything_clears_cursor() {
        let mut queue = queue_of(&["a"]);
        queue.remove(0);
        assert_eq!(queue.cursor(), None);
        assert_eq!(queue.next(), None);
        assert_eq!(queue.remove(0), None);
    }

    #[test]
    fn reorder_keeps_cursor_on_its_entry() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        queue.move_to(1);

        assert!(queue.reorder(0, 3));
        assert_eq!(ids(&queue), ["b", "c", "d", "a"]);
        assert_eq!(queue.current().unwrap().id(), "b");

        assert!(queue.reorder(0, 2));
        assert_eq!(queue.current().unwrap().id(), "b");
        assert_eq!(queue.cursor(), Some(2));

        assert!(!queue.reorder(0, 9));
    }

    #[test]
    fn shuffle_visits_each_entry_once() {
        let mut queue = queue_of(&["a", "b", "c", "d", "e"]);
        queue.set_shuffle(true);

        let mut seen = vec!["a".to_string()];
        while let Some(id) = next_id(&mut queue) {
            seen.push(id);
        }
        seen.sort();
        assert_eq!(seen, ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn shuffle_is_deterministic_for_a_seed() {
        let order = |seed| {
            let mut queue = PlayQueue::new(seed);
            for id in ["a", "b", "c", "d", "e", "f"] {
                queue.enqueue(descriptor(id, Provenance::Local), None);
            }
            queue.set_shuffle(true);
            std::iter::from_fn(|| queue.next().map(|d| d.id().to_string())).collect::<Vec<_>>()
        };
        assert_eq!(order(7), order(7));
    }

    #[test]
    fn shuffle_never_repeats_current_immediately() {
        for seed in 0..50 {
            let mut queue = PlayQueue::new(seed);
            for id in ["a", "b"] {
                queue.enqueue(descriptor(id, Provenance::Local), None);
            }
            queue.set_loop_mode(LoopMode::All);
            queue.set_shuffle(true);
            for _ in 0..6 {
                let before = queue.current().unwrap().id().to_string();
                let after = next_id(&mut queue).unwrap();
                assert_ne!(before, after, "seed {seed}");
            }
        }

        let mut single = queue_of(&["solo"]);
        single.set_loop_mode(LoopMode::All);
        single.set_shuffle(true);
        assert_eq!(next_id(&mut single).as_deref(), Some("solo"));
    }

    #[test]
    fn shuffle_survives_mutation_without_losing_current() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_shuffle(true);
        queue.next();
        let current = queue.current().unwrap().id().to_string();

        queue.enqueue(descriptor("d", Provenance::Local), Some(0));

        assert_eq!(queue.current().unwrap().id(), current);
        let mut rest = Vec::new();
        while let Some(id) = next_id(&mut queue) {
            rest.push(id);
        }
        assert_eq!(rest.len(), 3);
        assert!(!rest.contains(&current));
    }

    #[test]
    fn shuffle_off_continues_sequentially() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        queue.set_shuffle(true);
        queue.move_to(1);
        queue.set_shuffle(false);

        assert_eq!(next_id(&mut queue).as_deref(), Some("c"));
    }

    #[test]
    fn cursor_stays_valid_under_random_mutation() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut queue = PlayQueue::new(3);
        let mut counter = 0usize;

        for _ in 0..5_000 {
            let len = queue.len();
            match rng.random_range(0..9) {
                0 | 1 => {
                    counter += 1;
                    let at = rng.random_range(0..=len + 1);
                    queue.enqueue(descriptor(&format!("t{counter}"), Provenance::Local), Some(at));
                }
                2 if len > 0 => {
                    queue.remove(rng.random_range(0..len));
                }
                3 if len > 0 => {
                    queue.reorder(rng.random_range(0..len), rng.random_range(0..len));
                }
                4 => {
                    if rng.random_bool(0.5) {
                        queue.next();
                    } else {
                        queue.skip_next();
                    }
                }
                5 => {
                    if rng.random_bool(0.5) {
                        queue.previous();
                    } else {
                        queue.skip_previous();
                    }
                }
                6 if len > 0 => {
                    queue.move_to(rng.random_range(0..len));
                }
                7 => queue.set_shuffle(rng.random_bool(0.5)),
                8 => queue.set_loop_mode(match rng.random_range(0..3) {
                    0 => LoopMode::Off,
                    1 => LoopMode::One,
                    _ => LoopMode::All,
                }),
                _ => {}
            }

            match queue.cursor() {
                None => assert!(queue.is_empty()),
                Some(cursor) => assert!(cursor < queue.len()),
            }
            if let Some(shuffle) = &queue.shuffle {
                if let Some(cursor) = queue.cursor() {
                    assert_eq!(shuffle.order.len(), queue.len());
                    assert_eq!(shuffle.order[shuffle.position], cursor);
                }
            }
        }
    }
}
