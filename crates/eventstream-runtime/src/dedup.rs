use std::collections::{HashSet, VecDeque};

/// Bounded window of recently seen IDs; the oldest are evicted first.
#[derive(Debug, Clone)]
pub struct SeenWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
    max_items: usize,
}

impl SeenWindow {
    /// Create a window with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            max_items: max_items.max(1),
        }
    }

    /// Record `id`; returns `false` if it was already in the window.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_owned());
        self.order.push_back(id.to_owned());
        self.trim_to_max();
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn trim_to_max(&mut self) {
        while self.order.len() > self.max_items {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}
