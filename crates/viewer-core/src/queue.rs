use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPriority {
    Visible,
    Prefetch,
}

impl RenderPriority {
    fn rank(self) -> u8 {
        match self {
            Self::Visible => 0,
            Self::Prefetch => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderJob {
    pub page: u32,
    pub priority: RenderPriority,
    pub generation: u64,
}

/// Pending page renders for one document view. Visible pages go first;
/// within a priority, requests keep their arrival order. A new generation
/// (scale change) drops everything queued for the old one.
#[derive(Debug, Default)]
pub struct RenderQueue {
    generation: u64,
    pending: HashMap<u32, (RenderPriority, u64)>,
    order: VecDeque<u32>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_generation(&mut self) -> u64 {
        self.generation += 1;
        self.pending.clear();
        self.order.clear();
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn enqueue(&mut self, page: u32, priority: RenderPriority) {
        match self.pending.get_mut(&page) {
            Some((existing, _)) => {
                if priority.rank() < existing.rank() {
                    *existing = priority;
                }
            }
            None => {
                self.pending.insert(page, (priority, self.generation));
                self.order.push_back(page);
            }
        }
    }

    pub fn pop_next(&mut self) -> Option<RenderJob> {
        let mut best: Option<(u32, RenderPriority, u64)> = None;

        for page in &self.order {
            let Some((priority, generation)) = self.pending.get(page).copied() else {
                continue;
            };

            match best {
                Some((_, best_priority, _)) if priority.rank() >= best_priority.rank() => {}
                _ => best = Some((*page, priority, generation)),
            }

            if matches!(best, Some((_, RenderPriority::Visible, _))) {
                break;
            }
        }

        let (page, priority, generation) = best?;
        self.pending.remove(&page);
        if let Some(index) = self.order.iter().position(|candidate| *candidate == page) {
            let _ = self.order.remove(index);
        }

        Some(RenderJob { page, priority, generation })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Neighbours of `current` within `radius`, nearest first, 1-based and
/// clipped to the document.
pub fn prefetch_pages(current: u32, page_count: u32, radius: u32) -> Vec<u32> {
    let mut pages = Vec::new();
    if page_count == 0 {
        return pages;
    }

    for offset in 1..=radius {
        if let Some(lower) = current.checked_sub(offset).filter(|page| *page >= 1) {
            pages.push(lower);
        }
        let upper = current.saturating_add(offset);
        if upper <= page_count {
            pages.push(upper);
        }
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_pages_jump_ahead_of_prefetch() {
        let mut queue = RenderQueue::new();
        queue.begin_generation();

        queue.enqueue(5, RenderPriority::Prefetch);
        queue.enqueue(2, RenderPriority::Visible);

        let first = queue.pop_next().expect("first job");
        assert_eq!((first.page, first.priority), (2, RenderPriority::Visible));
        let second = queue.pop_next().expect("second job");
        assert_eq!((second.page, second.priority), (5, RenderPriority::Prefetch));
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn requeue_upgrades_priority_without_duplicating() {
        let mut queue = RenderQueue::new();

        queue.enqueue(3, RenderPriority::Prefetch);
        queue.enqueue(3, RenderPriority::Visible);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_next().map(|job| job.priority), Some(RenderPriority::Visible));
        assert!(queue.is_empty());
    }

    #[test]
    fn new_generation_drops_stale_requests() {
        let mut queue = RenderQueue::new();
        queue.enqueue(1, RenderPriority::Visible);

        let generation = queue.begin_generation();
        assert!(queue.is_empty());

        queue.enqueue(1, RenderPriority::Visible);
        assert_eq!(queue.pop_next().map(|job| job.generation), Some(generation));
    }

    #[test]
    fn prefetch_neighbours_stay_inside_document() {
        assert_eq!(prefetch_pages(5, 10, 2), vec![4, 6, 3, 7]);
        assert_eq!(prefetch_pages(1, 3, 3), vec![2, 3]);
        assert!(prefetch_pages(1, 0, 2).is_empty());
    }
}
