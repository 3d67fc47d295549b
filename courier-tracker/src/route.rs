use std::collections::VecDeque;

use courier_core::RoutePoint;

pub const DEFAULT_ROUTE_CAPACITY: usize = 100;

/// Most recent route points, oldest evicted first.
#[derive(Debug, Clone)]
pub struct RouteHistory {
    points: VecDeque<RoutePoint>,
    capacity: usize,
}

impl Default for RouteHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ROUTE_CAPACITY)
    }
}

impl RouteHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: RoutePoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&RoutePoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutePoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<RoutePoint> {
        self.points.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
