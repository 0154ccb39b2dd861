use std::time::Duration;

use rfidcontrol::Edge;

/// Software debounce for one event line.
///
/// An edge is dropped when it repeats the last accepted edge or when it
/// arrives less than `window` after it.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<(Edge, Duration)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, edge: Edge, timestamp: Duration) -> bool {
        if let Some((last_edge, last_at)) = self.last {
            if last_edge == edge || timestamp.saturating_sub(last_at) < self.window {
                return false;
            }
        }
        self.last = Some((edge, timestamp));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn bounces_inside_window_are_dropped() {
        let mut d = Debouncer::new(ms(10));
        assert!(d.accept(Edge::Rising, ms(100)));
        assert!(!d.accept(Edge::Falling, ms(102)));
        assert!(!d.accept(Edge::Rising, ms(104)));
        assert!(d.accept(Edge::Falling, ms(600)));
    }

    #[test]
    fn repeated_edges_are_dropped() {
        let mut d = Debouncer::new(Duration::ZERO);
        assert!(d.accept(Edge::Rising, ms(0)));
        assert!(!d.accept(Edge::Rising, ms(50)));
        assert!(d.accept(Edge::Falling, ms(51)));
    }
}
