pub type ComicId = u32;

/// Most list entries shown at once.
pub const WINDOW_CAP: u32 = 100;

/// Contiguous id range eligible for list display and prefetch.
/// Derived from the current position on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: ComicId,
    pub end: ComicId,
}

impl Window {
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, id: ComicId) -> bool {
        self.start <= id && id <= self.end
    }

    pub fn ids(&self) -> std::ops::RangeInclusive<ComicId> {
        self.start..=self.end
    }
}

/// Computes the bounded id window the list presents, centered on the
/// current comic when the corpus exceeds the cap.
///
/// Callers guarantee `latest >= 1` and `1 <= current <= latest`. Near the
/// corpus edges the clamps win over centering; the window never extends
/// below 1 or above `latest`.
pub fn select_window(latest: ComicId, current: ComicId) -> Window {
    if latest <= WINDOW_CAP {
        return Window {
            start: 1,
            end: latest,
        };
    }

    let cap = WINDOW_CAP;
    let half = cap / 2;
    let start = current.saturating_sub(half).max(1);
    let end = (start + cap - 1).min(latest);
    // end was clamped at latest; slide the start back to keep a full window
    let start = if end - start + 1 < cap {
        (end - cap + 1).max(1)
    } else {
        start
    };

    Window { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_corpus_shows_everything() {
        for current in [1, 7, 42] {
            let w = select_window(42, current);
            assert_eq!(w, Window { start: 1, end: 42 });
        }
        assert_eq!(select_window(1, 1), Window { start: 1, end: 1 });
        assert_eq!(select_window(100, 50), Window { start: 1, end: 100 });
    }

    #[test]
    fn interior_window_is_full_and_contains_current() {
        for current in [51, 125, 200] {
            let w = select_window(250, current);
            assert_eq!(w.len(), 100);
            assert!(w.contains(current));
        }
    }

    #[test]
    fn clamps_at_first_comic() {
        assert_eq!(select_window(250, 1), Window { start: 1, end: 100 });
    }

    #[test]
    fn clamps_at_latest_comic() {
        assert_eq!(select_window(250, 250), Window { start: 151, end: 250 });
    }

    #[test]
    fn centers_mid_corpus() {
        assert_eq!(select_window(250, 125), Window { start: 75, end: 174 });
    }

    #[test]
    fn never_exceeds_bounds() {
        for latest in [101, 250, 3000] {
            for current in [1, 2, latest / 2, latest - 1, latest] {
                let w = select_window(latest, current);
                assert!(w.start >= 1);
                assert!(w.end <= latest);
                assert!(w.len() <= 100);
            }
        }
    }
}
