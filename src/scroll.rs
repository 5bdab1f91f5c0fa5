/// Percent depths reported once each per page lifetime.
pub const SCROLL_THRESHOLDS: [u8; 5] = [25, 50, 75, 90, 100];
/// Seconds on page that produce a milestone event.
pub const TIME_MILESTONES: [u64; 3] = [30, 60, 120];

/// Scroll progress in percent, or `None` when the page cannot scroll.
pub fn scroll_percentage(scroll_y: f64, scroll_height: f64, viewport_height: f64) -> Option<f64> {
    let scrollable = scroll_height - viewport_height;
    if scrollable <= 0.0 || !scrollable.is_finite() || !scroll_y.is_finite() {
        return None;
    }
    Some(scroll_y / scrollable * 100.0)
}

/// Fixed ladder of depth thresholds with a fired flag per rung.
#[derive(Debug, Clone)]
pub struct ScrollDepthLadder {
    rungs: Vec<(u8, bool)>,
}

impl Default for ScrollDepthLadder {
    fn default() -> Self {
        Self::new(&SCROLL_THRESHOLDS)
    }
}

impl ScrollDepthLadder {
    pub fn new(thresholds: &[u8]) -> Self {
        Self {
            rungs: thresholds.iter().map(|t| (*t, false)).collect(),
        }
    }

    /// Thresholds newly reached at `percentage`, lowest first.
    pub fn observe(&mut self, percentage: f64) -> Vec<u8> {
        let mut reached = Vec::new();
        for (threshold, fired) in &mut self.rungs {
            if !*fired && percentage >= f64::from(*threshold) {
                *fired = true;
                reached.push(*threshold);
            }
        }
        reached
    }

    pub fn fired(&self) -> Vec<u8> {
        self.rungs
            .iter()
            .filter(|(_, fired)| *fired)
            .map(|(t, _)| *t)
            .collect()
    }
}

/// Elapsed-time counter advanced by a fixed step per timer tick.
#[derive(Debug, Clone)]
pub struct TimeOnPage {
    elapsed_secs: u64,
    step_secs: u64,
    next_mark: usize,
}

impl TimeOnPage {
    pub fn new(step_secs: u64) -> Self {
        Self {
            elapsed_secs: 0,
            step_secs,
            next_mark: 0,
        }
    }

    /// Advances one tick; returns every milestone reached or passed since
    /// the previous tick, lowest first.
    pub fn tick(&mut self) -> Vec<u64> {
        self.elapsed_secs += self.step_secs;
        let mut reached = Vec::new();
        while let Some(&mark) = TIME_MILESTONES.get(self.next_mark)
            && mark <= self.elapsed_secs
        {
            reached.push(mark);
            self.next_mark += 1;
        }
        reached
    }

    /// Whether every milestone has been reported.
    pub fn finished(&self) -> bool {
        self.next_mark >= TIME_MILESTONES.len()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }
}
