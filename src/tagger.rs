use std::time::{SystemTime, UNIX_EPOCH};

/// Allocates message tags of the form `<unix-seconds>.--<n>`, where `n` counts
/// sends since the tagger was created (not since the epoch second changed).
pub(crate) struct Tagger {
    epoch: u64,
    count: u64,
}

impl Tagger {
    pub(crate) fn new() -> Self {
        Tagger {
            epoch: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before 1970")
                .as_secs(),
            count: 0,
        }
    }

    /// Allocates the next tag and bumps the internal counter. `long` selects
    /// the full-precision `epoch.--n` shape used for most message tags;
    /// otherwise the epoch is folded down to `epoch % 1000`, matching the
    /// two tag shapes the wire protocol expects.
    pub(crate) fn next_tag(&mut self, long: bool) -> String {
        let n = self.count;
        self.count += 1;
        if long {
            format!("{}.--{}", self.epoch, n)
        } else {
            format!("{}.--{}", self.epoch % 1000, n)
        }
    }
}
