/// Remembers the last failure reported from a loop so the same message is
/// only logged loudly once.
#[derive(Debug, Default)]
pub struct RepeatFilter {
    last: Option<String>,
    repeats: u64,
}

impl RepeatFilter {
    /// Record `message`. Returns true when it differs from the previous one.
    pub fn is_new(&mut self, message: &str) -> bool {
        if self.last.as_deref() == Some(message) {
            self.repeats += 1;
            return false;
        }
        self.last = Some(message.to_string());
        self.repeats = 0;
        true
    }

    /// Forget the last failure. Returns how many repeats were suppressed.
    pub fn clear(&mut self) -> u64 {
        self.last = None;
        std::mem::take(&mut self.repeats)
    }
}
