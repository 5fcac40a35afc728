// Partial-construction cleanup
//
// Multi-step creation (instance -> messenger -> surface, or chain -> views ->
// render pass -> framebuffers) registers a release step per object. If a later
// step fails the stack unwinds newest first; on success it is disarmed and the
// objects are handed to their real owner.

#[derive(Default)]
pub struct CleanupStack {
    steps: Vec<Box<dyn FnOnce()>>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: impl FnOnce() + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Construction finished; keep everything alive
    pub fn disarm(mut self) {
        self.steps.clear();
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            log::debug!("Releasing {} partially created objects", self.steps.len());
        }
        while let Some(step) = self.steps.pop() {
            step();
        }
    }
}
