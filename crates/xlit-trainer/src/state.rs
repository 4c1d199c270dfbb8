//! Epoch accounting and the early-stopping rule.

/// Epochs rolled back when validation loss rises three epochs in a row.
pub const ROLLBACK_EPOCHS: usize = 3;

/// Progress of a training run, owned by the orchestrator.
///
/// Per-task progress is kept as consumed example counts; the fractional epoch
/// of a task is `consumed / corpus_size`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    corpus_sizes: Vec<usize>,
    consumed: Vec<usize>,
    completed_epochs: usize,
    steps: usize,
    validation_losses: Vec<f32>,
}

impl TrainingState {
    /// One entry per task, in task order. Sizes must be non-zero.
    pub fn new(corpus_sizes: Vec<usize>) -> Self {
        let consumed = vec![0; corpus_sizes.len()];
        Self {
            corpus_sizes,
            consumed,
            completed_epochs: 0,
            steps: 0,
            validation_losses: Vec::new(),
        }
    }

    pub fn record_batch(&mut self, task: usize, examples: usize) {
        self.consumed[task] += examples;
    }

    pub fn fractional_epoch(&self, task: usize) -> f64 {
        self.consumed[task] as f64 / self.corpus_sizes[task] as f64
    }

    pub fn fractional_epochs(&self) -> Vec<f64> {
        (0..self.corpus_sizes.len())
            .map(|task| self.fractional_epoch(task))
            .collect()
    }

    /// Close a training step. Returns `true` when it completed an epoch, in
    /// which case every task's progress starts over.
    pub fn finish_step(&mut self) -> bool {
        self.steps += 1;
        let complete = self
            .consumed
            .iter()
            .zip(&self.corpus_sizes)
            .all(|(consumed, size)| consumed >= size);
        if complete {
            self.completed_epochs += 1;
            self.consumed.iter_mut().for_each(|c| *c = 0);
        }
        complete
    }

    pub fn record_validation(&mut self, loss: f32) {
        self.validation_losses.push(loss);
    }

    /// The last three losses each rose over the one before.
    pub fn should_stop_early(&self) -> bool {
        let n = self.validation_losses.len();
        if self.completed_epochs < ROLLBACK_EPOCHS + 1 || n < ROLLBACK_EPOCHS + 1 {
            return false;
        }
        let recent = &self.validation_losses[n - ROLLBACK_EPOCHS..];
        let before = &self.validation_losses[n - ROLLBACK_EPOCHS - 1..n - 1];
        recent.iter().zip(before).all(|(now, prev)| now > prev)
    }

    /// Step the epoch counter back to the epoch before the losses started
    /// rising. Returns the new epoch count.
    pub fn roll_back(&mut self) -> usize {
        self.completed_epochs = self.completed_epochs.saturating_sub(ROLLBACK_EPOCHS);
        self.completed_epochs
    }

    /// Whether the epoch just completed deserves a checkpoint: the first
    /// epoch, or a strictly lower loss than the previous one.
    pub fn improved(&self) -> bool {
        match self.validation_losses.as_slice() {
            [.., prev, last] => self.completed_epochs == 1 || last < prev,
            _ => self.completed_epochs == 1,
        }
    }

    pub fn completed_epochs(&self) -> usize {
        self.completed_epochs
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn validation_losses(&self) -> &[f32] {
        &self.validation_losses
    }
}
