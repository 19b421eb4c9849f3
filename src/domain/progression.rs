//! Work-order step progression.
//!
//! A work order walks its path linearly: `-1` (not started) → step 0 → … →
//! `steps.len()` (finished). Only the step at `current_step_index` is ever
//! `running` or `hold`; steps before it are `completed`, steps after it are
//! `pending` (or `hold` on split children).
//!
//! Every operation mutates in place and leaves the order untouched on error,
//! so callers can apply it optimistically and keep the prior clone for
//! rollback.

use super::models::{PathStep, StepStatus, WorkOrder, new_id, now_timestamp};
use crate::errors::ProductionError;

impl WorkOrder {
    /// Build a fresh order: not started, every step pending.
    pub fn new(
        name: &str,
        product: &str,
        quantity: u32,
        steps: Vec<PathStep>,
    ) -> Result<Self, ProductionError> {
        let now = now_timestamp();
        let order = Self {
            id: new_id(),
            name: name.trim().to_string(),
            product: product.trim().to_string(),
            quantity,
            quantity_done: 0,
            current_step_index: -1,
            steps: steps
                .into_iter()
                .map(|mut s| {
                    s.status = StepStatus::Pending;
                    s.quantity_done = 0;
                    s
                })
                .collect(),
            parent_id: None,
            notes: String::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        crate::domain::Record::validate(&order)?;
        Ok(order)
    }

    pub fn is_started(&self) -> bool {
        self.current_step_index >= 0
    }

    pub fn is_finished(&self) -> bool {
        !self.steps.is_empty() && self.current_step_index >= self.steps.len() as i32
    }

    /// The step currently running or on hold, if any.
    pub fn current_step(&self) -> Option<&PathStep> {
        usize::try_from(self.current_step_index)
            .ok()
            .and_then(|i| self.steps.get(i))
    }

    fn current_step_mut(&mut self) -> Option<&mut PathStep> {
        usize::try_from(self.current_step_index)
            .ok()
            .and_then(|i| self.steps.get_mut(i))
    }

    fn ensure_steps(&self) -> Result<(), ProductionError> {
        if self.steps.is_empty() {
            return Err(ProductionError::NoSteps {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    fn active_step_mut(&mut self) -> Result<&mut PathStep, ProductionError> {
        if !self.is_started() {
            return Err(ProductionError::NotStarted {
                id: self.id.clone(),
            });
        }
        if self.is_finished() {
            return Err(ProductionError::AlreadyFinished {
                id: self.id.clone(),
            });
        }
        let id = self.id.clone();
        self.current_step_mut()
            .ok_or(ProductionError::NoSteps { id })
    }

    /// Keep the order-level count in step with the final step.
    fn sync_quantity_done(&mut self) {
        self.quantity_done = self.steps.last().map(|s| s.quantity_done).unwrap_or(0);
    }

    /// Complete the current step and start the next one. From `-1` this
    /// starts step 0; after the last step the order is finished.
    pub fn advance(&mut self) -> Result<(), ProductionError> {
        self.ensure_steps()?;
        if self.is_finished() {
            return Err(ProductionError::AlreadyFinished {
                id: self.id.clone(),
            });
        }
        let quantity = self.quantity;
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Completed;
            step.quantity_done = quantity;
        }
        self.current_step_index += 1;
        if let Some(next) = self.current_step_mut() {
            next.status = StepStatus::Running;
        }
        self.sync_quantity_done();
        self.updated_at = now_timestamp();
        Ok(())
    }

    /// Undo the last advance: the current step goes back to pending and the
    /// previous one runs again.
    pub fn retreat(&mut self) -> Result<(), ProductionError> {
        self.ensure_steps()?;
        if !self.is_started() {
            return Err(ProductionError::NotStarted {
                id: self.id.clone(),
            });
        }
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Pending;
            step.quantity_done = 0;
        }
        self.current_step_index -= 1;
        if let Some(prev) = self.current_step_mut() {
            prev.status = StepStatus::Running;
            prev.quantity_done = 0;
        }
        self.sync_quantity_done();
        self.updated_at = now_timestamp();
        Ok(())
    }

    pub fn hold(&mut self) -> Result<(), ProductionError> {
        self.set_active_status(StepStatus::Running, StepStatus::Hold)
    }

    pub fn resume(&mut self) -> Result<(), ProductionError> {
        self.set_active_status(StepStatus::Hold, StepStatus::Running)
    }

    fn set_active_status(
        &mut self,
        expected: StepStatus,
        next: StepStatus,
    ) -> Result<(), ProductionError> {
        let step = self.active_step_mut()?;
        if step.status != expected {
            return Err(ProductionError::InvalidStepStatus {
                label: step.label.clone(),
                status: step.status.to_string(),
                expected: expected.as_str(),
            });
        }
        step.status = next;
        self.updated_at = now_timestamp();
        Ok(())
    }

    /// Record how many pieces the current step has processed so far.
    pub fn record_progress(&mut self, done: u32) -> Result<(), ProductionError> {
        let quantity = self.quantity;
        let step = self.active_step_mut()?;
        step.quantity_done = done.min(quantity);
        self.sync_quantity_done();
        self.updated_at = now_timestamp();
        Ok(())
    }

    /// Split batches off this order.
    ///
    /// `self` keeps its id and history and becomes the remainder
    /// (`quantity - sum(batches)`). Each returned child copies the step
    /// template at the same position: completed steps stay completed, every
    /// other step is put on hold, and all progress counters start at zero.
    pub fn split(&mut self, batches: &[u32]) -> Result<Vec<WorkOrder>, ProductionError> {
        self.ensure_steps()?;
        if self.is_finished() {
            return Err(ProductionError::AlreadyFinished {
                id: self.id.clone(),
            });
        }
        if batches.is_empty() {
            return Err(ProductionError::InvalidSplit(
                "at least one batch is required".into(),
            ));
        }
        if batches.contains(&0) {
            return Err(ProductionError::InvalidSplit(
                "batch quantities must be greater than zero".into(),
            ));
        }
        let total: u64 = batches.iter().map(|&b| u64::from(b)).sum();
        if total >= u64::from(self.quantity) {
            return Err(ProductionError::InvalidSplit(format!(
                "batches total {} but the order only has {}",
                total, self.quantity
            )));
        }

        let now = now_timestamp();
        let children = batches
            .iter()
            .enumerate()
            .map(|(n, &batch)| WorkOrder {
                id: new_id(),
                name: format!("{} (batch {})", self.name, n + 1),
                product: self.product.clone(),
                quantity: batch,
                quantity_done: 0,
                current_step_index: self.current_step_index,
                steps: self
                    .steps
                    .iter()
                    .map(|s| PathStep {
                        id: new_id(),
                        status: if s.status == StepStatus::Completed {
                            StepStatus::Completed
                        } else {
                            StepStatus::Hold
                        },
                        quantity_done: 0,
                        ..s.clone()
                    })
                    .collect(),
                parent_id: Some(self.id.clone()),
                notes: String::new(),
                created_at: now.clone(),
                updated_at: now.clone(),
            })
            .collect();

        // total < quantity, so the narrowing cannot fail.
        self.quantity -= total as u32;
        let remaining = self.quantity;
        for step in &mut self.steps {
            if step.status == StepStatus::Completed {
                step.quantity_done = remaining;
            } else {
                step.quantity_done = step.quantity_done.min(remaining);
            }
        }
        self.sync_quantity_done();
        self.updated_at = now;
        Ok(children)
    }
}
