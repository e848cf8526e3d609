//! Business state and outbox rows committed as one unit.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::store::{OutboxRecord, OutboxStore};
use crate::clock::SharedClock;
use crate::envelope::{EnvelopeValidator, EventEnvelope};
use crate::error::ChassisError;

/// Outbound events staged during a unit of work.
pub struct Staged<'a> {
    validator: &'a EnvelopeValidator,
    clock: &'a SharedClock,
    rows: Vec<OutboxRecord>,
}

impl Staged<'_> {
    /// Stage an event. Invalid envelopes are rejected here, so a committed
    /// row is always publishable.
    pub fn emit(&mut self, envelope: EventEnvelope) -> Result<(), ChassisError> {
        let row = OutboxRecord::validated(self.validator, envelope, self.clock.now())?;
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Couples in-memory business state `S` with the outbox.
///
/// [`atomically`](UnitOfWork::atomically) holds one lock across the mutation
/// and the enqueue: either the state change and every staged row become
/// visible, or neither does.
pub struct UnitOfWork<S> {
    state: Mutex<S>,
    outbox: Arc<dyn OutboxStore>,
    validator: EnvelopeValidator,
    clock: SharedClock,
}

impl<S: Clone + Send> UnitOfWork<S> {
    pub fn new(state: S, outbox: Arc<dyn OutboxStore>, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(state),
            outbox,
            validator: EnvelopeValidator::new(),
            clock,
        }
    }

    pub fn with_validator(mut self, validator: EnvelopeValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Apply `f` to the state, staging events through `Staged::emit`.
    ///
    /// On error from `f` or from the enqueue, the state is restored to its
    /// value before the call and no rows are written.
    pub async fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut S, &mut Staged<'_>) -> Result<T, E>,
        E: From<ChassisError>,
    {
        let mut state = self.state.lock().await;
        let before = state.clone();
        let mut staged = Staged {
            validator: &self.validator,
            clock: &self.clock,
            rows: Vec::new(),
        };

        let output = match f(&mut *state, &mut staged) {
            Ok(output) => output,
            Err(e) => {
                *state = before;
                return Err(e);
            }
        };

        if !staged.rows.is_empty() {
            if let Err(e) = self.outbox.enqueue_batch(staged.rows).await {
                *state = before;
                return Err(e.into());
            }
        }
        Ok(output)
    }

    /// Read the current state under the lock.
    pub async fn read<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&*self.state.lock().await)
    }
}
