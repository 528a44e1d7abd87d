//! Per-flow state machine.
//!
//! Pure bookkeeping: it owns the steps and their statuses, accepts one event at a time
//! and answers with the single effect the driver must carry out next. It never awaits
//! anything, so every transition can be tested without a runtime.

use super::types::{FlowId, FlowKind, FlowSnapshot, FlowStatus, Step, StepStatus};
use super::FlowError;
use crate::repository::{Receipt, TxHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Start the first step.
    Begin,
    /// The driver holds the signing session and is about to ask the wallet.
    SignatureRequested,
    Broadcast(TxHandle),
    SignatureRejected(String),
    BroadcastFailed(String),
    Confirmed(Receipt),
    Reverted(String),
    ConfirmationTimedOut,
    /// Caller asks to poll a stalled confirmation again.
    Recheck,
    Cancel,
}

#[derive(Debug, Clone)]
pub enum Effect {
    /// Wait for the signing session, then send `SignatureRequested`.
    AcquireSigner(usize),
    RequestSignature(Step),
    AwaitConfirmation(usize, TxHandle),
    /// Nothing to do until the caller sends `Recheck`.
    AwaitRecheck(usize, TxHandle),
    Completed,
    Halted(FlowError),
    Cancelled,
}

#[derive(Debug)]
pub struct FlowMachine {
    id: FlowId,
    kind: FlowKind,
    steps: Vec<Step>,
    cursor: usize,
    status: FlowStatus,
    started: bool,
    stalled: bool,
    error: Option<FlowError>,
}

impl FlowMachine {
    pub fn new(id: FlowId, kind: FlowKind, steps: Vec<Step>) -> Self {
        Self {
            id,
            kind,
            steps,
            cursor: 0,
            status: FlowStatus::Running,
            started: false,
            stalled: false,
            error: None,
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            id: self.id,
            kind: self.kind,
            status: self.status,
            stalled: self.stalled,
            steps: self.steps.clone(),
            error: self.error.clone(),
        }
    }

    pub fn transition(&mut self, event: FlowEvent) -> Result<Effect, FlowError> {
        if self.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "flow {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }

        match event {
            FlowEvent::Begin => {
                if self.started {
                    return Err(self.unexpected("begin"));
                }
                self.started = true;
                if self.steps.is_empty() {
                    self.status = FlowStatus::Complete;
                    return Ok(Effect::Completed);
                }
                Ok(Effect::AcquireSigner(self.cursor))
            }

            FlowEvent::SignatureRequested => {
                self.expect_active(StepStatus::Pending, "signature request")?;
                self.set_step_status(StepStatus::AwaitingSignature);
                Ok(Effect::RequestSignature(self.steps[self.cursor].clone()))
            }

            FlowEvent::Broadcast(handle) => {
                self.expect_active(StepStatus::AwaitingSignature, "broadcast")?;
                self.steps[self.cursor].tx = Some(handle);
                self.set_step_status(StepStatus::Submitted);
                Ok(Effect::AwaitConfirmation(self.cursor, handle))
            }

            FlowEvent::SignatureRejected(reason) => {
                self.expect_active(StepStatus::AwaitingSignature, "signature rejection")?;
                Ok(self.fail(FlowError::SignatureRejected(reason)))
            }

            FlowEvent::BroadcastFailed(reason) => {
                self.expect_active(StepStatus::AwaitingSignature, "broadcast failure")?;
                Ok(self.fail(FlowError::Ledger(reason)))
            }

            FlowEvent::Confirmed(receipt) => {
                self.expect_active(StepStatus::Submitted, "confirmation")?;
                self.clear_stall();
                self.steps[self.cursor].receipt = Some(receipt);
                self.set_step_status(StepStatus::Confirmed);

                self.cursor += 1;
                if self.cursor == self.steps.len() {
                    self.status = FlowStatus::Complete;
                    tracing::info!(flow = %self.id, "Flow complete");
                    return Ok(Effect::Completed);
                }
                Ok(Effect::AcquireSigner(self.cursor))
            }

            FlowEvent::Reverted(reason) => {
                self.expect_active(StepStatus::Submitted, "revert")?;
                self.clear_stall();
                Ok(self.fail(FlowError::Revert { reason }))
            }

            FlowEvent::ConfirmationTimedOut => {
                let handle = self.submitted_handle("confirmation timeout")?;
                let error = FlowError::Timeout(format!(
                    "no receipt for {} yet; recheck to keep waiting",
                    handle.hash
                ));
                tracing::warn!(
                    flow = %self.id,
                    step = self.cursor,
                    "Confirmation of {} timed out, waiting for recheck",
                    handle.hash
                );

                self.stalled = true;
                self.steps[self.cursor].error = Some(error.clone());
                self.error = Some(error);
                Ok(Effect::AwaitRecheck(self.cursor, handle))
            }

            FlowEvent::Recheck => {
                if !self.stalled {
                    return Err(FlowError::InvalidState(format!(
                        "flow {} is not waiting for a recheck",
                        self.id
                    )));
                }
                let handle = self.submitted_handle("recheck")?;
                self.clear_stall();
                Ok(Effect::AwaitConfirmation(self.cursor, handle))
            }

            FlowEvent::Cancel => {
                let status = self
                    .steps
                    .get(self.cursor)
                    .map(|s| s.status)
                    .ok_or_else(|| self.unexpected("cancel"))?;
                match status {
                    StepStatus::Pending | StepStatus::AwaitingSignature => {
                        // The signature request is abandoned, not failed
                        self.set_step_status(StepStatus::Pending);
                        self.status = FlowStatus::Cancelled;
                        tracing::info!(flow = %self.id, step = self.cursor, "Flow cancelled");
                        Ok(Effect::Cancelled)
                    }
                    _ => Err(FlowError::InvalidState(format!(
                        "step {} of flow {} is already {}; it can no longer be cancelled",
                        self.cursor,
                        self.id,
                        status.as_str()
                    ))),
                }
            }
        }
    }

    fn fail(&mut self, error: FlowError) -> Effect {
        tracing::error!(flow = %self.id, step = self.cursor, "Step failed: {}", error);

        let step = &mut self.steps[self.cursor];
        step.error = Some(error.clone());
        self.set_step_status(StepStatus::Failed);
        self.status = FlowStatus::Failed;
        self.error = Some(error.clone());
        Effect::Halted(error)
    }

    /// Drops the timeout recorded while the active step was stalled.
    fn clear_stall(&mut self) {
        if self.stalled {
            self.stalled = false;
            self.steps[self.cursor].error = None;
            self.error = None;
        }
    }

    fn set_step_status(&mut self, status: StepStatus) {
        let step = &mut self.steps[self.cursor];
        if step.status != status {
            tracing::info!(
                flow = %self.id,
                step = step.index,
                kind = step.kind.as_str(),
                "{} -> {}",
                step.status.as_str(),
                status.as_str()
            );
            step.status = status;
        }
    }

    fn expect_active(&self, expected: StepStatus, what: &str) -> Result<(), FlowError> {
        if !self.started || self.steps[self.cursor].status != expected {
            return Err(self.unexpected(what));
        }
        Ok(())
    }

    fn submitted_handle(&self, what: &str) -> Result<TxHandle, FlowError> {
        self.expect_active(StepStatus::Submitted, what)?;
        self.steps[self.cursor]
            .tx
            .ok_or_else(|| self.unexpected(what))
    }

    fn unexpected(&self, what: &str) -> FlowError {
        let state = self
            .steps
            .get(self.cursor)
            .map(|s| s.status.as_str())
            .unwrap_or("finished");
        FlowError::InvalidState(format!(
            "unexpected {what} for flow {} at step {} ({state})",
            self.id, self.cursor
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{StepCall, StepKind};
    use crate::repository::contract::IERC20;
    use alloy::primitives::{Address, B256, U256};

    fn approve_step(index: usize, kind: StepKind) -> Step {
        Step::new(
            index,
            kind,
            Address::repeat_byte(0x10 + index as u8),
            StepCall::Approve(IERC20::approveCall {
                spender: Address::repeat_byte(0x99),
                amount: U256::from(1u64),
            }),
        )
    }

    fn machine(steps: usize) -> FlowMachine {
        let kinds = [StepKind::ApproveTokenA, StepKind::ApproveTokenB, StepKind::AddLiquidity];
        let steps = (0..steps).map(|i| approve_step(i, kinds[i % 3])).collect();
        FlowMachine::new(FlowId::new(), FlowKind::AddLiquidity, steps)
    }

    fn handle(n: u8) -> TxHandle {
        TxHandle {
            hash: B256::repeat_byte(n),
            from: Address::repeat_byte(0xaa),
        }
    }

    fn receipt(n: u8) -> Receipt {
        Receipt {
            hash: B256::repeat_byte(n),
            block_number: Some(n as u64),
            gas_used: 21000,
        }
    }

    /// Drives the active step from Pending to Submitted.
    fn submit(m: &mut FlowMachine, n: u8) {
        assert!(matches!(m.transition(FlowEvent::SignatureRequested), Ok(Effect::RequestSignature(_))));
        assert!(matches!(
            m.transition(FlowEvent::Broadcast(handle(n))),
            Ok(Effect::AwaitConfirmation(_, _))
        ));
    }

    #[test]
    fn test_happy_path_runs_steps_in_order() {
        let mut m = machine(3);

        assert!(matches!(m.transition(FlowEvent::Begin), Ok(Effect::AcquireSigner(0))));

        for n in 0..3u8 {
            submit(&mut m, n);
            // Later steps never move before their predecessor confirms
            for later in m.snapshot().steps.iter().skip(n as usize + 1) {
                assert_eq!(later.status, StepStatus::Pending);
            }

            let effect = m.transition(FlowEvent::Confirmed(receipt(n))).unwrap();
            if n < 2 {
                assert!(matches!(effect, Effect::AcquireSigner(i) if i == n as usize + 1));
            } else {
                assert!(matches!(effect, Effect::Completed));
            }
        }

        let snapshot = m.snapshot();
        assert_eq!(snapshot.status, FlowStatus::Complete);
        assert!(snapshot.steps.iter().all(|s| s.status == StepStatus::Confirmed));
        assert_eq!(snapshot.steps[1].tx, Some(handle(1)));
    }

    #[test]
    fn test_rejection_fails_step_and_flow() {
        let mut m = machine(3);
        m.transition(FlowEvent::Begin).unwrap();
        submit(&mut m, 0);
        m.transition(FlowEvent::Confirmed(receipt(0))).unwrap();
        m.transition(FlowEvent::SignatureRequested).unwrap();

        let effect = m
            .transition(FlowEvent::SignatureRejected("user said no".into()))
            .unwrap();
        assert!(matches!(effect, Effect::Halted(FlowError::SignatureRejected(_))));

        let snapshot = m.snapshot();
        assert_eq!(snapshot.status, FlowStatus::Failed);
        assert_eq!(snapshot.steps[0].status, StepStatus::Confirmed);
        assert_eq!(snapshot.steps[1].status, StepStatus::Failed);
        assert_eq!(snapshot.steps[2].status, StepStatus::Pending);
    }

    #[test]
    fn test_revert_fails_flow() {
        let mut m = machine(2);
        m.transition(FlowEvent::Begin).unwrap();
        submit(&mut m, 0);

        let effect = m.transition(FlowEvent::Reverted("out of gas".into())).unwrap();
        assert!(matches!(effect, Effect::Halted(FlowError::Revert { .. })));
        assert_eq!(m.status(), FlowStatus::Failed);
        assert_eq!(m.snapshot().steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn test_events_after_terminal_state_are_invalid() {
        let mut m = machine(1);
        m.transition(FlowEvent::Begin).unwrap();
        m.transition(FlowEvent::Cancel).unwrap();

        assert!(matches!(m.transition(FlowEvent::Cancel), Err(FlowError::InvalidState(_))));
        assert!(matches!(
            m.transition(FlowEvent::SignatureRequested),
            Err(FlowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_cancel_while_awaiting_signature() {
        let mut m = machine(3);
        m.transition(FlowEvent::Begin).unwrap();
        m.transition(FlowEvent::SignatureRequested).unwrap();

        assert!(matches!(m.transition(FlowEvent::Cancel), Ok(Effect::Cancelled)));

        let snapshot = m.snapshot();
        assert_eq!(snapshot.status, FlowStatus::Cancelled);
        assert!(snapshot.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_cancel_after_broadcast_is_rejected_without_change() {
        let mut m = machine(3);
        m.transition(FlowEvent::Begin).unwrap();
        submit(&mut m, 0);

        let result = m.transition(FlowEvent::Cancel);
        assert!(matches!(result, Err(FlowError::InvalidState(_))));
        assert_eq!(m.status(), FlowStatus::Running);
        assert_eq!(m.snapshot().steps[0].status, StepStatus::Submitted);

        // The flow carries on normally afterwards
        assert!(matches!(
            m.transition(FlowEvent::Confirmed(receipt(0))),
            Ok(Effect::AcquireSigner(1))
        ));
    }

    #[test]
    fn test_timeout_stalls_until_recheck() {
        let mut m = machine(2);
        m.transition(FlowEvent::Begin).unwrap();
        submit(&mut m, 7);

        let effect = m.transition(FlowEvent::ConfirmationTimedOut).unwrap();
        assert!(matches!(effect, Effect::AwaitRecheck(0, h) if h == handle(7)));
        assert!(m.is_stalled());
        assert_eq!(m.status(), FlowStatus::Running);

        let snapshot = m.snapshot();
        assert_eq!(snapshot.steps[0].status, StepStatus::Submitted);
        assert!(matches!(snapshot.steps[0].error, Some(FlowError::Timeout(_))));
        assert!(matches!(snapshot.error, Some(FlowError::Timeout(_))));

        let effect = m.transition(FlowEvent::Recheck).unwrap();
        assert!(matches!(effect, Effect::AwaitConfirmation(0, h) if h == handle(7)));
        assert!(!m.is_stalled());

        let snapshot = m.snapshot();
        assert_eq!(snapshot.steps[0].error, None);
        assert_eq!(snapshot.error, None);

        assert!(matches!(
            m.transition(FlowEvent::Confirmed(receipt(7))),
            Ok(Effect::AcquireSigner(1))
        ));
    }

    #[test]
    fn test_revert_after_timeout_replaces_timeout_error() {
        let mut m = machine(1);
        m.transition(FlowEvent::Begin).unwrap();
        submit(&mut m, 3);
        m.transition(FlowEvent::ConfirmationTimedOut).unwrap();
        m.transition(FlowEvent::Recheck).unwrap();

        m.transition(FlowEvent::Reverted("dropped".into())).unwrap();
        let snapshot = m.snapshot();
        assert!(matches!(snapshot.error, Some(FlowError::Revert { .. })));
        assert!(matches!(snapshot.steps[0].error, Some(FlowError::Revert { .. })));
    }

    #[test]
    fn test_recheck_without_stall_is_invalid() {
        let mut m = machine(1);
        m.transition(FlowEvent::Begin).unwrap();
        submit(&mut m, 0);

        assert!(matches!(m.transition(FlowEvent::Recheck), Err(FlowError::InvalidState(_))));
    }

    #[test]
    fn test_out_of_order_events_are_invalid() {
        let mut m = machine(2);
        assert!(matches!(
            m.transition(FlowEvent::SignatureRequested),
            Err(FlowError::InvalidState(_))
        ));

        m.transition(FlowEvent::Begin).unwrap();
        assert!(matches!(m.transition(FlowEvent::Begin), Err(FlowError::InvalidState(_))));
        assert!(matches!(
            m.transition(FlowEvent::Confirmed(receipt(0))),
            Err(FlowError::InvalidState(_))
        ));
        assert!(matches!(
            m.transition(FlowEvent::Broadcast(handle(0))),
            Err(FlowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_empty_plan_completes_immediately() {
        let mut m = FlowMachine::new(FlowId::new(), FlowKind::Faucet, Vec::new());
        assert!(matches!(m.transition(FlowEvent::Begin), Ok(Effect::Completed)));
        assert_eq!(m.status(), FlowStatus::Complete);
    }
}
