use crate::error::BatchError;
use crate::model::{OutboundBatch, Token};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Appended,
    // A once-per-cycle token was already pending; the add was a no-op.
    Deduplicated,
}

// Commands accumulated between two sends. Clones share the same pending
// state, and every add, drain and close takes the same lock, so an add racing
// a drain lands wholly in one batch or the next.
#[derive(Debug, Clone, Default)]
pub struct CommandBatch {
    pending: Arc<Mutex<Pending>>,
}

#[derive(Debug, Default)]
struct Pending {
    batch: OutboundBatch,
    closed: bool,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_simple(&self, token: Token) -> Result<Admission, BatchError> {
        if token.takes_payload() {
            tracing::warn!(token = %token, "rejected command without payload");
            return Err(BatchError::PayloadRequired(token));
        }
        let mut pending = self.lock();
        if pending.closed {
            return Err(BatchError::Closed);
        }
        pending.batch.commands.push(token);
        Ok(Admission::Appended)
    }

    pub fn add_with_payload(
        &self,
        token: Token,
        value: impl Into<String>,
    ) -> Result<Admission, BatchError> {
        if !token.takes_payload() {
            tracing::warn!(token = %token, "rejected payload for telemetry request");
            return Err(BatchError::PayloadNotAccepted(token));
        }
        let mut pending = self.lock();
        if pending.closed {
            return Err(BatchError::Closed);
        }
        if token.once_per_cycle() && pending.batch.commands.contains(&token) {
            tracing::debug!(token = %token, "already pending this cycle, ignoring");
            return Ok(Admission::Deduplicated);
        }
        pending.batch.commands.push(token);
        pending.batch.payloads.insert(token, value.into());
        Ok(Admission::Appended)
    }

    pub fn drain_and_clear(&self) -> OutboundBatch {
        std::mem::take(&mut self.lock().batch)
    }

    // Session teardown: hand back what never got sent and refuse adds until
    // the next session reopens the batch.
    pub fn close(&self) -> OutboundBatch {
        let mut pending = self.lock();
        pending.closed = true;
        std::mem::take(&mut pending.batch)
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn pending_len(&self) -> usize {
        self.lock().batch.commands.len()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn telemetry_requests_keep_append_order() {
        let batch = CommandBatch::new();
        batch.add_simple(Token::Gps).unwrap();
        batch.add_simple(Token::Imu).unwrap();
        batch.add_simple(Token::Gps).unwrap();

        let drained = batch.drain_and_clear();
        assert_eq!(drained.commands, vec![Token::Gps, Token::Imu, Token::Gps]);
        assert!(drained.payloads.is_empty());
    }

    #[test]
    fn manual_line_keeps_first_value_in_cycle() {
        let batch = CommandBatch::new();
        assert_eq!(
            batch.add_with_payload(Token::ManLineCmd, "go\r\n"),
            Ok(Admission::Appended)
        );
        assert_eq!(
            batch.add_with_payload(Token::ManLineCmd, "stop\r\n"),
            Ok(Admission::Deduplicated)
        );

        let drained = batch.drain_and_clear();
        assert_eq!(drained.commands, vec![Token::ManLineCmd]);
        assert_eq!(drained.payloads[&Token::ManLineCmd], "go\r\n");
    }

    #[test]
    fn manual_key_dedup_resets_after_drain() {
        let batch = CommandBatch::new();
        batch.add_with_payload(Token::ManKeyCmd, "F50").unwrap();
        batch.add_with_payload(Token::ManKeyCmd, "B50").unwrap();
        assert_eq!(batch.drain_and_clear().payloads[&Token::ManKeyCmd], "F50");

        batch.add_with_payload(Token::ManKeyCmd, "L10").unwrap();
        assert_eq!(batch.drain_and_clear().payloads[&Token::ManKeyCmd], "L10");
    }

    #[test]
    fn repeated_mode_commands_record_every_append_but_last_value() {
        let batch = CommandBatch::new();
        batch.add_with_payload(Token::SetMode, "MAN").unwrap();
        batch.add_simple(Token::Gps).unwrap();
        batch.add_with_payload(Token::SetMode, "RMT").unwrap();
        batch.add_with_payload(Token::MtrCmd, "START").unwrap();
        batch.add_with_payload(Token::ManLineCmd, "go\r\n").unwrap();
        batch.add_with_payload(Token::MtrCmd, "STOP").unwrap();
        batch.add_with_payload(Token::ManLineCmd, "halt\r\n").unwrap();

        let drained = batch.drain_and_clear();
        assert_eq!(
            drained.commands,
            vec![
                Token::SetMode,
                Token::Gps,
                Token::SetMode,
                Token::MtrCmd,
                Token::ManLineCmd,
                Token::MtrCmd,
            ]
        );
        assert_eq!(drained.payloads[&Token::SetMode], "RMT");
        assert_eq!(drained.payloads[&Token::MtrCmd], "STOP");
        assert_eq!(drained.payloads[&Token::ManLineCmd], "go\r\n");
    }

    #[test]
    fn second_drain_is_empty() {
        let batch = CommandBatch::new();
        batch.add_simple(Token::Imu).unwrap();
        batch.add_with_payload(Token::MtrCmd, "START").unwrap();

        assert!(!batch.drain_and_clear().is_empty());
        assert_eq!(batch.drain_and_clear(), OutboundBatch::default());
        assert_eq!(batch.pending_len(), 0);
    }

    #[test]
    fn misuse_is_rejected_without_touching_batch() {
        let batch = CommandBatch::new();
        assert_eq!(
            batch.add_simple(Token::SetMode),
            Err(BatchError::PayloadRequired(Token::SetMode))
        );
        assert_eq!(
            batch.add_with_payload(Token::Gps, "now"),
            Err(BatchError::PayloadNotAccepted(Token::Gps))
        );
        assert!(batch.drain_and_clear().is_empty());
    }

    #[test]
    fn closed_batch_refuses_adds_until_reopened() {
        let batch = CommandBatch::new();
        batch.add_with_payload(Token::MtrCmd, "START").unwrap();

        let stale = batch.close();
        assert_eq!(stale.commands, vec![Token::MtrCmd]);
        assert_eq!(batch.add_simple(Token::Gps), Err(BatchError::Closed));
        assert_eq!(
            batch.add_with_payload(Token::ManKeyCmd, "F10"),
            Err(BatchError::Closed)
        );
        assert!(batch.drain_and_clear().is_empty());

        batch.reopen();
        batch.add_simple(Token::Gps).unwrap();
        assert_eq!(batch.drain_and_clear().commands, vec![Token::Gps]);
    }

    #[test]
    fn adds_racing_close_are_either_returned_or_refused() {
        const ADDS: usize = 5_000;

        let batch = CommandBatch::new();
        let producer = {
            let batch = batch.clone();
            thread::spawn(move || {
                (0..ADDS)
                    .filter(|_| batch.add_simple(Token::Imu).is_ok())
                    .count()
            })
        };
        while batch.pending_len() == 0 && !producer.is_finished() {
            thread::yield_now();
        }
        let returned = batch.close().commands.len();
        let accepted = producer.join().unwrap();

        assert_eq!(returned, accepted);
        assert_eq!(batch.pending_len(), 0);
    }

    #[test]
    fn concurrent_adds_are_never_lost_or_duplicated_across_drains() {
        const PRODUCERS: usize = 4;
        const ADDS: usize = 2_000;

        let batch = CommandBatch::new();
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|i| {
                let batch = batch.clone();
                thread::spawn(move || {
                    let token = if i % 2 == 0 { Token::Gps } else { Token::Imu };
                    for _ in 0..ADDS {
                        batch.add_simple(token).unwrap();
                    }
                })
            })
            .collect();

        let mut drained = 0usize;
        while handles.iter().any(|h| !h.is_finished()) {
            drained += batch.drain_and_clear().commands.len();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        drained += batch.drain_and_clear().commands.len();

        assert_eq!(drained, PRODUCERS * ADDS);
    }
}
