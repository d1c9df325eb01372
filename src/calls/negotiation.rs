//! Candidate-gathering debounce.
//!
//! Each candidate re-arms a short quiet-period deadline. When a deadline
//! expires without being re-armed, the window settles (once per call) and the
//! owner sends its description. A separate ceiling bounds how long a call may
//! stay unsettled at all.
//!
//! Timers never touch the call. They only post a [`NegotiationSignal`] tagged
//! with the generation that armed them; the owner feeds the signal back into
//! [`NegotiationWindow::on_deadline`] / [`NegotiationWindow::on_ceiling`] on
//! its own control sequence, where stale generations are discarded.

use super::CallId;
use crate::media::IceCandidate;
use log::{debug, trace};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_NEGOTIATION_WINDOW: Duration = Duration::from_millis(300);
pub const DEFAULT_NEGOTIATION_CEILING: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Quiet period elapsed.
    Deadline { fired_at: Instant },
    /// Hard ceiling elapsed.
    Ceiling,
}

/// Posted by a timer task when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationSignal {
    pub call_id: CallId,
    pub generation: u64,
    pub kind: SignalKind,
}

/// Emitted exactly once per call, when the window settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationReady {
    pub call_id: CallId,
    pub last_candidate: IceCandidate,
    pub candidate_count: usize,
    pub fired_at: Instant,
}

pub struct NegotiationWindow {
    call_id: CallId,
    window: Duration,
    ceiling: Duration,
    signals: mpsc::UnboundedSender<NegotiationSignal>,
    deadline: Option<JoinHandle<()>>,
    ceiling_timer: Option<JoinHandle<()>>,
    generation: u64,
    last_candidate: Option<IceCandidate>,
    candidate_count: usize,
    settled: bool,
}

impl std::fmt::Debug for NegotiationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationWindow")
            .field("call_id", &self.call_id)
            .field("window", &self.window)
            .field("deadline_armed", &self.deadline.is_some())
            .field("ceiling_armed", &self.ceiling_timer.is_some())
            .field("generation", &self.generation)
            .field("candidate_count", &self.candidate_count)
            .field("settled", &self.settled)
            .finish()
    }
}

impl NegotiationWindow {
    pub fn new(
        call_id: CallId,
        window: Duration,
        ceiling: Duration,
        signals: mpsc::UnboundedSender<NegotiationSignal>,
    ) -> Self {
        Self {
            call_id,
            window,
            ceiling,
            signals,
            deadline: None,
            ceiling_timer: None,
            generation: 0,
            last_candidate: None,
            candidate_count: 0,
            settled: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn last_candidate(&self) -> Option<&IceCandidate> {
        self.last_candidate.as_ref()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    pub fn is_deadline_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arm the hard ceiling. No-op once settled or already armed.
    pub fn start_ceiling(&mut self) {
        if self.settled || self.ceiling_timer.is_some() {
            return;
        }
        let signal = NegotiationSignal {
            call_id: self.call_id.clone(),
            generation: self.generation,
            kind: SignalKind::Ceiling,
        };
        self.ceiling_timer = Some(spawn_timer(self.ceiling, self.signals.clone(), move || signal));
    }

    /// Record a candidate and re-arm the deadline. Returns false when the
    /// window has already settled (the candidate is still counted).
    pub fn on_candidate(&mut self, candidate: IceCandidate) -> bool {
        self.candidate_count += 1;
        self.last_candidate = Some(candidate);
        if self.settled {
            trace!(target: "Session/Negotiation", "Call {} already settled, candidate not re-arming", self.call_id);
            return false;
        }
        self.rearm();
        true
    }

    /// Cancel any pending deadline and schedule a new one at `now + window`.
    pub fn rearm(&mut self) {
        if self.settled {
            return;
        }
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
        self.generation += 1;
        let call_id = self.call_id.clone();
        let generation = self.generation;
        self.deadline = Some(spawn_timer(self.window, self.signals.clone(), move || {
            NegotiationSignal {
                call_id,
                generation,
                kind: SignalKind::Deadline {
                    fired_at: Instant::now(),
                },
            }
        }));
    }

    /// Feed back a deadline signal. Returns the ready event the first time a
    /// current-generation deadline fires with a candidate recorded.
    pub fn on_deadline(&mut self, generation: u64, fired_at: Instant) -> Option<NegotiationReady> {
        if self.settled || generation != self.generation || self.deadline.is_none() {
            debug!(
                target: "Session/Negotiation",
                "Ignoring stale deadline for call {} (gen {}, current {}, settled {})",
                self.call_id, generation, self.generation, self.settled
            );
            return None;
        }
        let last_candidate = self.last_candidate.clone()?;
        self.deadline = None;
        self.settled = true;
        if let Some(handle) = self.ceiling_timer.take() {
            handle.abort();
        }
        debug!(
            target: "Session/Negotiation",
            "Call {} settled after {} candidates",
            self.call_id, self.candidate_count
        );
        Some(NegotiationReady {
            call_id: self.call_id.clone(),
            last_candidate,
            candidate_count: self.candidate_count,
            fired_at,
        })
    }

    /// Feed back a ceiling signal. Returns true when the call should give up.
    pub fn on_ceiling(&mut self) -> bool {
        if self.settled || self.ceiling_timer.take().is_none() {
            return false;
        }
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
        self.generation += 1;
        true
    }

    /// Cancel every pending timer. Signals already in flight become stale.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
        if let Some(handle) = self.ceiling_timer.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Route a signal to the matching handler.
    pub fn on_signal(&mut self, signal: &NegotiationSignal) -> WindowOutcome {
        match signal.kind {
            SignalKind::Deadline { fired_at } => match self.on_deadline(signal.generation, fired_at) {
                Some(ready) => WindowOutcome::Ready(ready),
                None => WindowOutcome::Nothing,
            },
            SignalKind::Ceiling => {
                if self.on_ceiling() {
                    WindowOutcome::Expired
                } else {
                    WindowOutcome::Nothing
                }
            }
        }
    }
}

impl Drop for NegotiationWindow {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Result of feeding a signal into the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    Nothing,
    Ready(NegotiationReady),
    Expired,
}

fn spawn_timer<F>(
    after: Duration,
    signals: mpsc::UnboundedSender<NegotiationSignal>,
    make_signal: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> NegotiationSignal + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = signals.send(make_signal());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);
    const CEILING: Duration = Duration::from_secs(10);

    fn window() -> (NegotiationWindow, mpsc::UnboundedReceiver<NegotiationSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            NegotiationWindow::new(CallId::new("U1"), WINDOW, CEILING, tx),
            rx,
        )
    }

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"))
    }

    /// Drains every signal that has fired so far and feeds it back.
    fn pump(
        window: &mut NegotiationWindow,
        rx: &mut mpsc::UnboundedReceiver<NegotiationSignal>,
    ) -> Vec<WindowOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            outcomes.push(window.on_signal(&signal));
        }
        outcomes
    }

    fn ready_events(outcomes: &[WindowOutcome]) -> Vec<NegotiationReady> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                WindowOutcome::Ready(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Sleep on the paused clock. Auto-advance wakes earlier timers at their
    /// exact deadlines, so their `Instant::now()` is precise.
    async fn advance(by: Duration) {
        tokio::time::sleep(by).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_settles_once_after_last_candidate() {
        let (mut w, mut rx) = window();
        let start = Instant::now();
        let mut outcomes = Vec::new();

        for n in 0..5 {
            w.on_candidate(candidate(n));
            advance(Duration::from_millis(100)).await;
            outcomes.extend(pump(&mut w, &mut rx));
        }
        let last_candidate_at = start + Duration::from_millis(400);

        advance(Duration::from_millis(250)).await;
        outcomes.extend(pump(&mut w, &mut rx));

        let ready = ready_events(&outcomes);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].fired_at, last_candidate_at + WINDOW);
        assert_eq!(ready[0].last_candidate, candidate(4));
        assert_eq!(ready[0].candidate_count, 5);
        assert!(w.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_is_monotonic_across_spaced_candidates() {
        let (mut w, mut rx) = window();
        let mut outcomes = Vec::new();

        w.on_candidate(candidate(1));
        advance(Duration::from_millis(350)).await;
        outcomes.extend(pump(&mut w, &mut rx));
        assert!(w.is_settled());

        assert!(!w.on_candidate(candidate(2)));
        advance(Duration::from_millis(350)).await;
        outcomes.extend(pump(&mut w, &mut rx));

        let ready = ready_events(&outcomes);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].last_candidate, candidate(1));
        assert_eq!(w.last_candidate(), Some(&candidate(2)));
        assert_eq!(w.candidate_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_candidates_no_emission() {
        let (mut w, mut rx) = window();
        advance(Duration::from_secs(1)).await;
        assert!(pump(&mut w, &mut rx).is_empty());
        assert!(!w.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_expires_without_candidates() {
        let (mut w, mut rx) = window();
        w.start_ceiling();

        advance(CEILING + Duration::from_millis(1)).await;
        let outcomes = pump(&mut w, &mut rx);
        assert_eq!(outcomes, vec![WindowOutcome::Expired]);
        assert!(!w.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settling_cancels_ceiling() {
        let (mut w, mut rx) = window();
        w.start_ceiling();
        w.on_candidate(candidate(1));

        advance(WINDOW + Duration::from_millis(1)).await;
        assert_eq!(ready_events(&pump(&mut w, &mut rx)).len(), 1);

        advance(CEILING).await;
        assert!(pump(&mut w, &mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_makes_in_flight_signals_stale() {
        let (mut w, mut rx) = window();
        w.on_candidate(candidate(1));
        advance(WINDOW + Duration::from_millis(1)).await;

        // The deadline already posted its signal; cancelling must still win.
        w.cancel();
        assert!(ready_events(&pump(&mut w, &mut rx)).is_empty());
        assert!(!w.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timers() {
        let (mut w, mut rx) = window();
        w.start_ceiling();
        w.on_candidate(candidate(1));
        drop(w);

        advance(CEILING * 2).await;
        assert!(rx.try_recv().is_err());
    }
}
