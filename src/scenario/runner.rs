//! Scenario execution
//!
//! `run_scenario` executes one scenario on the calling thread. A harness that
//! needs to connect while the scenario listens uses `spawn_scenario` and the
//! returned `ScenarioHandle` instead.

use super::Scenario;
use crate::config::RunConfig;
use crate::report::ScenarioReport;
use crate::transport::{ProbeTransport, Wait};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Run one scenario to completion on the current thread
pub fn run_scenario(scenario: &dyn Scenario, config: &RunConfig) -> ScenarioReport {
    execute(scenario, config, &AtomicBool::new(false), |_| {})
}

fn execute(
    scenario: &dyn Scenario,
    config: &RunConfig,
    cancel: &AtomicBool,
    on_listening: impl FnOnce(SocketAddr),
) -> ScenarioReport {
    let span = tracing::info_span!("scenario", id = scenario.id(), name = scenario.name());
    let _enter = span.enter();
    let started = Instant::now();

    let setup = match scenario.configure(config) {
        Ok(setup) => setup,
        Err(e) => {
            tracing::warn!(error = %e, "scenario not ready");
            return ScenarioReport::not_ready(scenario, e, started.elapsed());
        }
    };

    let transport = match ProbeTransport::listen(config.endpoint(), setup.tls.clone()) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!(error = %e, "scenario not ready");
            return ScenarioReport::not_ready(scenario, e, started.elapsed());
        }
    };

    on_listening(transport.local_addr());

    let observation = transport.probe_once(cancel);
    // Release the port before anyone acts on the result
    drop(transport);

    let observation = match observation {
        Ok(observation) => observation,
        Err(e) => {
            tracing::warn!(error = %e, "session could not be run");
            return ScenarioReport::not_ready(scenario, e, started.elapsed());
        }
    };

    let code = scenario.classify(&setup, &observation);
    tracing::info!(%code, %observation, "scenario finished");
    ScenarioReport::new(scenario, code, observation.to_string(), started.elapsed())
}

enum Event {
    Listening(SocketAddr),
    Finished(ScenarioReport),
}

/// A scenario running on its own thread.
///
/// Dropping the handle cancels a pending accept and joins the thread, so the
/// listener never outlives the handle.
pub struct ScenarioHandle {
    events: Receiver<Event>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    listening: Option<SocketAddr>,
    report: Option<ScenarioReport>,
}

/// Start `scenario` on a new thread
pub fn spawn_scenario(
    scenario: Arc<dyn Scenario>,
    config: RunConfig,
) -> io::Result<ScenarioHandle> {
    let (tx, events) = mpsc::channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let thread_cancel = Arc::clone(&cancel);

    let thread = thread::Builder::new()
        .name(format!("scenario-{}", scenario.id()))
        .spawn(move || {
            let listening = tx.clone();
            let report = execute(scenario.as_ref(), &config, &thread_cancel, move |addr| {
                let _ = listening.send(Event::Listening(addr));
            });
            let _ = tx.send(Event::Finished(report));
        })?;

    Ok(ScenarioHandle {
        events,
        cancel,
        thread: Some(thread),
        listening: None,
        report: None,
    })
}

impl ScenarioHandle {
    /// Wait until the probe is accepting connections.
    ///
    /// `PeerClosed` means the scenario finished without ever listening (it
    /// was not ready); its report is then available from `wait`.
    pub fn wait_listening(&mut self, timeout: Duration) -> Wait<SocketAddr> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(addr) = self.listening {
                return Wait::Completed(addr);
            }
            if self.report.is_some() {
                return Wait::PeerClosed;
            }
            match self.next_event(deadline) {
                Wait::Completed(()) => {}
                Wait::TimedOut => return Wait::TimedOut,
                Wait::PeerClosed => return Wait::PeerClosed,
            }
        }
    }

    /// Wait for the scenario's report.
    ///
    /// `PeerClosed` means the scenario thread died without reporting.
    pub fn wait(&mut self, timeout: Duration) -> Wait<ScenarioReport> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(report) = &self.report {
                return Wait::Completed(report.clone());
            }
            match self.next_event(deadline) {
                Wait::Completed(()) => {}
                Wait::TimedOut => return Wait::TimedOut,
                Wait::PeerClosed => return Wait::PeerClosed,
            }
        }
    }

    /// Stop waiting for a client; a session already running finishes normally
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn next_event(&mut self, deadline: Instant) -> Wait<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.events.recv_timeout(remaining) {
            Ok(Event::Listening(addr)) => {
                self.listening = Some(addr);
                Wait::Completed(())
            }
            Ok(Event::Finished(report)) => {
                self.report = Some(report);
                Wait::Completed(())
            }
            Err(RecvTimeoutError::Timeout) => Wait::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Wait::PeerClosed,
        }
    }
}

impl Drop for ScenarioHandle {
    fn drop(&mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("scenario thread panicked");
            }
        }
    }
}
