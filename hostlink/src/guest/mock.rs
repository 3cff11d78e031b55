//! Scripted guest driver for tests.

use std::collections::VecDeque;
use std::net::IpAddr;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use parking_lot::Mutex;

use super::{Driver, GuestBridge, GuestState};

struct Rule {
    needle: String,
    /// Replayed in order; the last outcome repeats once the queue is drained.
    outcomes: VecDeque<Result<String, String>>,
}

/// Records every command and answers from rules matched by substring.
///
/// Commands without a matching rule succeed with empty output.
pub struct MockDriver {
    state: Mutex<GuestState>,
    ip: IpAddr,
    host_ip: IpAddr,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GuestState::Running),
            ip: "192.168.99.100".parse().unwrap(),
            host_ip: "192.168.99.1".parse().unwrap(),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: GuestState) {
        *self.state.lock() = state;
    }

    /// Answer commands containing `needle` with `output`.
    pub fn on(&self, needle: &str, output: &str) -> &Self {
        self.on_sequence(needle, vec![Ok(output.to_string())])
    }

    pub fn on_sequence(&self, needle: &str, outcomes: Vec<Result<String, String>>) -> &Self {
        let mut rules = self.rules.lock();
        rules.retain(|r| r.needle != needle);
        rules.push(Rule {
            needle: needle.to_string(),
            outcomes: outcomes.into(),
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_containing(&self, needle: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.contains(needle))
            .cloned()
            .collect()
    }
}

impl GuestBridge for MockDriver {
    fn run(&self, cmd: &str) -> HostlinkResult<String> {
        self.calls.lock().push(cmd.to_string());

        let mut rules = self.rules.lock();
        let Some(rule) = rules.iter_mut().rev().find(|r| cmd.contains(&r.needle)) else {
            return Ok(String::new());
        };
        let outcome = if rule.outcomes.len() > 1 {
            rule.outcomes.pop_front()
        } else {
            rule.outcomes.front().cloned()
        };
        match outcome {
            Some(Ok(out)) => Ok(out),
            Some(Err(msg)) => Err(HostlinkError::Guest(msg)),
            None => Ok(String::new()),
        }
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn state(&self) -> HostlinkResult<GuestState> {
        Ok(*self.state.lock())
    }

    fn ip(&self) -> HostlinkResult<IpAddr> {
        Ok(self.ip)
    }

    fn host_ip(&self) -> HostlinkResult<IpAddr> {
        Ok(self.host_ip)
    }
}
