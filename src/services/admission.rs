//! Per-user admission control.
//!
//! Two limits gate every new task: the number of concurrency slots a user
//! holds, and the number of admissions inside a trailing window. Both are
//! checked and the slot reserved under the user's map entry lock, so two
//! racing submissions for one user cannot both take the last slot while
//! other users are never blocked.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::RejectReason;
use crate::domain::models::{AdmissionConfig, AnalysisTask};

/// Limits applied to each user.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    pub max_concurrent: u32,
    pub max_per_window: u32,
    pub window: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::from(&AdmissionConfig::default())
    }
}

impl From<&AdmissionConfig> for AdmissionPolicy {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_per_user,
            max_per_window: config.max_per_window,
            window: Duration::seconds(config.window_secs as i64),
        }
    }
}

/// Proof of admission handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionTicket {
    pub user_id: String,
    pub task_id: Uuid,
    pub slots: u32,
    pub admitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted(AdmissionTicket),
    Rejected(RejectReason),
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Current usage for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub slots_held: u32,
    pub admissions_in_window: u32,
}

#[derive(Debug, Default)]
struct UserWindow {
    /// Slots held per task.
    held: HashMap<Uuid, u32>,
    /// Admission log, oldest first.
    starts: VecDeque<(DateTime<Utc>, Uuid)>,
}

impl UserWindow {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while let Some((at, _)) = self.starts.front() {
            if *at <= cutoff {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    fn slots_held(&self) -> u32 {
        self.held.values().sum()
    }

    fn is_empty(&self) -> bool {
        self.held.is_empty() && self.starts.is_empty()
    }
}

/// Admission controller shared by the engine.
#[derive(Debug)]
pub struct AdmissionController {
    policy: AdmissionPolicy,
    users: DashMap<String, UserWindow>,
}

impl AdmissionController {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self { policy, users: DashMap::new() }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Decide whether `user` may start `task_id`, reserving `requested` slots
    /// on success. Concurrency is checked before rate.
    pub fn try_admit(&self, user: &str, task_id: Uuid, requested: u32) -> AdmissionDecision {
        self.try_admit_at(user, task_id, requested, Utc::now())
    }

    pub fn try_admit_at(
        &self,
        user: &str,
        task_id: Uuid,
        requested: u32,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let requested = requested.max(1);
        let mut entry = self.users.entry(user.to_string()).or_default();
        let window = entry.value_mut();
        window.prune(now, self.policy.window);

        if let Some(&slots) = window.held.get(&task_id) {
            debug!(user, %task_id, "task already admitted");
            return AdmissionDecision::Admitted(AdmissionTicket {
                user_id: user.to_string(),
                task_id,
                slots,
                admitted_at: now,
            });
        }

        if window.slots_held() + requested > self.policy.max_concurrent {
            warn!(user, held = window.slots_held(), "admission rejected: concurrency limit");
            return AdmissionDecision::Rejected(RejectReason::ConcurrencyLimit);
        }
        if window.starts.len() as u32 >= self.policy.max_per_window {
            warn!(user, admissions = window.starts.len(), "admission rejected: rate limit");
            return AdmissionDecision::Rejected(RejectReason::RateLimit);
        }

        window.held.insert(task_id, requested);
        window.starts.push_back((now, task_id));
        info!(user, %task_id, admitted_at = %now, "task admitted");

        AdmissionDecision::Admitted(AdmissionTicket {
            user_id: user.to_string(),
            task_id,
            slots: requested,
            admitted_at: now,
        })
    }

    /// Return the slot held by `task_id`. A second call is a no-op.
    pub fn release(&self, user: &str, task_id: Uuid) -> bool {
        let released = match self.users.get_mut(user) {
            Some(mut window) => window.held.remove(&task_id).is_some(),
            None => false,
        };
        if released {
            debug!(user, %task_id, "admission slot released");
            self.users.remove_if(user, |_, w| w.is_empty());
        }
        released
    }

    /// Release `task_id` without knowing its user.
    pub fn release_task(&self, task_id: Uuid) -> bool {
        let user = self
            .users
            .iter()
            .find(|entry| entry.held.contains_key(&task_id))
            .map(|entry| entry.key().clone());
        user.is_some_and(|user| self.release(&user, task_id))
    }

    /// Undo an admission whose task was never created. The admission also
    /// stops counting against the rate window.
    pub fn rollback(&self, user: &str, task_id: Uuid) {
        if let Some(mut window) = self.users.get_mut(user) {
            window.held.remove(&task_id);
            window.starts.retain(|(_, id)| *id != task_id);
        }
        self.users.remove_if(user, |_, w| w.is_empty());
        debug!(user, %task_id, "admission rolled back");
    }

    /// Rebuild all state from durable records: `active` tasks each hold one
    /// slot, `recent` tasks count as admissions at their creation time.
    pub fn rebuild(&self, active: &[AnalysisTask], recent: &[AnalysisTask]) {
        self.users.clear();
        for task in active.iter().filter(|t| !t.is_terminal()) {
            self.users.entry(task.user_id.clone()).or_default().held.insert(task.id, 1);
        }
        for task in recent {
            self.users
                .entry(task.user_id.clone())
                .or_default()
                .starts
                .push_back((task.created_at, task.id));
        }
        for mut window in self.users.iter_mut() {
            window.starts.make_contiguous().sort_by_key(|(at, _)| *at);
        }
        info!(active = active.len(), recent = recent.len(), "admission state rebuilt");
    }

    pub fn snapshot(&self, user: &str) -> AdmissionSnapshot {
        self.snapshot_at(user, Utc::now())
    }

    pub fn snapshot_at(&self, user: &str, now: DateTime<Utc>) -> AdmissionSnapshot {
        match self.users.get_mut(user) {
            Some(mut window) => {
                window.prune(now, self.policy.window);
                AdmissionSnapshot {
                    slots_held: window.slots_held(),
                    admissions_in_window: window.starts.len() as u32,
                }
            }
            None => AdmissionSnapshot::default(),
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionPolicy::default())
    }
}
