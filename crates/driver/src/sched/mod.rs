//! Priority scheduler and the main scheduling loop.
//!
//! Workload selection happens in two steps:
//! 1. **Priority pick:** a window lottery over the non-empty priorities.
//!    All-zero windows degrade to strict priority; a single non-empty
//!    priority short-circuits. The MT19937 draw keeps decisions
//!    reproducible per seed.
//! 2. **Session pick:** per-priority round robin over a cyclic session
//!    list, rotated after every successful schedule so the session after
//!    the scheduled one leads the next pass.
//!
//! The loop keeps scheduling until the ledger cannot accept more work or no
//! command could be placed.

pub mod ledger;

use tracing::debug;

use crate::common::MAX_PRIORITIES;
use crate::config::LowLatency;
use crate::device::{CmdRef, Device, DoCmdStatus};
use crate::io::Platform;
use crate::session::SessionId;

impl<P: Platform> Device<P> {
    /// Picks the next priority to serve, or `None` when every queue is
    /// empty.
    pub(crate) fn scheduler_get_priority(&mut self) -> Option<u8> {
        let mut ret_pri = 0u8;
        let mut pri_count = 0u32;
        let mut curr_window = 0u32;

        for pri in 0..MAX_PRIORITIES {
            if self.pri_q_counters[pri] > 0 {
                curr_window += self.config.pri_windows[pri];
                ret_pri = pri as u8;
                pri_count += 1;
            }
        }

        if pri_count == 0 {
            return None;
        }
        // A single non-empty priority needs no draw.
        if pri_count == 1 {
            return Some(ret_pri);
        }
        // Zero windows: strict priority, highest non-empty wins.
        if curr_window == 0 {
            return Some(ret_pri);
        }

        // Starvation avoidance: lottery weighted by the window sizes.
        let rand_val = self.rng.gen_range(0, curr_window);
        let mut curr_limit = 0u32;
        for pri in 0..MAX_PRIORITIES {
            if self.pri_q_counters[pri] > 0 {
                curr_limit += self.config.pri_windows[pri];
                if rand_val <= curr_limit {
                    return Some(pri as u8);
                }
            }
        }
        Some(ret_pri)
    }

    /// Rotates the per-priority session list so `session` leads the next
    /// scheduling pass.
    pub(crate) fn set_starting_session(&mut self, priority: u8, session: SessionId) {
        let queue = &mut self.sched_sessions[priority as usize];
        if let Some(pos) = queue.iter().position(|s| *s == session) {
            queue.rotate_left(pos);
        }
    }

    /// The main scheduling loop.
    ///
    /// Iterates priorities and sessions, dispatching every command it can
    /// place, with opportunistic power management woven in.
    pub(crate) fn scheduler_loop(&mut self) {
        let low_latency = self.config.low_latency != LowLatency::Disabled;

        if !self.ledger.capacity_available(low_latency) {
            // Postpone: nothing can be scheduled at the moment.
            debug!("nothing can be scheduled at the moment, postponing");
            return;
        }

        loop {
            let mut scheduled = false;
            let Some(current_pri) = self.scheduler_get_priority() else {
                break;
            };

            let order: Vec<SessionId> = self.sched_sessions[current_pri as usize]
                .iter()
                .copied()
                .collect();

            'sessions: for (idx, &session_id) in order.iter().enumerate() {
                let cmd_ids: Vec<u32> = match self.sessions.get(&session_id) {
                    Some(session) => session.cmds[current_pri as usize]
                        .iter()
                        .map(|c| c.user.cmd_id)
                        .collect(),
                    None => continue,
                };

                for cmd_id in cmd_ids {
                    // Power down idle cores while walking the queues.
                    self.apm_or_stop();

                    let r = CmdRef {
                        session: session_id,
                        cmd_id,
                        priority: current_pri,
                    };
                    // Skip workloads already holding a scheduling slot.
                    if self.cmd(r).is_some_and(|c| c.holds_hw_slot()) {
                        continue;
                    }

                    match self.do_cmd(r) {
                        DoCmdStatus::Ok => {
                            scheduled = true;
                            if let Some((rolled_back, submit_ns)) =
                                self.cmd(r).map(|c| (c.rolled_back, c.submit_ns))
                            {
                                if !rolled_back {
                                    let span = self.io.now_ns().saturating_sub(submit_ns);
                                    self.stats.update_sched_mean(current_pri, span);
                                }
                            }
                            // Round robin: the session after this one leads
                            // the next pass.
                            let next = order[(idx + 1) % order.len()];
                            self.set_starting_session(current_pri, next);
                            break 'sessions;
                        }
                        DoCmdStatus::HwBusy => {
                            // Blocked session retries first next pass.
                            self.set_starting_session(current_pri, session_id);
                            break 'sessions;
                        }
                        DoCmdStatus::InHw | DoCmdStatus::WaitInbufs | DoCmdStatus::Done => {}
                    }
                }
            }

            // Iterate until a workload was scheduled and no other can be.
            if !(self.ledger.capacity_available(low_latency) && scheduled) {
                break;
            }
        }

        // Power down whatever ended up idle.
        self.apm_or_stop();
    }
}
