//! The accelerator device: ownership root and workload dispatcher.
//!
//! One `Device` exists per physical accelerator. It owns the register I/O,
//! hardware properties, the resource ledger, all sessions, the pend/queued
//! slots of every Workload Manager, the interrupt accumulator and the
//! statistics block. It provides:
//! 1. **Probing:** hardware property discovery from the ID registers.
//! 2. **Sessions:** add/remove with MMU context refcounting.
//! 3. **Command lifecycle:** enqueue validation, rollback, completion,
//!    cancel-by-id-mask.
//! 4. **Dispatch:** ledger allocation, hardware programming and the kick
//!    onto the assigned Workload Manager.
//!
//! # Concurrency
//!
//! The embedder serializes every call on one device (the "device lock").
//! The interrupt top half is the only entry point safe to call from IRQ
//! context; see [`crate::hw::irq`].

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, error, info, warn};

use crate::common::error::{errno, rsp_err};
use crate::common::mt19937::Mt19937;
use crate::common::{CoreError, MAX_ALT_ADDRS, MAX_CORES, MAX_PRIORITIES};
use crate::config::{Config, LowLatency};
use crate::hw::irq::IrqStatus;
use crate::hw::wm;
use crate::io::{PdumpSink, Platform, RegIo};
use crate::mmu::{self, MmuState};
use crate::regs;
use crate::sched::ledger::Ledger;
use crate::session::{
    BufStatus, Cmd, MemCtx, MmuContext, Response, Session, SessionId, SubmitMulti,
    CMD_FLAG_CHECK_CRC, MMU_REQ_IO, MMU_REQ_MODEL,
};
use crate::stats::DevStats;

/// BVNC hardware variant identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bvnc {
    /// Branch.
    pub branch: u16,
    /// Version.
    pub version: u16,
    /// Number of variants.
    pub number: u16,
    /// Configuration, build-variant bits cleared.
    pub config: u16,
}

/// Hardware properties, immutable after probe.
#[derive(Clone, Copy, Debug, Default)]
pub struct HwProps {
    /// Number of compute cores and WMs.
    pub num_cores: u8,
    /// Local on-chip memory size in bytes.
    pub locm_size_bytes: u64,
    /// Shared on-chip memory size in bytes.
    pub socm_size_bytes: u64,
    /// Per-core SOCM chunk size in bytes.
    pub socm_core_size_bytes: u64,
    /// MMU address width (32 or 40).
    pub mmu_width: u8,
    /// Hardware variant identifier.
    pub core_id: Bvnc,
    /// Register/PTE parity protection available.
    pub supports_parity: bool,
    /// RTM debug facility available.
    pub supports_rtm: bool,
    /// Raw product id.
    pub product_id: u64,
}

/// Power state of the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerState {
    /// Register bank unpowered or clock-gated.
    #[default]
    Off,
    /// Device operational.
    On,
}

/// Non-owning handle to a command sitting in a session queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmdRef {
    /// Owning session.
    pub session: SessionId,
    /// User command id.
    pub cmd_id: u32,
    /// Priority queue holding the command.
    pub priority: u8,
}

/// Per-core APM (active power management) delayed stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApmWork {
    /// Core this work powers down.
    pub core_mask: u8,
    /// Absolute deadline; `None` when not armed.
    pub deadline_ns: Option<u64>,
}

/// Optional event hooks for tooling and tests.
#[derive(Default)]
pub struct Observers {
    /// A command was accepted into a session queue.
    pub enqueued: Option<Box<dyn FnMut(SessionId, u32, u8) + Send>>,
    /// A command was kicked onto hardware.
    pub submitted: Option<Box<dyn FnMut(SessionId, u32, u8) + Send>>,
    /// A command completed (status carries the raw error image).
    pub completed: Option<Box<dyn FnMut(SessionId, u32, u64) + Send>>,
    /// Commands were cancelled.
    pub cancelled: Option<Box<dyn FnMut(SessionId, u32) + Send>>,
    /// An error was decoded for a command (or `None` when idle).
    pub error: Option<Box<dyn FnMut(SessionId, Option<u32>, u64) + Send>>,
}

impl core::fmt::Debug for Observers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Observers").finish_non_exhaustive()
    }
}

/// Outcome of one scheduling attempt on a single command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoCmdStatus {
    /// Kicked (or queued) onto hardware.
    Ok,
    /// Already in hardware; nothing to do.
    InHw,
    /// Input buffers not filled yet.
    WaitInbufs,
    /// No resources available right now.
    HwBusy,
    /// Completed immediately (bypass or failure); command consumed.
    Done,
}

/// One accelerator instance.
pub struct Device<P: Platform> {
    pub(crate) io: RegIo<P>,
    pub(crate) props: HwProps,
    pub(crate) config: Config,
    pub(crate) state: PowerState,
    pub(crate) active_core_mask: u8,
    pub(crate) full_core_mask: u8,
    pub(crate) apm_core_mask: u8,
    pub(crate) apm_works: [ApmWork; MAX_CORES],
    pub(crate) wm_core_assignment: u64,
    pub(crate) ledger: Ledger,
    pub(crate) sessions: BTreeMap<SessionId, Session>,
    pub(crate) sched_sessions: [VecDeque<SessionId>; MAX_PRIORITIES],
    pub(crate) pendcmd: [Option<CmdRef>; MAX_CORES],
    pub(crate) queuedcmd: [Option<CmdRef>; MAX_CORES],
    pub(crate) pri_q_counters: [u32; MAX_PRIORITIES],
    pub(crate) irq_status: IrqStatus,
    pub(crate) stats: DevStats,
    pub(crate) rng: Mt19937,
    pub(crate) mmu: MmuState,
    pub(crate) wm_cmd_id_count: u16,
    pub(crate) scheduling_counter: usize,
    pub(crate) do_calibration: bool,
    pub(crate) hw_bypass: u32,
    pub(crate) hw_dead_warned: bool,
    pub(crate) sched_pending: bool,
    pub(crate) observers: Observers,
    next_session_id: SessionId,
    next_mmu_sw_ctx: u32,
}

impl<P: Platform> Device<P> {
    /// Probes the hardware and builds a device in the powered-off state.
    ///
    /// The register bank must be accessible; runtime-PM bring-up belongs to
    /// the platform layer.
    pub fn probe(
        platform: P,
        pdump: Box<dyn PdumpSink + Send>,
        mut config: Config,
    ) -> Result<Self, CoreError> {
        config.sanitize();
        let mut io = RegIo::new(platform, pdump);

        let product_id = io.read64(regs::PRODUCT_ID);
        if product_id == regs::DEAD_HW || product_id == u64::MAX {
            return Err(CoreError::HwDead);
        }
        let core_id = io.read64(regs::CORE_ID) & regs::CORE_ID_BVNC_CLRMSK;
        let ip = io.read64(regs::CORE_IP_CONFIG);
        let ip1 = io.read64(regs::CORE_IP_CONFIG1);

        let num_cores = regs::get_field(
            ip,
            regs::CORE_IP_CONFIG_NUM_CORES_SHIFT,
            regs::CORE_IP_CONFIG_NUM_CORES_MASK,
        )
        .clamp(1, MAX_CORES as u64) as u8;

        let props = HwProps {
            num_cores,
            locm_size_bytes: regs::get_field(
                ip1,
                regs::CORE_IP_CONFIG1_LOCM_KB_SHIFT,
                regs::CORE_IP_CONFIG1_LOCM_KB_MASK,
            ) << 10,
            socm_size_bytes: regs::get_field(
                ip1,
                regs::CORE_IP_CONFIG1_SOCM_KB_SHIFT,
                regs::CORE_IP_CONFIG1_SOCM_KB_MASK,
            ) << 10,
            socm_core_size_bytes: regs::get_field(
                ip1,
                regs::CORE_IP_CONFIG1_SOCM_CORE_KB_SHIFT,
                regs::CORE_IP_CONFIG1_SOCM_CORE_KB_MASK,
            ) << 10,
            mmu_width: regs::get_field(
                ip,
                regs::CORE_IP_CONFIG_MMU_WIDTH_SHIFT,
                regs::CORE_IP_CONFIG_MMU_WIDTH_MASK,
            ) as u8,
            core_id: Bvnc {
                branch: (core_id >> regs::CORE_ID_BRANCH_SHIFT) as u16,
                version: (core_id >> regs::CORE_ID_VERSION_SHIFT) as u16,
                number: (core_id >> regs::CORE_ID_NUMBER_SHIFT) as u16,
                config: (core_id >> regs::CORE_ID_CONFIG_SHIFT) as u16,
            },
            supports_parity: ip & regs::CORE_IP_CONFIG_PARITY_EN != 0,
            supports_rtm: ip & regs::CORE_IP_CONFIG_RTM_EN != 0,
            product_id,
        };

        io.parity = props.supports_parity && !config.parity_disable;
        io.inject_parity_err_reg = config.fault_inject.parity_poll_err_reg;

        info!(
            num_cores = props.num_cores,
            bvnc = ?props.core_id,
            parity = io.parity,
            "device probed"
        );

        let full_core_mask = if num_cores as usize >= MAX_CORES {
            0xff
        } else {
            (1u8 << num_cores) - 1
        };

        Ok(Self {
            io,
            props,
            state: PowerState::Off,
            active_core_mask: 0,
            full_core_mask,
            apm_core_mask: 0,
            apm_works: [ApmWork::default(); MAX_CORES],
            wm_core_assignment: regs::ASSIGNMENT_ALL_UNALLOCATED,
            ledger: Ledger::new(num_cores),
            sessions: BTreeMap::new(),
            sched_sessions: Default::default(),
            pendcmd: [None; MAX_CORES],
            queuedcmd: [None; MAX_CORES],
            pri_q_counters: [0; MAX_PRIORITIES],
            irq_status: IrqStatus::default(),
            stats: DevStats::default(),
            rng: Mt19937::new(config.sched_rng_seed),
            mmu: MmuState::default(),
            wm_cmd_id_count: 0,
            scheduling_counter: 0,
            do_calibration: config.do_calibration,
            hw_bypass: config.hw_bypass,
            hw_dead_warned: false,
            sched_pending: false,
            observers: Observers::default(),
            next_session_id: 0,
            next_mmu_sw_ctx: 0,
            config,
        })
    }

    /// Hardware properties.
    pub fn props(&self) -> &HwProps {
        &self.props
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Statistics block.
    pub fn stats(&self) -> &DevStats {
        &self.stats
    }

    /// Resource ledger (read-only view).
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Current power state.
    pub fn power_state(&self) -> PowerState {
        self.state
    }

    /// Measured clock frequency, if calibration has run.
    pub fn freq_khz(&self) -> Option<u32> {
        self.io.freq_khz
    }

    /// Whether the one-shot clock calibration is still pending.
    pub fn calibration_pending(&self) -> bool {
        self.do_calibration
    }

    /// Installs event observers.
    pub fn set_observers(&mut self, observers: Observers) {
        self.observers = observers;
    }

    /// Borrows a session.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Borrows a session mutably (buffer registration, status updates).
    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Whether any core is currently processing.
    pub fn is_busy(&self) -> bool {
        self.ledger.any_busy()
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Creates a session with the given collaborator capabilities.
    ///
    /// `pc_baddrs` are the physical page-catalogue bases of the model and IO
    /// software contexts.
    pub fn add_session(
        &mut self,
        mem_ctx: Box<dyn MemCtx + Send>,
        mmu_ctx: Box<dyn MmuContext + Send>,
        pc_baddrs: [u64; 2],
    ) -> Result<SessionId, CoreError> {
        self.next_session_id += 1;
        let id = self.next_session_id;
        let mut session = Session::new(id);
        session.mem_ctx = mem_ctx;
        session.mmu = mmu_ctx;

        let model_hw = self.mmu.acquire_ctx()?;
        let io_hw = if self.config.mmu_ctx_mirrored {
            model_hw
        } else {
            self.mmu.acquire_ctx()?
        };
        for (idx, (hw_id, pc_baddr)) in [(model_hw, pc_baddrs[0]), (io_hw, pc_baddrs[1])]
            .into_iter()
            .enumerate()
        {
            self.next_mmu_sw_ctx += 1;
            session.mmu_ctxs[idx].id = self.next_mmu_sw_ctx;
            session.mmu_ctxs[idx].hw_id = hw_id;
            session.mmu_ctxs[idx].pc_baddr = pc_baddr;
        }

        debug!(
            session = id,
            model_ctx = model_hw,
            io_ctx = io_hw,
            "session added"
        );
        self.sessions.insert(id, session);
        for pri in 0..MAX_PRIORITIES {
            self.sched_sessions[pri].push_back(id);
        }
        Ok(id)
    }

    /// Tears a session down: rolls back its in-flight workloads, drops its
    /// queued commands and releases its MMU contexts.
    pub fn rm_session(&mut self, id: SessionId) -> Result<(), CoreError> {
        if !self.sessions.contains_key(&id) {
            return Err(CoreError::UnknownSession(id));
        }
        let reschedule = self.rm_session_cmds(id);

        let Some(session) = self.sessions.remove(&id) else {
            return Err(CoreError::UnknownSession(id));
        };
        self.mmu.release_ctx(session.mmu_ctxs[MMU_REQ_MODEL].hw_id);
        if !self.config.mmu_ctx_mirrored {
            self.mmu.release_ctx(session.mmu_ctxs[MMU_REQ_IO].hw_id);
        }
        if self.mmu.active_ctx == Some(session.mmu_ctxs[MMU_REQ_MODEL].id) {
            self.mmu.active_ctx = None;
        }
        for q in &mut self.sched_sessions {
            q.retain(|s| *s != id);
        }
        debug!(session = id, "session removed");

        if reschedule {
            if let Err(err) = self.dev_stop(true) {
                warn!(%err, "device stop after session teardown failed");
            }
            self.kick_worker();
        }
        self.run_worker();
        Ok(())
    }

    /// Rolls back and deletes every command of a dying session.
    ///
    /// Returns `true` when an in-flight workload was rolled back and the
    /// scheduler should re-run.
    fn rm_session_cmds(&mut self, id: SessionId) -> bool {
        let mut reschedule = false;
        for wm_id in 0..self.props.num_cores {
            let w = wm_id as usize;
            let pend_removed = self.pendcmd[w].is_some_and(|r| r.session == id);
            let queued_removed = self.queuedcmd[w].is_some_and(|r| r.session == id);
            if pend_removed {
                warn!(session = id, wm_id, "removing session with pending workload");
            }

            let sched_info = if queued_removed {
                self.queuedcmd[w].and_then(|r| self.cmd(r).and_then(|c| c.sched_info))
            } else if pend_removed {
                self.pendcmd[w].and_then(|r| self.cmd(r).and_then(|c| c.sched_info))
            } else {
                None
            };

            // If only the pending workload dies, the queued one (from another
            // session) becomes the next scheduling starting point.
            if let (true, false, Some(qref)) = (pend_removed, queued_removed, self.queuedcmd[w]) {
                self.set_starting_session(qref.priority, qref.session);
            }

            if pend_removed || queued_removed {
                if let Some(info) = sched_info {
                    if let Err(err) = wm::wm_reset(&mut self.io, &info) {
                        warn!(wm_id, %err, "WM reset during session teardown failed");
                    }
                }
                self.clear_wm_irq_state(wm_id);
                self.rollback_wm_cmds(wm_id, true);
                reschedule = true;
            }
        }

        // Drop everything still queued, including rolled-back commands.
        if let Some(session) = self.sessions.get_mut(&id) {
            for pri in 0..MAX_PRIORITIES {
                while let Some(cmd) = session.cmds[pri].pop_front() {
                    let _ = cmd;
                    self.pri_q_counters[pri] = self.pri_q_counters[pri].saturating_sub(1);
                }
            }
        }
        reschedule
    }

    /// Clears accumulated interrupt state of one WM and re-enables its
    /// events after a reset that bypassed normal handling.
    pub(crate) fn clear_wm_irq_state(&mut self, wm_id: u8) {
        let wm_bit = regs::set_field(
            u64::from(crate::common::id_to_mask(wm_id)),
            regs::HOST_EVENT_SOURCE_WM_SHIFT,
            regs::HOST_EVENT_SOURCE_WM_MASK,
        );
        self.io.select_wm(wm_id);
        if self.irq_status.event_source & wm_bit != 0 {
            self.irq_status.event_source &= !wm_bit;
            let events = self.irq_status.wm_events[wm_id as usize] & regs::WM_EVENTS_DEFAULT;
            self.io.write64(regs::WM_EVENT_CLEAR, events);
            self.irq_status.wm_events[wm_id as usize] = 0;
        }
        self.io.write64(regs::WM_EVENT_ENABLE, regs::WM_EVENTS_DEFAULT);
    }

    // -----------------------------------------------------------------------
    // Command lookup plumbing
    // -----------------------------------------------------------------------

    pub(crate) fn cmd(&self, r: CmdRef) -> Option<&Cmd> {
        self.sessions.get(&r.session)?.cmds[r.priority as usize]
            .iter()
            .find(|c| c.user.cmd_id == r.cmd_id)
    }

    pub(crate) fn cmd_mut(&mut self, r: CmdRef) -> Option<&mut Cmd> {
        self.sessions.get_mut(&r.session)?.cmds[r.priority as usize]
            .iter_mut()
            .find(|c| c.user.cmd_id == r.cmd_id)
    }

    /// Removes a command from its session queue and parks its response (if
    /// any) on the session response list.
    pub(crate) fn cmd_notify(&mut self, r: CmdRef, rsp: Option<Response>) {
        if let Some(session) = self.sessions.get_mut(&r.session) {
            if let Some(rsp) = rsp {
                session.rsps.push_back(rsp);
            }
            session.cmds[r.priority as usize].retain(|c| c.user.cmd_id != r.cmd_id);
        }
    }

    /// Pops the oldest response of a session.
    pub fn read_response(&mut self, session: SessionId) -> Option<Response> {
        self.sessions.get_mut(&session)?.rsps.pop_front()
    }

    // -----------------------------------------------------------------------
    // Enqueue
    // -----------------------------------------------------------------------

    /// Validates and enqueues a multi-core submission, then runs the
    /// scheduler.
    pub fn submit(&mut self, session_id: SessionId, mut user: SubmitMulti) -> Result<(), CoreError> {
        if user.num_bufs as usize > MAX_ALT_ADDRS {
            return Err(CoreError::InvalidCmd("too many buffers"));
        }
        if user.flags & CMD_FLAG_CHECK_CRC != 0 && !self.config.cnn_combined_crc_enable {
            return Err(CoreError::InvalidCmd(
                "CRC check requested while combined CRCs are disabled",
            ));
        }
        if user.priority as usize >= MAX_PRIORITIES {
            warn!(
                priority = user.priority,
                clamped = MAX_PRIORITIES - 1,
                "priority too high, clamping"
            );
            user.priority = (MAX_PRIORITIES - 1) as u8;
        }

        let session = self
            .sessions
            .get(&session_id)
            .ok_or(CoreError::UnknownSession(session_id))?;

        if user.num_cores == 0 || user.num_cores > self.props.num_cores {
            return Err(CoreError::InvalidCmd("bad core count"));
        }
        // Command stream ids must be non-zero for the first num_cores slots
        // and zero afterwards.
        for i in 0..user.num_cores as usize {
            let buf_id = user.cmdbuf[i];
            if buf_id == 0 {
                return Err(CoreError::InvalidCmd("missing command stream buffer"));
            }
            if session.find_buf(buf_id).is_none() {
                return Err(CoreError::UnknownBuffer(buf_id));
            }
        }
        if (user.num_cores as usize) < MAX_CORES && user.cmdbuf[user.num_cores as usize] != 0 {
            return Err(CoreError::InvalidCmd("excess command stream buffer"));
        }
        for &buf_id in &user.bufs {
            if session.find_buf(buf_id).is_none() {
                return Err(CoreError::UnknownBuffer(buf_id));
            }
        }

        let pri = user.priority as usize;
        let cmd_id = user.cmd_id;
        let mut cmd = Cmd::new(user);
        cmd.submit_ns = self.io.now_ns();
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Err(CoreError::UnknownSession(session_id));
        };
        session.cmds[pri].push_back(cmd);
        self.pri_q_counters[pri] += 1;

        if let Some(hook) = self.observers.enqueued.as_mut() {
            hook(session_id, cmd_id, pri as u8);
        }
        debug!(session = session_id, cmd_id, priority = pri, "command enqueued");

        self.kick_worker();
        self.run_worker();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Whether the command's session shares its model MMU hardware context
    /// with a *different* session that currently has a pending workload.
    fn is_mmu_ctx_shared(&self, r: CmdRef) -> bool {
        let Some(session) = self.sessions.get(&r.session) else {
            return false;
        };
        let hw_id = session.mmu_ctxs[MMU_REQ_MODEL].hw_id;
        if self.mmu.refcount(hw_id) <= 1 {
            return false;
        }
        self.pendcmd
            .iter()
            .flatten()
            .filter(|p| p.session != r.session)
            .any(|p| {
                self.sessions
                    .get(&p.session)
                    .is_some_and(|s| s.mmu_ctxs[MMU_REQ_MODEL].hw_id == hw_id)
            })
    }

    /// Attempts to reserve hardware resources for `r`.
    ///
    /// On success the command's `sched_info` holds a live ledger slot and
    /// the needed cores are powered. Returns [`CoreError::HwBusy`] when
    /// nothing can be reserved.
    pub(crate) fn schedule_cmd(&mut self, r: CmdRef) -> Result<(), CoreError> {
        // A command on free cores would trample the address space of a
        // different session sharing the MMU hardware context.
        if self.is_mmu_ctx_shared(r) {
            debug!(cmd_id = r.cmd_id, "postponing command: shared mmu context");
            return Err(CoreError::HwBusy);
        }

        let num_cores = self
            .cmd(r)
            .map(|c| c.user.num_cores)
            .ok_or(CoreError::InvalidCmd("command vanished"))?;

        let info = if self.config.scheduling_sequence.is_empty() {
            match self.ledger.try_allocate(num_cores) {
                Some(info) => info,
                None if self.config.low_latency != LowLatency::Disabled => {
                    let self_kick = self.config.low_latency == LowLatency::SelfKick;
                    let excluded = self.ll_queue_exclusions(r, self_kick);
                    self.ledger
                        .try_queue(num_cores, |wm| excluded & (1u8 << wm) != 0)
                        .ok_or(CoreError::HwBusy)?
                }
                None => return Err(CoreError::HwBusy),
            }
        } else {
            // Forced scheduling sequence; queueing is not supported here.
            let len = self.config.scheduling_sequence.len();
            let entry = self.config.scheduling_sequence[self.scheduling_counter % len];
            let wm_id = ((entry >> 8) & 0x7) as u8;
            let core_mask = (entry & 0xff) as u8;
            let info = self
                .ledger
                .try_allocate_forced(wm_id, core_mask)
                .ok_or(CoreError::HwBusy)?;
            self.scheduling_counter = (self.scheduling_counter + 1) % len;
            info
        };

        if let Some(cmd) = self.cmd_mut(r) {
            cmd.sched_info = Some(info);
        }

        // Power up the reserved cores; try harder before giving up.
        let mut tries = 3;
        while tries > 0 {
            match self.dev_start() {
                Ok(()) => break,
                Err(err) => {
                    warn!(%err, "error starting device cores, retrying");
                    tries -= 1;
                    if tries == 0 {
                        let taken = self.cmd_mut(r).and_then(|cmd| cmd.sched_info.take());
                        if let Some(mut info) = taken {
                            self.ledger.release(&mut info);
                        }
                        return Err(err);
                    }
                }
            }
        }

        debug!(
            cmd_id = r.cmd_id,
            session = r.session,
            wm_id = info.wm_id,
            core_mask = info.core_mask,
            queued = info.queued,
            "command scheduled"
        );
        Ok(())
    }

    /// Mask of WMs a low-latency queue attempt must avoid for `r`.
    fn ll_queue_exclusions(&self, r: CmdRef, self_kick: bool) -> u8 {
        if !self_kick {
            return 0;
        }
        let Some(session) = self.sessions.get(&r.session) else {
            return 0;
        };
        let hw_id = session.mmu_ctxs[MMU_REQ_MODEL].hw_id;
        let shared = self.mmu.refcount(hw_id) > 1;
        let mut mask = 0u8;
        for (wm, pend) in self.pendcmd.iter().enumerate() {
            if let Some(p) = pend {
                if p.session != r.session
                    && shared
                    && self
                        .sessions
                        .get(&p.session)
                        .is_some_and(|s| s.mmu_ctxs[MMU_REQ_MODEL].hw_id == hw_id)
                {
                    mask |= 1 << wm;
                }
            }
        }
        mask
    }

    /// Returns the ledger slot held by `r`, updating statistics when
    /// requested (the normal completion path).
    pub(crate) fn free_cmd_res(&mut self, r: CmdRef, update_stats: bool) {
        let Some(cmd) = self.cmd(r) else { return };
        let Some(mut info) = cmd.sched_info else {
            return;
        };

        if update_stats {
            let wm = &self.stats.wm_stats[info.wm_id as usize];
            let start = cmd.hw_proc_start_ns.max(wm.hw_proc_end_prev_ns);
            let end = wm.hw_proc_end_ns;
            self.stats.last_proc_us = end.saturating_sub(start) / 1000;
            let last = self.stats.last_proc_us;
            self.stats.add_wl_proc_us(info.core_mask, info.wm_id, last);
            let freq = self.io.freq_khz;
            self.stats.cnn_update(freq);
        }

        self.ledger.release(&mut info);
        if let Some(cmd) = self.cmd_mut(r) {
            cmd.sched_info = Some(info);
        }
    }

    /// Performs the hardware submission of a scheduled command:
    /// configuration registers, MMU, watchdogs, workload id and the kick.
    fn submit_to_hw(&mut self, r: CmdRef) -> Result<(), (i32, u64)> {
        let mut rsp_flags = 0u64;

        if self.hw_bypass > 0 {
            info!(cmd_id = r.cmd_id, "hardware bypass, skipping submission");
            rsp_flags |= rsp_err::SW_SKIP_CMD;
            return Err((errno::EAGAIN, rsp_flags));
        }

        let info = match self.cmd(r).and_then(|c| c.sched_info) {
            Some(info) => info,
            None => return Err((errno::EINVAL, rsp_flags)),
        };
        let wm_id = info.wm_id;
        let w = wm_id as usize;

        self.io.comment("-- WM_SETUP_BEGIN");
        self.io.comment(format!("-- Select WM{wm_id}"));
        self.io.select_wm(wm_id);

        // Second entry for a software-kick workload: the configuration was
        // written when it was queued, only the kick remains.
        let deferred_kick;
        if self.config.low_latency != LowLatency::Disabled {
            // Sanity wait for the previous kick bit to be deasserted.
            if self
                .io
                .poll64(regs::WM_WL_CONTROL, 0, regs::WM_WL_CONTROL_WL_START_EN, 1000, 10)
                .is_err()
            {
                error!(wm_id, "WM kick bit read-back failed");
                rsp_flags |= rsp_err::SW_KICK_BIT_READ_BACK_FAILURE;
                return Err((errno::EIO, rsp_flags));
            }
            deferred_kick = self.cmd(r).is_some_and(|c| c.queued)
                && self.config.low_latency == LowLatency::SwKick;
        } else {
            deferred_kick = false;
        }

        if !deferred_kick {
            if self.pendcmd[w].is_some() && self.config.low_latency == LowLatency::Disabled {
                error!(wm_id, "submission attempted while WM busy");
                rsp_flags |= rsp_err::SW_HW_BUSY;
                return Err((errno::EINVAL, rsp_flags));
            }

            // Build and write the configuration snapshot.
            let regs_snapshot = {
                let Self {
                    io,
                    props,
                    config,
                    sessions,
                    wm_core_assignment,
                    ..
                } = self;
                let session = sessions.get_mut(&r.session).ok_or((errno::EINVAL, rsp_flags))?;
                let user = session.cmds[r.priority as usize]
                    .iter()
                    .find(|c| c.user.cmd_id == r.cmd_id)
                    .map(|c| c.user.clone())
                    .ok_or((errno::EINVAL, rsp_flags))?;
                match wm::setup_config_regs(io, props, config, session, &user, &info, wm_core_assignment)
                {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        error!(%err, "invalid command info");
                        rsp_flags |= rsp_err::SW_INVALID_CMD_INFO;
                        return Err((errno::EINVAL, rsp_flags));
                    }
                }
            };
            wm::write_config_regs(&mut self.io, &info, &regs_snapshot);

            if self.pendcmd[w].is_some() {
                // Queue behind the pending workload (low-latency mode).
                if let Some(cmd) = self.cmd_mut(r) {
                    cmd.queued = true;
                }
                self.queuedcmd[w] = Some(r);
                self.stats.cnn_kicks_queued += 1;
                self.io
                    .comment(format!("-- WM{wm_id} already kicked, queueing"));
                debug!(wm_id, cmd_id = r.cmd_id, "WM busy, workload queued");
                if self.config.low_latency == LowLatency::SwKick {
                    // The kick is emitted when the pending workload retires.
                    return Ok(());
                }
            }

            self.configure_for_kick(r, info, Some(&regs_snapshot), &mut rsp_flags)?;
        } else {
            // Deferred kick: the configuration registers were written when
            // the workload was queued; redo the volatile per-kick state.
            self.configure_for_kick(r, info, None, &mut rsp_flags)?;
        }

        // Workload id and the kick itself.
        self.io.comment(format!("-- Select WM{wm_id}"));
        self.io.select_wm(wm_id);
        self.wm_cmd_id_count = self.wm_cmd_id_count.wrapping_add(1);
        let wm_cmd_id = (self.wm_cmd_id_count & 0x0fff) | (u16::from(wm_id) << 12);
        self.io.comment(format!("-- Set workload id: {wm_cmd_id}"));
        self.io
            .write64_pdump(regs::WM_WL_ID, u64::from(wm_cmd_id) & regs::WM_WL_ID_MASK);

        let was_queued = self.cmd(r).is_some_and(|c| c.queued);
        if let Some(cmd) = self.cmd_mut(r) {
            cmd.wm_cmd_id = wm_cmd_id;
            cmd.in_hw = true;
        }
        if !was_queued {
            self.pendcmd[w] = Some(r);
        }
        self.pri_q_counters[r.priority as usize] =
            self.pri_q_counters[r.priority as usize].saturating_sub(1);

        self.io.comment("-- WM_SETUP_END");
        let now = self.io.now_ns();
        if let Some(cmd) = self.cmd_mut(r) {
            cmd.hw_proc_start_ns = now;
        }
        self.stats.wm_stats[w].hw_proc_start_ns = now;

        if deferred_kick {
            // Deferred kick: not mirrored to pdump, the offline trace
            // already carries it behind the completion poll.
            self.io.select_wm(wm_id);
            self.io
                .write64(regs::WM_WL_CONTROL, regs::WM_WL_CONTROL_WL_START_EN);
            self.stats.inc_kicks_queued(info.core_mask, info.wm_id);
            if let Some(cmd) = self.cmd_mut(r) {
                cmd.queued = false;
            }
        } else {
            self.io.comment("-- WM_KICK_BEGIN");
            self.io.select_wm(wm_id);
            self.io
                .write64_pdump(regs::WM_WL_CONTROL, regs::WM_WL_CONTROL_WL_START_EN);
            self.io.comment("-- WM_KICK_END");
            if was_queued {
                self.stats.inc_kicks_queued(info.core_mask, info.wm_id);
            }
        }

        self.stats.inc_kicks(info.core_mask, info.wm_id);
        if let Some(hook) = self.observers.submitted.as_mut() {
            hook(r.session, r.cmd_id, r.priority);
        }
        debug!(
            wm_id,
            cmd_id = r.cmd_id,
            wl_kick_id = wm_cmd_id,
            queued = was_queued,
            "workload kicked"
        );
        Ok(())
    }

    /// MMU, memory-hierarchy, CRC and watchdog programming performed right
    /// before a kick.
    fn configure_for_kick(
        &mut self,
        r: CmdRef,
        info: crate::sched::ledger::HwSchedInfo,
        regs_snapshot: Option<&wm::ConfigRegs>,
        rsp_flags: &mut u64,
    ) -> Result<(), (i32, u64)> {
        let wm_id = info.wm_id;

        // MMU context switch for this session.
        self.io.comment("-- Select cores");
        self.io.write64_pdump(
            regs::CORE_CTRL_INDIRECT,
            u64::from(wm::get_cores(self.wm_core_assignment, wm_id)),
        );
        {
            let Self {
                io,
                config,
                mmu,
                sessions,
                state,
                ..
            } = self;
            let session = sessions.get(&r.session).ok_or((errno::EINVAL, *rsp_flags))?;
            if let Err(err) = mmu::setup(io, mmu, config, *state == PowerState::On, session) {
                error!(%err, "MMU setup failed");
                *rsp_flags |= rsp_err::SW_MMU_SETUP_FAILURE;
                return Err((errno::EFAULT, *rsp_flags));
            }
        }

        // Memory hierarchy and CRC/debug capture registers.
        let model_ctx = self
            .sessions
            .get(&r.session)
            .map(|s| s.mmu_ctxs[MMU_REQ_MODEL].hw_id)
            .unwrap_or(0);
        let mh_regs = wm::mh_setup(&mut self.io, &self.config, model_ctx);
        let crc_regs = {
            let Self {
                io,
                config,
                sessions,
                ..
            } = self;
            let session = sessions.get(&r.session).ok_or((errno::EINVAL, *rsp_flags))?;
            wm::prepare_crc_regs(io, config, session, &info)
        };

        // Watchdog programming.
        let user_estimate = self
            .cmd(r)
            .map(|c| c.user.estimated_cycles)
            .unwrap_or_default();
        let (wl_cycles, core_cycles) = wm::hwwdt_calculate(&self.config, user_estimate);
        let hw_brns = self.cmd(r).map(|c| c.user.hw_brns).unwrap_or_default();
        wm::hwwdt_setup(
            &mut self.io,
            &self.config,
            self.wm_core_assignment,
            &info,
            wl_cycles,
            core_cycles,
            hw_brns,
        );

        // Confirmation read-back results are picked up at completion.
        if self.config.confirm_config_reg {
            if let Some(snapshot) = regs_snapshot {
                let (top, cores) = wm::confirm_config_regs(
                    &mut self.io,
                    &self.config,
                    &info,
                    snapshot,
                    &mh_regs,
                    &crc_regs,
                );
                if let Some(cmd) = self.cmd_mut(r) {
                    cmd.conf_top_error = top;
                    cmd.conf_core_error = cores;
                }
            }
        }
        Ok(())
    }

    /// One scheduling attempt for one command.
    pub(crate) fn do_cmd(&mut self, r: CmdRef) -> DoCmdStatus {
        let Some(cmd) = self.cmd(r) else {
            return DoCmdStatus::Done;
        };
        if cmd.in_hw {
            return DoCmdStatus::InHw;
        }
        if self.is_waiting_for_inputs(r) {
            return DoCmdStatus::WaitInbufs;
        }
        if self.schedule_cmd(r).is_err() {
            return DoCmdStatus::HwBusy;
        }

        match self.submit_to_hw(r) {
            Ok(()) => DoCmdStatus::Ok,
            Err((err, rsp_flags)) => {
                // Failed (or bypassed) submissions complete immediately.
                let status = regs::WM_RESPONSE_FIFO_WL_STATUS_WL_FAILURE_EN;
                self.pri_q_counters[r.priority as usize] =
                    self.pri_q_counters[r.priority as usize].saturating_sub(1);
                let rsp = self.build_response(r, status, err, rsp_flags);
                if rsp_flags & rsp_err::SW_MMU_SETUP_FAILURE != 0 {
                    if let Some(info) = self.cmd(r).and_then(|c| c.sched_info) {
                        wm::release_cores(
                            &mut self.io,
                            &mut self.wm_core_assignment,
                            info.core_mask,
                            false,
                        );
                    }
                }
                self.free_cmd_res(r, false);
                self.cmd_notify(r, rsp);

                if rsp_flags & rsp_err::SW_MMU_SETUP_FAILURE != 0 {
                    // Address translation is in an unknown state; reset.
                    self.rollback_cmds();
                    if let Err(err) = self.dev_stop(true) {
                        warn!(%err, "device stop after MMU failure failed");
                    }
                    self.kick_worker();
                }
                DoCmdStatus::Done
            }
        }
    }

    /// Whether any input buffer of `r` is still unfilled.
    fn is_waiting_for_inputs(&self, r: CmdRef) -> bool {
        let Some(session) = self.sessions.get(&r.session) else {
            return false;
        };
        let Some(cmd) = self.cmd(r) else { return false };
        let user = &cmd.user;
        let stream_bufs = user.cmdbuf[..user.num_cores as usize].iter();
        let data_inputs = user
            .bufs
            .iter()
            .take((user.num_inbufs as usize).saturating_sub(user.num_cores as usize));
        stream_bufs
            .chain(data_inputs)
            .any(|&id| session.find_buf(id).is_some_and(|b| b.status == BufStatus::Unfilled))
    }

    // -----------------------------------------------------------------------
    // Rollback / completion
    // -----------------------------------------------------------------------

    /// Rolls back the pending and queued workloads of one WM.
    ///
    /// Unprocessed commands stay on their session queues; only the hardware
    /// slots are cleared. Returns `true` when a pending workload existed.
    pub(crate) fn rollback_wm_cmds(&mut self, wm_id: u8, free_res: bool) -> bool {
        let w = wm_id as usize;
        let mut processing = false;

        if let Some(r) = self.pendcmd[w].take() {
            let info = self.cmd(r).and_then(|c| c.sched_info);
            if let Some(info) = info {
                if free_res {
                    wm::release_cores(
                        &mut self.io,
                        &mut self.wm_core_assignment,
                        info.core_mask,
                        false,
                    );
                    self.free_cmd_res(r, false);
                    self.pri_q_counters[r.priority as usize] += 1;
                }
                self.stats.inc_kicks_aborted(info.core_mask, info.wm_id);
            }
            if let Some(cmd) = self.cmd_mut(r) {
                cmd.in_hw = false;
                cmd.queued = false;
                cmd.rolled_back = true;
            }
            processing = true;
        }

        if let Some(r) = self.queuedcmd[w].take() {
            let info = self.cmd(r).and_then(|c| c.sched_info);
            if let Some(info) = info {
                wm::release_cores(
                    &mut self.io,
                    &mut self.wm_core_assignment,
                    info.core_mask,
                    false,
                );
                self.free_cmd_res(r, false);
                if self.config.low_latency == LowLatency::SelfKick {
                    self.stats.inc_kicks_aborted(info.core_mask, info.wm_id);
                    self.pri_q_counters[r.priority as usize] += 1;
                }
            }
            if let Some(cmd) = self.cmd_mut(r) {
                cmd.in_hw = false;
                cmd.queued = false;
                cmd.rolled_back = true;
            }
        }

        processing
    }

    /// Rolls back every WM. Returns `true` when anything was processing.
    pub(crate) fn rollback_cmds(&mut self) -> bool {
        let mut processing = false;
        for wm_id in 0..self.props.num_cores {
            processing |= self.rollback_wm_cmds(wm_id, true);
        }
        processing
    }

    /// Builds the completion response for `r`.
    ///
    /// Returns `None` when the command vanished. Consumes one `hw_bypass`
    /// credit when active.
    pub(crate) fn build_response(
        &mut self,
        r: CmdRef,
        status: u64,
        err: i32,
        rsp_err_flags: u64,
    ) -> Option<Response> {
        self.cmd(r)?;

        let bypassed = self.hw_bypass > 0;
        if bypassed {
            self.hw_bypass -= 1;
        } else {
            // Mark outputs written by hardware and invalidate CPU caches.
            let session = self.sessions.get_mut(&r.session)?;
            let cmd = session.cmds[r.priority as usize]
                .iter()
                .find(|c| c.user.cmd_id == r.cmd_id)?
                .user
                .clone();
            let first_out = (cmd.num_inbufs as usize).saturating_sub(cmd.num_cores as usize);
            for &buf_id in cmd.bufs.iter().skip(first_out) {
                if let Some(buf) = session.bufs.iter_mut().find(|b| b.id == buf_id) {
                    buf.status = BufStatus::FilledByHw;
                    if buf.needs_inval && status == 0 {
                        session.mem_ctx.sync_device_to_cpu(buf_id);
                    }
                }
            }
        }

        let mem_usage = self
            .sessions
            .get_mut(&r.session)
            .map(|s| s.mem_ctx.usage_bytes())
            .unwrap_or(0);

        if let Some(hook) = self.observers.completed.as_mut() {
            hook(r.session, r.cmd_id, status);
        }

        Some(Response {
            cmd_id: r.cmd_id,
            err_no: if self.hw_bypass > 0 { 0 } else { err },
            rsp_err_flags,
            last_proc_us: self.stats.cnn_last_proc_us,
            hw_cycles: self.stats.cnn_last_cycles,
            mem_usage,
        })
    }

    /// Completes the pending command of `wm_id`.
    ///
    /// On success the queued command (if any) is promoted to pending.
    /// Returns `false` when there was nothing pending.
    pub(crate) fn handle_cmd(
        &mut self,
        wm_id: u8,
        status: u64,
        err: i32,
        rsp_err_flags: u64,
    ) -> bool {
        let w = wm_id as usize;
        let Some(r) = self.pendcmd[w] else {
            debug!(wm_id, "no pending command, probably aborted");
            return false;
        };

        let rsp = self.build_response(r, status, err, rsp_err_flags);

        if status != 0 {
            // Failure: roll back any queued follow-up and finish now.
            self.rollback_wm_cmds(wm_id, false);
            self.cmd_notify(r, rsp);
            return false;
        }

        self.pendcmd[w] = self.queuedcmd[w].take();
        self.cmd_notify(r, rsp);
        true
    }

    /// Re-submits the queued command of `wm_id` after its pending companion
    /// retired (software-kick mode only).
    pub(crate) fn do_queued_cmd(&mut self, wm_id: u8) {
        let w = wm_id as usize;
        let Some(r) = self.queuedcmd[w] else { return };
        if self.config.low_latency != LowLatency::SwKick
            || !self.cmd(r).is_some_and(|c| c.queued)
        {
            debug!(wm_id, "skipping queued command");
            return;
        }
        // The pending slot is restored afterwards; the deferred kick must
        // not disturb it.
        let pend = self.pendcmd[w];
        if self.submit_to_hw(r).is_err() {
            warn!(wm_id, cmd_id = r.cmd_id, "deferred kick failed");
        }
        self.pendcmd[w] = pend;
    }

    // -----------------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------------

    /// Cancels every command of `session_id` whose id matches
    /// `(id & mask) == cmd_id`, rolling back in-flight ones.
    ///
    /// When `respond` is set and anything was removed, a single synthetic
    /// cancel response carrying `cmd_id` is queued.
    pub fn cancel(
        &mut self,
        session_id: SessionId,
        cmd_id: u32,
        cmd_id_mask: u32,
        respond: bool,
    ) -> Result<(), CoreError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(CoreError::UnknownSession(session_id));
        }

        let reschedule = self.rm_session_cmds_masked(session_id, cmd_id, cmd_id_mask);
        let mut removed = false;

        // Sweep the session queues.
        if let Some(session) = self.sessions.get_mut(&session_id) {
            let pri_q_counters = &mut self.pri_q_counters;
            for pri in 0..MAX_PRIORITIES {
                let before = session.cmds[pri].len();
                session.cmds[pri].retain(|c| (c.user.cmd_id & cmd_id_mask) != cmd_id);
                let dropped = before - session.cmds[pri].len();
                if dropped > 0 {
                    removed = true;
                    pri_q_counters[pri] =
                        pri_q_counters[pri].saturating_sub(dropped as u32);
                }
            }
            // Drop matching responses that were never read.
            let before = session.rsps.len();
            session.rsps.retain(|rsp| (rsp.cmd_id & cmd_id_mask) != cmd_id);
            removed |= before != session.rsps.len();
        }

        if reschedule {
            if let Err(err) = self.dev_stop(true) {
                warn!(%err, "device stop after cancel failed");
            }
        }

        if (removed || reschedule) && respond {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.rsps.push_back(Response {
                    cmd_id,
                    ..Response::default()
                });
            }
            if let Some(hook) = self.observers.cancelled.as_mut() {
                hook(session_id, cmd_id);
            }
        }

        if reschedule {
            self.kick_worker();
        }
        self.run_worker();
        Ok(())
    }

    /// Rolls back pending/queued workloads of `session_id` matching the id
    /// template. Returns `true` when the scheduler must re-run.
    fn rm_session_cmds_masked(
        &mut self,
        session_id: SessionId,
        cmd_id: u32,
        cmd_id_mask: u32,
    ) -> bool {
        let mut reschedule = false;
        for wm_id in 0..self.props.num_cores {
            let w = wm_id as usize;
            let matches = |r: &CmdRef| {
                r.session == session_id && (r.cmd_id & cmd_id_mask) == cmd_id
            };
            let pend_removed = self.pendcmd[w].as_ref().is_some_and(matches);
            let queued_removed = self.queuedcmd[w].as_ref().is_some_and(matches);
            if !pend_removed && !queued_removed {
                continue;
            }

            let sched_info = if queued_removed {
                self.queuedcmd[w].and_then(|r| self.cmd(r).and_then(|c| c.sched_info))
            } else {
                self.pendcmd[w].and_then(|r| self.cmd(r).and_then(|c| c.sched_info))
            };

            if pend_removed {
                if let Some(info) = self.pendcmd[w].and_then(|r| self.cmd(r).and_then(|c| c.sched_info)) {
                    self.stats.inc_kicks_cancelled(info.core_mask, info.wm_id);
                }
            }
            if queued_removed && self.config.low_latency == LowLatency::SelfKick {
                if let Some(info) = sched_info {
                    self.stats.inc_kicks_cancelled(info.core_mask, info.wm_id);
                }
            }

            if let (true, false, Some(qref)) = (pend_removed, queued_removed, self.queuedcmd[w]) {
                self.set_starting_session(qref.priority, qref.session);
            }

            if let Some(info) = sched_info {
                if let Err(err) = wm::wm_reset(&mut self.io, &info) {
                    warn!(wm_id, %err, "WM reset during cancel failed");
                }
            }
            self.clear_wm_irq_state(wm_id);
            self.rollback_wm_cmds(wm_id, true);

            // The rollback counted these as aborted; they are cancellations.
            if let Some(info) = sched_info {
                if queued_removed {
                    self.stats.correct_kicks_aborted(info.core_mask, info.wm_id);
                }
                if pend_removed {
                    self.stats.correct_kicks_aborted(info.core_mask, info.wm_id);
                }
            }
            reschedule = true;
        }
        reschedule
    }

    // -----------------------------------------------------------------------
    // On-chip mappings (MMU adapter surface)
    // -----------------------------------------------------------------------

    /// Maps pages of a session buffer into the on-chip window through the
    /// session's page-table capability. Returns the map id.
    pub fn map_to_onchip(
        &mut self,
        session_id: SessionId,
        buf_id: u32,
        vaddr: u64,
        page_indices: &[u32],
    ) -> Result<u32, CoreError> {
        let page_size = self.config.mmu_page_size.bytes();
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(CoreError::UnknownSession(session_id))?;
        if session.find_buf(buf_id).is_none() {
            return Err(CoreError::UnknownBuffer(buf_id));
        }
        let map_id = session
            .mmu
            .map_to_onchip(buf_id, vaddr, page_size, page_indices)?;
        session.onchip_maps.push(map_id);
        debug!(session = session_id, buf_id, map_id, "buffer mapped on-chip");
        Ok(map_id)
    }

    /// Releases an on-chip mapping created by
    /// [`map_to_onchip`](Self::map_to_onchip).
    pub fn unmap_from_onchip(
        &mut self,
        session_id: SessionId,
        map_id: u32,
    ) -> Result<(), CoreError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(CoreError::UnknownSession(session_id))?;
        session.mmu.unmap(map_id)?;
        session.onchip_maps.retain(|m| *m != map_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Software watchdog
    // -----------------------------------------------------------------------

    /// Software watchdog pass, called periodically by the platform timer
    /// (`swd_period_ms`). Workloads pending longer than their budget are
    /// force-failed with `SW_WDT_EXPIRED` and their WM reset.
    pub fn poll_software_watchdog(&mut self) {
        if self.config.swd_period_ms == 0 {
            return;
        }
        let now = self.io.now_ns();
        for wm_id in 0..self.props.num_cores {
            let w = wm_id as usize;
            let Some(r) = self.pendcmd[w] else { continue };
            let Some((start, estimated, info)) = self
                .cmd(r)
                .map(|c| (c.hw_proc_start_ns, c.user.estimated_cycles, c.sched_info))
            else {
                continue;
            };
            let budget_us = self.config.swd_timeout_us(estimated, self.io.freq_khz);
            if now.saturating_sub(start) / 1000 < budget_us {
                continue;
            }

            error!(wm_id, cmd_id = r.cmd_id, budget_us, "software watchdog expired");
            if let Some(info) = info {
                if wm::wm_reset(&mut self.io, &info).is_err() {
                    warn!(wm_id, "WM reset after software watchdog failed");
                }
                self.clear_wm_irq_state(wm_id);
                self.stats.total_failures += 1;
                self.stats.cnn_kicks_completed += 1;
                self.stats.inc_kicks_completed(info.core_mask, info.wm_id);
                wm::release_cores(
                    &mut self.io,
                    &mut self.wm_core_assignment,
                    info.core_mask,
                    false,
                );
                self.free_cmd_res(r, true);
            }
            self.handle_cmd(
                wm_id,
                regs::WM_RESPONSE_FIFO_WL_STATUS_WL_FAILURE_EN,
                errno::ETIMEDOUT,
                rsp_err::SW_WDT_EXPIRED,
            );
            self.kick_worker();
        }
        self.run_worker();
    }

    // -----------------------------------------------------------------------
    // Suspend / resume
    // -----------------------------------------------------------------------

    /// Stops all processing for a system suspend: resets busy WMs, rolls
    /// back their workloads and powers the device down.
    pub fn suspend(&mut self) -> Result<(), CoreError> {
        for wm_id in 0..self.props.num_cores {
            let w = wm_id as usize;
            if let Some(r) = self.pendcmd[w] {
                if let Some(info) = self.cmd(r).and_then(|c| c.sched_info) {
                    if let Err(err) = wm::wm_reset(&mut self.io, &info) {
                        warn!(wm_id, %err, "WM reset during suspend failed");
                    }
                }
                self.clear_wm_irq_state(wm_id);
            }
        }
        let processing = self.rollback_cmds();
        self.dev_stop_all(processing)
    }

    /// Resumes after a suspend: the rolled-back workloads are rescheduled.
    pub fn resume(&mut self) {
        self.kick_worker();
        self.run_worker();
    }

    // -----------------------------------------------------------------------
    // Worker plumbing
    // -----------------------------------------------------------------------

    /// Requests a scheduler pass; coalesces with an already-pending one.
    pub(crate) fn kick_worker(&mut self) {
        self.sched_pending = true;
    }

    /// Runs the scheduler worker until no pass is pending. Suppressed while
    /// calibration is in flight.
    pub(crate) fn run_worker(&mut self) {
        while self.sched_pending {
            self.sched_pending = false;
            if self.do_calibration {
                debug!("calibration pending, postponing worker");
                return;
            }
            self.scheduler_loop();
        }
    }

    /// Public entry point for the embedder's deferred-work context.
    pub fn run_scheduler(&mut self) {
        self.kick_worker();
        self.run_worker();
    }
}

impl<P: Platform> core::fmt::Debug for Device<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("props", &self.props)
            .field("state", &self.state)
            .field("active_core_mask", &self.active_core_mask)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
