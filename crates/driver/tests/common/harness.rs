//! Mock accelerator hardware and the test context.
//!
//! `FakeNna` models the register bank closely enough for the driver's
//! access patterns: WM/core/interconnect indirect windows, write-1-to-clear
//! event registers, reset/scrub handshakes that complete instantly, and a
//! response FIFO per WM. Tests inject events by setting status registers
//! plus the matching `HOST_EVENT_SOURCE` bits, then fire the IRQ entry
//! points through `TestContext`.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use nna_core::config::Config;
use nna_core::device::Device;
use nna_core::hw::irq::IrqReturn;
use nna_core::io::{NullPdump, Platform};
use nna_core::regs;
use nna_core::session::{
    BufStatus, Buffer, NullMemCtx, NullMmuContext, ReqType, SessionId, SubmitMulti,
};

/// One recorded workload kick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kick {
    /// WM the kick targeted.
    pub wm_id: u8,
    /// Workload id programmed at kick time.
    pub wl_id: u16,
}

#[derive(Debug, Default)]
struct WmBank {
    regs: BTreeMap<u64, u64>,
    event_status: u64,
    fifo: VecDeque<(u64, u64, u64)>,
}

#[derive(Debug, Default)]
struct CoreBank {
    regs: BTreeMap<u64, u64>,
    host_status: u64,
    wm_status: u64,
}

/// Register-level model of the accelerator.
#[derive(Debug)]
pub struct FakeNna {
    top: BTreeMap<u64, u64>,
    wm: [WmBank; 8],
    core: [CoreBank; 8],
    ic: [BTreeMap<u64, u64>; 8],
    /// Mock monotonic clock, advanced on every timestamp/delay request.
    pub now_ns: u64,
    /// Every `WL_START` observed, in order.
    pub kicks: Vec<Kick>,
}

impl FakeNna {
    /// Builds a fake with `num_cores` cores reported by the ID registers.
    pub fn new(num_cores: u8, parity: bool) -> Self {
        let mut top = BTreeMap::new();
        top.insert(regs::PRODUCT_ID, 0x5650_0001);
        top.insert(
            regs::CORE_ID,
            (3u64 << regs::CORE_ID_BRANCH_SHIFT)
                | (2 << regs::CORE_ID_VERSION_SHIFT)
                | (7 << regs::CORE_ID_NUMBER_SHIFT)
                | 0x20,
        );
        let mut ip = u64::from(num_cores) | (40 << regs::CORE_IP_CONFIG_MMU_WIDTH_SHIFT);
        if parity {
            ip |= regs::CORE_IP_CONFIG_PARITY_EN;
        }
        top.insert(regs::CORE_IP_CONFIG, ip);
        top.insert(
            regs::CORE_IP_CONFIG1,
            1024 | (512 << regs::CORE_IP_CONFIG1_SOCM_KB_SHIFT)
                | (64 << regs::CORE_IP_CONFIG1_SOCM_CORE_KB_SHIFT),
        );
        Self {
            top,
            wm: Default::default(),
            core: Default::default(),
            ic: Default::default(),
            now_ns: 1_000_000,
            kicks: Vec::new(),
        }
    }

    fn selected_wm(&self) -> usize {
        (self.top.get(&regs::TLC_WM_INDIRECT).copied().unwrap_or(0) & 0x7) as usize
    }

    fn selected_cores(&self) -> u8 {
        (self.top.get(&regs::CORE_CTRL_INDIRECT).copied().unwrap_or(0) & 0xff) as u8
    }

    fn first_selected_core(&self) -> usize {
        let mask = self.selected_cores();
        if mask == 0 {
            0
        } else {
            mask.trailing_zeros() as usize
        }
    }

    fn selected_ic(&self) -> usize {
        let mask = self.top.get(&regs::IC_CORE_INDIRECT).copied().unwrap_or(0) & 0xff;
        if mask == 0 {
            0
        } else {
            mask.trailing_zeros() as usize
        }
    }

    fn read_reg(&mut self, offset: u64) -> u64 {
        match offset {
            // WM window.
            0x0208..=0x02f8 => {
                let wm = &self.wm[self.selected_wm()];
                match offset {
                    regs::WM_EVENT_STATUS => wm.event_status,
                    regs::WM_WL_CONTROL => 0,
                    regs::WM_RESPONSE_FIFO_WL_STATUS => wm.fifo.front().map_or(0, |e| e.0),
                    regs::WM_RESPONSE_FIFO_WL_ID => wm.fifo.front().map_or(0, |e| e.1),
                    regs::WM_RESPONSE_FIFO_WL_PERF => wm.fifo.front().map_or(0, |e| e.2),
                    regs::WM_STATUS => regs::WM_STATUS_STATE_IDLE,
                    _ => wm.regs.get(&offset).copied().unwrap_or(0),
                }
            }
            // Core window.
            0x0308..=0x0470 | 0x0480..=0x04a0 => {
                let core = &self.core[self.first_selected_core()];
                match offset {
                    regs::CORE_EVENT_HOST_STATUS => core.host_status,
                    regs::CORE_EVENT_WM_STATUS => core.wm_status,
                    regs::CLK_STATUS0 => 0,
                    _ => core.regs.get(&offset).copied().unwrap_or(0),
                }
            }
            // Interconnect window.
            0x0508..=0x0530 => self.ic[self.selected_ic()]
                .get(&offset)
                .copied()
                .unwrap_or(0),
            regs::SLC_IDLE => regs::SLC_IDLE_MASKFULL,
            regs::SYS_CLK_STATUS0 => 0,
            _ => self.top.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write_reg(&mut self, offset: u64, val: u64) {
        match offset {
            // WM window.
            0x0208..=0x02f8 => {
                let wm_id = self.selected_wm();
                let wm = &mut self.wm[wm_id];
                match offset {
                    regs::WM_EVENT_CLEAR => wm.event_status &= !val,
                    regs::WM_WL_CONTROL => {
                        if val & regs::WM_WL_CONTROL_WL_START_EN != 0 {
                            let wl_id =
                                wm.regs.get(&regs::WM_WL_ID).copied().unwrap_or(0) as u16;
                            self.kicks.push(Kick {
                                wm_id: wm_id as u8,
                                wl_id,
                            });
                        }
                    }
                    regs::WM_RESPONSE_FIFO_READ => {
                        let _ = wm.fifo.pop_front();
                    }
                    _ => {
                        wm.regs.insert(offset, val);
                    }
                }
            }
            // Core window: writes hit every selected core.
            0x0308..=0x0470 | 0x0480..=0x04a0 => {
                let mask = self.selected_cores();
                let targets: Vec<usize> = if mask == 0 {
                    vec![]
                } else {
                    (0..8).filter(|i| mask & (1 << i) != 0).collect()
                };
                for id in targets {
                    let core = &mut self.core[id];
                    match offset {
                        regs::CORE_EVENT_HOST_CLEAR => core.host_status &= !val,
                        regs::CORE_EVENT_WM_CLEAR => core.wm_status &= !val,
                        regs::CORE_SOFT_RESET => {
                            if val & regs::CORE_SOFT_RESET_CORE_RESET_EN != 0 {
                                core.host_status |= regs::CORE_EVENT_MEMBUS_RESET_DONE_EN;
                            }
                        }
                        regs::FUSA_CONTROL => {
                            if val & regs::FUSA_CONTROL_ECC_INIT_KICK_EN != 0 {
                                core.host_status |= regs::CORE_EVENT_RAM_INIT_DONE_EN;
                            }
                        }
                        regs::LOCM_SCRUB_CTRL => {
                            if val & regs::SCRUB_KICK_EN != 0 {
                                core.host_status |= regs::CORE_EVENT_LOCM_SCRUB_DONE_EN;
                            }
                        }
                        _ => {
                            core.regs.insert(offset, val);
                        }
                    }
                }
            }
            // Interconnect window.
            0x0508..=0x0530 => {
                let ic = self.selected_ic();
                match offset {
                    regs::INTERCONNECT_EVENT_HOST_CLEAR | regs::INTERCONNECT_EVENT_WM_CLEAR => {
                        let status_reg = if offset == regs::INTERCONNECT_EVENT_HOST_CLEAR {
                            regs::INTERCONNECT_EVENT_HOST_STATUS
                        } else {
                            regs::INTERCONNECT_EVENT_WM_STATUS
                        };
                        let cur = self.ic[ic].get(&status_reg).copied().unwrap_or(0);
                        self.ic[ic].insert(status_reg, cur & !val);
                    }
                    _ => {
                        self.ic[ic].insert(offset, val);
                    }
                }
            }
            regs::SYS_EVENT_CLEAR => {
                let cur = self.top.get(&regs::SYS_EVENT_STATUS).copied().unwrap_or(0);
                self.top.insert(regs::SYS_EVENT_STATUS, cur & !val);
            }
            regs::SYS_RAM_INIT => {
                if val & regs::SCRUB_KICK_EN != 0 {
                    *self.top.entry(regs::SYS_EVENT_STATUS).or_insert(0) |=
                        regs::SYS_EVENT_RAM_INIT_DONE_EN;
                }
                self.top.insert(offset, val);
            }
            regs::SOCM_SCRUB_CTRL => {
                if val & regs::SCRUB_KICK_EN != 0 {
                    *self.top.entry(regs::SYS_EVENT_STATUS).or_insert(0) |=
                        regs::SYS_EVENT_SOCM_SCRUB_DONE_EN;
                }
                self.top.insert(offset, val);
            }
            regs::POWER_EVENT => {
                if val & regs::POWER_EVENT_REQ_EN != 0 {
                    *self.top.entry(regs::SYS_EVENT_STATUS).or_insert(0) |=
                        regs::SYS_EVENT_POWER_COMPLETE_EN;
                }
                self.top.insert(offset, val);
            }
            regs::SYS_RESET_CTRL => {
                let prev = self.top.get(&offset).copied().unwrap_or(0);
                if prev != 0 && val == 0 {
                    *self.top.entry(regs::SYS_EVENT_STATUS).or_insert(0) |=
                        regs::SYS_EVENT_MEMBUS_RESET_DONE_EN;
                }
                self.top.insert(offset, val);
            }
            _ => {
                self.top.insert(offset, val);
            }
        }
    }

    /// Raises WM events and flags the WM in the event source.
    pub fn raise_wm_event(&mut self, wm_id: u8, bits: u64) {
        self.wm[wm_id as usize].event_status |= bits;
        *self.top.entry(regs::HOST_EVENT_SOURCE).or_insert(0) |= regs::set_field(
            1 << wm_id,
            regs::HOST_EVENT_SOURCE_WM_SHIFT,
            regs::HOST_EVENT_SOURCE_WM_MASK,
        );
    }

    /// Raises a system event.
    pub fn raise_sys_event(&mut self, bits: u64) {
        *self.top.entry(regs::SYS_EVENT_STATUS).or_insert(0) |= bits;
        *self.top.entry(regs::HOST_EVENT_SOURCE).or_insert(0) |= regs::HOST_EVENT_SOURCE_SYS_EN;
    }

    /// Raises a host-routed core event.
    pub fn raise_core_event(&mut self, core_id: u8, bits: u64) {
        self.core[core_id as usize].host_status |= bits;
        *self.top.entry(regs::HOST_EVENT_SOURCE).or_insert(0) |= regs::set_field(
            1 << core_id,
            regs::HOST_EVENT_SOURCE_CORE_SHIFT,
            regs::HOST_EVENT_SOURCE_CORE_MASK,
        );
    }

    /// Queues a completed-workload response on a WM.
    pub fn push_response(&mut self, wm_id: u8, status: u64, wl_id: u16, cycles: u64) {
        self.wm[wm_id as usize]
            .fifo
            .push_back((status, u64::from(wl_id), cycles));
    }

    /// The most recent kick on `wm_id`.
    pub fn last_kick(&self, wm_id: u8) -> Option<Kick> {
        self.kicks.iter().rev().find(|k| k.wm_id == wm_id).copied()
    }

    /// Clears the interrupt source register (hardware deasserts the line
    /// once all events are cleared).
    pub fn clear_event_source(&mut self) {
        self.top.insert(regs::HOST_EVENT_SOURCE, 0);
    }
}

/// Shared handle implementing [`Platform`] over the fake.
#[derive(Clone, Debug)]
pub struct SharedHw(pub Rc<RefCell<FakeNna>>);

impl Platform for SharedHw {
    fn read64(&mut self, offset: u64) -> u64 {
        self.0.borrow_mut().read_reg(offset)
    }
    fn write64(&mut self, offset: u64, val: u64) {
        self.0.borrow_mut().write_reg(offset, val)
    }
    fn monotonic_ns(&mut self) -> u64 {
        let mut hw = self.0.borrow_mut();
        hw.now_ns += 1_000;
        hw.now_ns
    }
    fn udelay(&mut self, us: u64) {
        self.0.borrow_mut().now_ns += us * 1_000;
    }
}

/// A probed device on top of the fake, plus submission helpers.
pub struct TestContext {
    /// Shared fake hardware.
    pub hw: Rc<RefCell<FakeNna>>,
    /// The device under test.
    pub dev: Device<SharedHw>,
}

impl TestContext {
    /// Probes a device with `num_cores` cores and the given config.
    pub fn new(num_cores: u8, config: Config) -> Self {
        Self::with_parity(num_cores, false, config)
    }

    /// Probes a device whose hardware reports parity support.
    pub fn with_parity(num_cores: u8, parity: bool, config: Config) -> Self {
        let hw = Rc::new(RefCell::new(FakeNna::new(num_cores, parity)));
        let dev = Device::probe(SharedHw(hw.clone()), Box::new(NullPdump), config)
            .expect("probe failed");
        Self { hw, dev }
    }

    /// Creates a session with a standard buffer population: command-stream
    /// buffers 1..=8, input 10, output 11.
    pub fn add_session(&mut self) -> SessionId {
        let id = self
            .dev
            .add_session(
                Box::new(NullMemCtx),
                Box::<NullMmuContext>::default(),
                [0x10_0000, 0x20_0000],
            )
            .expect("add_session failed");
        let session = self.dev.session_mut(id).expect("fresh session");
        for buf_id in 1..=8u32 {
            session
                .add_buf(Buffer {
                    id: buf_id,
                    size: 2048,
                    devvirt: 0x4000_0000 + u64::from(buf_id) * 0x1_0000,
                    req_type: ReqType::Model,
                    status: BufStatus::FilledBySw,
                    ocm: false,
                    needs_flush: false,
                    needs_inval: false,
                })
                .expect("stream buf");
        }
        for buf_id in [10u32, 11] {
            session
                .add_buf(Buffer {
                    id: buf_id,
                    size: 4096,
                    devvirt: 0x4100_0000 + u64::from(buf_id) * 0x1_0000,
                    req_type: ReqType::Io,
                    status: if buf_id == 10 {
                        BufStatus::FilledBySw
                    } else {
                        BufStatus::Unfilled
                    },
                    ocm: false,
                    needs_flush: false,
                    needs_inval: false,
                })
                .expect("io buf");
        }
        id
    }

    /// A well-formed multi-core submission over the standard buffers.
    pub fn submission(cmd_id: u32, priority: u8, num_cores: u8) -> SubmitMulti {
        let mut cmdbuf = [0u32; 8];
        for (i, slot) in cmdbuf.iter_mut().take(num_cores as usize).enumerate() {
            *slot = i as u32 + 1;
        }
        SubmitMulti {
            cmd_id,
            priority,
            num_cores,
            num_inbufs: num_cores + 1,
            num_bufs: num_cores + 2,
            cmdbuf,
            bufs: vec![10, 11],
            regidx: vec![1, 2],
            bufoffsets: vec![0, 0],
            bufsizes: vec![16, 16],
            ..SubmitMulti::default()
        }
    }

    /// Submits a simple workload.
    pub fn submit(&mut self, session: SessionId, cmd_id: u32, priority: u8, num_cores: u8) {
        self.dev
            .submit(session, Self::submission(cmd_id, priority, num_cores))
            .expect("submit failed");
    }

    /// Delivers the accumulated events: top half, source deassert, bottom
    /// half when the top half asked for it. Returns the top-half verdict.
    pub fn fire(&mut self) -> IrqReturn {
        let ret = self.dev.handle_irq();
        self.hw.borrow_mut().clear_event_source();
        if ret == IrqReturn::WakeThread {
            self.dev.handle_thread_irq();
        }
        ret
    }

    /// Completes the pending workload of `wm_id` with the given response
    /// status (plus implicit FIFO-ready event), then fires the interrupt.
    pub fn complete(&mut self, wm_id: u8, status: u64) {
        let kick = self
            .hw
            .borrow()
            .last_kick(wm_id)
            .expect("completing a WM that was never kicked");
        {
            let mut hw = self.hw.borrow_mut();
            hw.push_response(wm_id, status, kick.wl_id, 0x1234);
            hw.raise_wm_event(wm_id, nna_core::regs::WM_EVENT_RESPONSE_FIFO_READY_EN);
        }
        assert_eq!(self.fire(), IrqReturn::WakeThread);
    }

    /// Advances the mock clock.
    pub fn advance_ms(&mut self, ms: u64) {
        self.hw.borrow_mut().now_ns += ms * 1_000_000;
    }

    /// All kicks recorded so far.
    pub fn kicks(&self) -> Vec<Kick> {
        self.hw.borrow().kicks.clone()
    }
}
