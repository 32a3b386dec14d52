//! Workload Manager and core configuration.
//!
//! Everything written into hardware on behalf of one workload lives here:
//! 1. **`ConfigRegs`:** the per-workload register snapshot (core assignment,
//!    command streams, alt addresses, OCM layout, vcore map).
//! 2. **Core binding:** the packed core→WM assignment mirror and its SOCM
//!    counterpart.
//! 3. **Watchdogs:** system/WM/core watchdog programming before a kick.
//! 4. **WM reset:** the per-WM error-recovery sequence.
//! 5. **Confirmation:** optional read-back of everything written, raising
//!    CONF_ERROR on mismatch (functional safety).

use tracing::{debug, error};

use crate::common::{id_to_mask, mask_ids, mask_to_num, CoreError, MAX_ALT_ADDRS, MAX_CORES};
use crate::config::{defaults, Config};
use crate::device::HwProps;
use crate::io::{Platform, RegIo};
use crate::regs;
use crate::sched::ledger::HwSchedInfo;
use crate::session::{Session, SubmitMulti, MMU_REQ_IO, MMU_REQ_MODEL};

/// Per-core slot stride in the combined-CRC capture buffer.
pub const COMBINED_CRC_CORE_OFFSET: u64 = 0x40;

/// Hardware bug workaround: core memory watchdog must run at maximum.
pub const BRN_71338: u64 = 1 << 1;
/// Hardware bug workaround: core memory watchdog must run at maximum.
pub const BRN_71556: u64 = 1 << 0;

/// Register snapshot written for one workload.
///
/// Address fields use `u64::MAX` as the "not used" sentinel so zero remains
/// a programmable value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigRegs {
    /// Packed core→WM assignment image.
    pub core_assignment: u64,
    /// Per-core `CNN_CONTROL` values (stream size, MMU context ids).
    pub cnn_control: [u64; MAX_CORES],
    /// Per-core command-stream base addresses.
    pub cmd_base_addr: [u64; MAX_CORES],
    /// Alt-address register values, by slot index.
    pub cnn_alt_addr: [u64; MAX_ALT_ADDRS],
    /// LOCM base, or sentinel.
    pub locm_base_addr: u64,
    /// SOCM base, or sentinel.
    pub socm_base_addr: u64,
    /// SOCM circular-buffer window size.
    pub socm_circ_buff_size: u64,
    /// SOCM buffer ownership image.
    pub socm_buf_assignment: u64,
    /// SOCM bank-7 XOR hash bits (0 = leave hardware default).
    pub socm_b7_xor_bits: u64,
    /// SOCM bank-8 XOR hash bits (0 = leave hardware default).
    pub socm_b8_xor_bits: u64,
    /// Low-level sync buffer base, or sentinel.
    pub low_level_sync_base_addr: u64,
    /// Alt-slot usage mask plus per-slot buffer-type bits.
    pub cnn_alt_addr_used: u64,
    /// Virtual-core to physical-core mapping.
    pub cnn_vcore_mapping: u64,
}

impl Default for ConfigRegs {
    fn default() -> Self {
        Self {
            core_assignment: 0,
            cnn_control: [0; MAX_CORES],
            cmd_base_addr: [0; MAX_CORES],
            cnn_alt_addr: [0; MAX_ALT_ADDRS],
            locm_base_addr: u64::MAX,
            socm_base_addr: u64::MAX,
            socm_circ_buff_size: 0,
            socm_buf_assignment: 0,
            socm_b7_xor_bits: 0,
            socm_b8_xor_bits: 0,
            low_level_sync_base_addr: u64::MAX,
            cnn_alt_addr_used: 0,
            cnn_vcore_mapping: 0,
        }
    }
}

/// Memory-hierarchy register snapshot (preload, context override, SLC).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MhRegs {
    /// Preload/prefetch request depths.
    pub cnn_preload_control: u64,
    /// Requestor-context override.
    pub req_ctxt_override: u64,
    /// SLC control (0 when hashing is off).
    pub slc_control: u64,
}

/// CRC capture register snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CrcRegs {
    /// Capture enabled at all.
    pub enabled: bool,
    /// CRC control word.
    pub crc_control: u64,
    /// Per-core combined-CRC capture addresses.
    pub crc_combined_address: [u64; MAX_CORES],
}

/// Returns the cores currently mapped to `wm_id` in the assignment image.
pub fn get_cores(assignment: u64, wm_id: u8) -> u8 {
    let mut core_mask = 0u8;
    for core in 0..MAX_CORES as u8 {
        let field = regs::get_field(
            assignment,
            u32::from(core) * regs::ASSIGNMENT_STRIDE,
            regs::ASSIGNMENT_FIELD_MASK << (u32::from(core) * regs::ASSIGNMENT_STRIDE),
        );
        if field == u64::from(wm_id) {
            core_mask |= id_to_mask(core);
        }
    }
    core_mask
}

/// Binds `core_mask` to `wm_id` in the software mirror; returns the new
/// image (written to hardware as part of the workload configuration).
pub fn assign_cores(assignment: &mut u64, wm_id: u8, core_mask: u8) -> u64 {
    let orig = *assignment;
    let mut image = orig;
    for core in mask_ids(core_mask) {
        let shift = u32::from(core) * regs::ASSIGNMENT_STRIDE;
        image &= !(regs::ASSIGNMENT_FIELD_MASK << shift);
        image |= u64::from(wm_id) << shift;
    }
    debug!(from = orig, to = image, "core assignment updated");
    *assignment = image;
    image
}

/// Rewrites SOCM buffer ownership to UNALLOCATED for `core_mask`.
pub fn release_socm<P: Platform>(io: &mut RegIo<P>, core_mask: u8, to_pdump: bool) {
    let cur = io.read64(regs::SOCM_BUF_ASSIGNMENT);
    let mut new = cur;
    for core in mask_ids(core_mask) {
        let shift = u32::from(core) * regs::ASSIGNMENT_STRIDE;
        new &= !(regs::ASSIGNMENT_FIELD_MASK << shift);
        new |= regs::ASSIGNMENT_UNALLOCATED << shift;
    }
    if cur == new {
        return;
    }
    if to_pdump {
        io.comment(format!("-- Release SOCM on cores {core_mask:#04x}"));
        io.write64_pdump(regs::SOCM_BUF_ASSIGNMENT, new);
    } else {
        io.write64(regs::SOCM_BUF_ASSIGNMENT, new);
    }
}

/// Unbinds `core_mask` from its WM: SOCM ownership first, then the core
/// assignment mirror and register.
pub fn release_cores<P: Platform>(
    io: &mut RegIo<P>,
    assignment: &mut u64,
    core_mask: u8,
    to_pdump: bool,
) {
    release_socm(io, core_mask, to_pdump);

    let cur = *assignment;
    let mut new = cur;
    for core in mask_ids(core_mask) {
        let shift = u32::from(core) * regs::ASSIGNMENT_STRIDE;
        new &= !(regs::ASSIGNMENT_FIELD_MASK << shift);
        new |= regs::ASSIGNMENT_UNALLOCATED << shift;
    }
    if cur == new {
        return;
    }
    if to_pdump {
        io.comment(format!("-- Release cores {core_mask:#04x}"));
        io.write64_pdump(regs::CORE_ASSIGNMENT, new);
    } else {
        io.write64(regs::CORE_ASSIGNMENT, new);
    }
    *assignment = new;
}

/// Computes the SOCM layout for one workload.
///
/// Base = buffer base + `wm_id * (socm_size + guard)`, aligned up to 256;
/// the per-workload chunk is `cores * socm_core_size`, aligned up to 128.
/// Returns the offset of the aligned base from the buffer base.
fn assign_socm<P: Platform>(
    io: &mut RegIo<P>,
    props: &HwProps,
    config: &Config,
    socm_buf_addr: u64,
    wm_id: u8,
    wm_cores: u8,
    circ_buf_offs: u32,
    out: &mut ConfigRegs,
) -> u64 {
    let mut socm_buf_assignment = io.read64(regs::SOCM_BUF_ASSIGNMENT);

    // Use a different address per WM to make debugging easier.
    let mut base_addr =
        socm_buf_addr + u64::from(wm_id) * (props.socm_size_bytes + defaults::VA_GUARD_GAP);
    base_addr = (base_addr + 255) & !255;

    let mut chunk = props.socm_core_size_bytes * u64::from(mask_to_num(wm_cores));
    chunk = (chunk + 127) & !127;

    // circ_buf_offs == 0 means the circular buffer is disabled.
    let circ = u64::from(circ_buf_offs);
    out.socm_circ_buff_size = if circ > 0 && chunk > 0 && circ <= chunk {
        chunk - circ
    } else {
        0
    };

    out.socm_base_addr = base_addr;
    debug!(wm_id, base_addr, "SOCM base assigned");

    for core in mask_ids(wm_cores) {
        let shift = u32::from(core) * regs::ASSIGNMENT_STRIDE;
        socm_buf_assignment &= !(regs::ASSIGNMENT_FIELD_MASK << shift);
        socm_buf_assignment |= u64::from(wm_id) << shift;
    }
    out.socm_buf_assignment = socm_buf_assignment;

    if config.socm_xor_bits[0] != 0 {
        out.socm_b7_xor_bits = config.socm_xor_bits[0];
    }
    if config.socm_xor_bits[1] != 0 {
        out.socm_b8_xor_bits = config.socm_xor_bits[1];
    }

    base_addr - socm_buf_addr
}

/// Builds the register snapshot for one workload, validating the
/// submission against the session's buffers.
pub fn setup_config_regs<P: Platform>(
    io: &mut RegIo<P>,
    props: &HwProps,
    config: &Config,
    session: &mut Session,
    user: &SubmitMulti,
    info: &HwSchedInfo,
    assignment: &mut u64,
) -> Result<ConfigRegs, CoreError> {
    let mut out = ConfigRegs::default();

    // At least one command stream per core plus an input, and at least one
    // output.
    if user.num_inbufs < user.num_cores + 1
        || user.num_inbufs.saturating_sub(user.num_cores) >= user.num_bufs
        || user.num_bufs as usize > MAX_ALT_ADDRS
    {
        error!(
            num_inbufs = user.num_inbufs,
            num_bufs = user.num_bufs,
            "wrong number of buffers"
        );
        return Err(CoreError::InvalidCmd("wrong number of buffers"));
    }
    if user.num_cores < 1 || user.num_cores > props.num_cores {
        error!(num_cores = user.num_cores, "wrong number of cores");
        return Err(CoreError::InvalidCmd("wrong number of cores"));
    }
    if mask_to_num(info.core_mask) != user.num_cores {
        error!(core_mask = info.core_mask, "invalid core mask");
        return Err(CoreError::InvalidCmd("core mask does not match core count"));
    }

    // Make the WM <-> cores binding.
    out.core_assignment = assign_cores(assignment, info.wm_id, info.core_mask);
    debug!(
        wm_id = info.wm_id,
        cores = get_cores(*assignment, info.wm_id),
        "cores assigned to WM"
    );

    io.comment("-- Load inputs");

    // Program the per-core command streams first.
    let mut core_mask = info.core_mask;
    let vcore_stride = regs::OS0_CNN_VCORE_MAPPING_STRIDE;
    let mut vcore_map = 0u64;
    for i in 0..user.num_cores as usize {
        let buf_id = user.cmdbuf[i];
        let buf = session
            .find_buf(buf_id)
            .ok_or(CoreError::UnknownBuffer(buf_id))?
            .clone();
        if buf.size == 0 {
            error!(buf_id, "invalid cmdstream size");
            return Err(CoreError::InvalidCmd("empty command stream"));
        }

        // Next core from the WM set, lowest id first.
        let core_id = core_mask.trailing_zeros() as u8;
        core_mask &= !id_to_mask(core_id);

        let size_min1 = (buf.size.min(2048) / 32).saturating_sub(1);
        out.cnn_control[core_id as usize] = regs::set_field(
            size_min1,
            regs::OS0_CNN_CONTROL_CMD_SIZE_MIN1_SHIFT,
            regs::OS0_CNN_CONTROL_CMD_SIZE_MIN1_MASK,
        ) | regs::set_field(
            u64::from(session.mmu_ctxs[MMU_REQ_MODEL].hw_id),
            regs::OS0_CNN_CONTROL_CTXT_PASID_SHIFT,
            regs::OS0_CNN_CONTROL_CTXT_PASID_MASK,
        ) | regs::set_field(
            u64::from(session.mmu_ctxs[MMU_REQ_IO].hw_id),
            regs::OS0_CNN_CONTROL_CTXT_PASID_IO_SHIFT,
            regs::OS0_CNN_CONTROL_CTXT_PASID_IO_MASK,
        );
        out.cmd_base_addr[core_id as usize] = buf.devvirt;

        vcore_map |= u64::from(core_id) << (i as u32 * vcore_stride);

        if buf.needs_flush {
            session.mem_ctx.sync_cpu_to_device(buf_id);
        }
    }

    // Alt-address buffers (inputs then outputs).
    for (i, &buf_id) in user.bufs.iter().enumerate() {
        let buf = session
            .find_buf(buf_id)
            .ok_or(CoreError::UnknownBuffer(buf_id))?
            .clone();

        let mut offset = u64::from(*user.bufoffsets.get(i).unwrap_or(&0));
        let size = u64::from(*user.bufsizes.get(i).unwrap_or(&0));
        if size + offset > buf.size {
            error!(buf_id, size, offset, buf_size = buf.size, "invalid size+offset");
            return Err(CoreError::InvalidCmd("buffer window out of bounds"));
        }

        let slot = usize::from(*user.regidx.get(i).unwrap_or(&0));
        if slot >= MAX_ALT_ADDRS {
            return Err(CoreError::InvalidCmd("alt-address index out of range"));
        }
        out.cnn_alt_addr_used |= 1 << slot;
        out.cnn_alt_addr_used |= (buf.req_type as u64)
            << (regs::OS0_CNN_ALT_ADDRESS_USED_BUF_TYPE_SHIFT + slot as u32);

        if user.onchipram_bufs[0] == buf.id {
            // Local OCM window.
            if buf.devvirt + props.locm_size_bytes + defaults::VA_GUARD_GAP
                > defaults::VA_HEAP1_BASE
            {
                error!(buf_id, "LOCM overflow");
                return Err(CoreError::InvalidCmd("LOCM overflow"));
            }
            out.locm_base_addr = buf.devvirt;
            debug!(addr = buf.devvirt, "LOCM base assigned");
        }

        if user.onchipram_bufs[1] == buf.id {
            // Shared OCM window; the alt address points at the aligned
            // per-WM base.
            if buf.devvirt + props.socm_size_bytes + defaults::VA_GUARD_GAP
                > defaults::VA_HEAP1_BASE
            {
                error!(buf_id, "SOCM overflow");
                return Err(CoreError::InvalidCmd("SOCM overflow"));
            }
            offset = assign_socm(
                io,
                props,
                config,
                buf.devvirt,
                info.wm_id,
                info.core_mask,
                user.shared_circ_buf_offs,
                &mut out,
            );
            if out.socm_base_addr + props.socm_size_bytes + defaults::VA_GUARD_GAP
                > defaults::VA_HEAP1_BASE
            {
                error!(buf_id, "SOCM overflow");
                return Err(CoreError::InvalidCmd("SOCM overflow"));
            }
        }

        out.cnn_alt_addr[slot] = buf.devvirt + offset;

        if buf.needs_flush {
            session.mem_ctx.sync_cpu_to_device(buf_id);
        }
    }

    // Low-level sync buffer: fixed per-WM slot after LOCM and all SOCM
    // regions.
    let ll_sync_addr = defaults::OCM_VA_BASE
        + props.locm_size_bytes
        + defaults::VA_GUARD_GAP
        + u64::from(props.num_cores) * (props.socm_size_bytes + defaults::VA_GUARD_GAP)
        + u64::from(info.wm_id) * (defaults::LLSYNC_SIZE + defaults::VA_GUARD_GAP);
    if ll_sync_addr + defaults::LLSYNC_SIZE + defaults::VA_GUARD_GAP > defaults::VA_HEAP1_BASE {
        error!("LLSYNC overflow");
        return Err(CoreError::InvalidCmd("LLSYNC overflow"));
    }
    out.low_level_sync_base_addr = ll_sync_addr;
    debug!(addr = ll_sync_addr, "LLSYNC base assigned");

    out.cnn_vcore_mapping = vcore_map;
    Ok(out)
}

/// Pushes a configuration snapshot to hardware.
pub fn write_config_regs<P: Platform>(io: &mut RegIo<P>, info: &HwSchedInfo, cfg: &ConfigRegs) {
    io.comment(format!(
        "-- Assign cores {:#04x} to WM{}",
        info.core_mask, info.wm_id
    ));
    io.write64_pdump(regs::CORE_ASSIGNMENT, cfg.core_assignment);

    for core_id in mask_ids(info.core_mask) {
        io.comment(format!("-- Select core: {core_id}"));
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(id_to_mask(core_id)));
        io.comment(format!("-- Setup command stream for core {core_id}"));
        io.write64_pdump(regs::OS0_CNN_CONTROL, cfg.cnn_control[core_id as usize]);
        io.write64_pdump(
            regs::OS0_CNN_CMD_BASE_ADDRESS,
            cfg.cmd_base_addr[core_id as usize],
        );
    }

    // Operate only on the cores assigned to this WM from now on.
    io.comment(format!(
        "-- Select only cores assigned to WM: {:#04x}",
        info.core_mask
    ));
    io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(info.core_mask));

    if cfg.socm_base_addr != u64::MAX {
        io.comment(format!("-- Set SOCM circular buffer size for WM{}", info.wm_id));
        io.write64_pdump(regs::SOCM_CIRCULAR_BUFFER_SIZE, cfg.socm_circ_buff_size);
        io.comment(format!("-- Set SOCM WM{} address", info.wm_id));
        io.write64_pdump(regs::SOCM_BASE_ADDR, cfg.socm_base_addr);
        io.comment(format!(
            "-- Assign SOCM bufs {:#04x} to WM{}",
            info.core_mask, info.wm_id
        ));
        io.write64_pdump(regs::SOCM_BUF_ASSIGNMENT, cfg.socm_buf_assignment);
        if cfg.socm_b7_xor_bits != 0 {
            io.write64_pdump(regs::SOCM_B7_XOR_BITS, cfg.socm_b7_xor_bits);
        }
        if cfg.socm_b8_xor_bits != 0 {
            io.write64_pdump(regs::SOCM_B8_XOR_BITS, cfg.socm_b8_xor_bits);
        }
    }

    if cfg.locm_base_addr != u64::MAX {
        io.comment("-- Set LOCM address");
        io.write64_pdump(regs::OS0_LOCM_BASE_ADDR, cfg.locm_base_addr);
    }

    for i in 0..MAX_ALT_ADDRS {
        if cfg.cnn_alt_addr_used & (1 << i) != 0 {
            io.comment(format!("-- Set ALT_{i} address"));
            io.write64_pdump(regs::os0_cnn_alt_address(i), cfg.cnn_alt_addr[i]);
        }
    }

    if cfg.low_level_sync_base_addr != u64::MAX {
        io.comment("-- Set LLSYNC address");
        io.write64_pdump(regs::LOW_LEVEL_SYNC_BASE_ADDR, cfg.low_level_sync_base_addr);
    }

    // Tell the command decoder which alt addresses to prefetch.
    io.comment("-- Setup CNN prefetch register");
    io.write64_pdump(regs::OS0_CNN_ALT_ADDRESS_USED, cfg.cnn_alt_addr_used);

    io.comment("-- Program virtual core mappings");
    io.write64_pdump(regs::OS0_CNN_VCORE_MAPPING, cfg.cnn_vcore_mapping);
}

/// Memory-hierarchy setup for one kick; returns the snapshot for optional
/// confirmation.
pub fn mh_setup<P: Platform>(io: &mut RegIo<P>, config: &Config, ctx_id: u8) -> MhRegs {
    let mut out = MhRegs::default();

    out.cnn_preload_control = (regs::CNN_PRELOAD_CTRL_N_64
        << regs::OS0_CNN_PRELOAD_CBUF_N_REQS_SHIFT)
        | (regs::CNN_PRELOAD_CTRL_N_256 << regs::OS0_CNN_PRELOAD_MMM_RD_N_REQS_SHIFT)
        | (regs::CNN_PRELOAD_CTRL_N_256 << regs::OS0_CNN_PRELOAD_MMM_WR_N_REQS_SHIFT);
    io.comment(format!("-- MH setup:{ctx_id}"));
    io.write64_pdump(regs::OS0_CNN_PRELOAD_CONTROL, out.cnn_preload_control);

    out.req_ctxt_override = regs::REQ_CTXT_OVERRIDE_OS0_EN;
    io.write64_pdump(regs::REQ_CTXT_OVERRIDE, out.req_ctxt_override);

    if config.slc_hash_mode != 0 {
        out.slc_control = regs::set_field(
            u64::from(config.slc_hash_mode),
            regs::SLC_CTRL_HASH_MODE_SHIFT,
            regs::SLC_CTRL_HASH_MODE_MASK,
        );
        io.write64_pdump(regs::SLC_CTRL, out.slc_control);
    }
    out
}

/// Programs the combined-CRC capture addresses for one workload.
pub fn prepare_crc_regs<P: Platform>(
    io: &mut RegIo<P>,
    config: &Config,
    session: &Session,
    info: &HwSchedInfo,
) -> CrcRegs {
    let mut out = CrcRegs::default();
    let Some(crc_buf) = session.combined_crc_buf else {
        return out;
    };
    if !config.cnn_combined_crc_enable {
        return out;
    }
    let Some(buf) = session.find_buf(crc_buf) else {
        return out;
    };

    out.enabled = true;
    out.crc_control = 1;
    io.comment("-- Setup combined CRC capture");
    for core_id in mask_ids(info.core_mask) {
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(id_to_mask(core_id)));
        let addr = buf.devvirt + u64::from(core_id) * COMBINED_CRC_CORE_OFFSET;
        out.crc_combined_address[core_id as usize] = addr;
        io.write64_pdump(regs::OS0_COMBINED_CNN_CRC_ADDRESS, addr);
        io.write64_pdump(regs::OS0_CNN_CRC_CONTROL, out.crc_control);
    }
    out
}

/// Chooses the WM-workload and core watchdog budgets for one kick.
///
/// With `use_estimated_cycles_for_wm_wdt` the submission's estimate plus a
/// margin bounds the workload; otherwise the static budget applies.
pub fn hwwdt_calculate(config: &Config, estimated_cycles: u32) -> (u64, u64) {
    if config.use_estimated_cycles_for_wm_wdt {
        (
            u64::from(estimated_cycles) + config.wm_wdt_estimated_cycles_margin,
            config.core_wdt_cycles,
        )
    } else {
        (config.wm_wl_wdt_cycles, config.core_wdt_cycles)
    }
}

/// Programs the system, WM and core watchdogs for one workload.
pub fn hwwdt_setup<P: Platform>(
    io: &mut RegIo<P>,
    config: &Config,
    assignment: u64,
    info: &HwSchedInfo,
    wl_cycles: u64,
    core_cycles: u64,
    hw_brns: u64,
) {
    io.comment("-- Set SYSTEM watchdogs");
    io.write64_pdump(regs::SYS_MEM_WDT_COMPAREMATCH, defaults::SYS_MEM_WDT_CYCLES);
    io.write64_pdump(regs::SYS_MEM_WDT_CTRL, regs::WDT_MODE_KICK_WL);

    io.comment(format!("-- Set WM{} watchdogs", info.wm_id));
    io.select_wm(info.wm_id);
    io.write64_pdump(regs::WM_WL_WDT_COMPAREMATCH, wl_cycles);
    io.write64_pdump(regs::WM_WL_WDT_CTRL, regs::WDT_MODE_KICK_WL);
    io.write64_pdump(regs::WM_WL_IDLE_WDT_COMPAREMATCH, defaults::WM_IDLE_WDT_CYCLES);
    io.write64_pdump(regs::WM_WL_IDLE_WDT_CTRL, regs::WDT_MODE_ENABLED);
    io.write64_pdump(regs::WM_SOCIF_WDT_COMPAREMATCH, defaults::WM_SOCIF_WDT_CYCLES);
    io.write64_pdump(regs::WM_SOCIF_WDT_CTRL, regs::WDT_MODE_ENABLED);

    io.comment("-- Select cores");
    io.write64_pdump(
        regs::CORE_CTRL_INDIRECT,
        u64::from(get_cores(assignment, info.wm_id)),
    );
    io.comment("-- Set CORE watchdogs");
    io.write64_pdump(regs::CNN_WDT_COMPAREMATCH, core_cycles);
    io.write64_pdump(regs::CNN_WDT_CTRL, regs::WDT_MODE_KICK_PASS);

    if hw_brns & (BRN_71556 | BRN_71338) != 0 {
        // Affected hardware requires the maximum value.
        io.write64_pdump(
            regs::CNN_MEM_WDT_COMPAREMATCH,
            regs::CNN_MEM_WDT_COMPAREMATCH_MASKFULL,
        );
    } else {
        io.write64_pdump(regs::CNN_MEM_WDT_COMPAREMATCH, config.core_mem_wdt_cycles);
    }
    io.write64_pdump(regs::CNN_MEM_WDT_CTRL, regs::WDT_MODE_KICK_PASS);

    let sync = regs::CNN_CORE_SYNC_WDT_CTRL_ENABLE_EN
        | regs::set_field(
            defaults::CORE_SYNC_WDT_CYCLES,
            regs::CNN_CORE_SYNC_WDT_CTRL_VALUE_SHIFT,
            regs::CNN_CORE_SYNC_WDT_CTRL_VALUE_MASK,
        );
    io.write64_pdump(regs::CNN_CORE_SYNC_WDT_CTRL, sync);
}

/// Reads back everything written for this workload, comparing against the
/// snapshots. Returns `(top_error, per_core_error_mask)`.
pub fn confirm_config_regs<P: Platform>(
    io: &mut RegIo<P>,
    config: &Config,
    info: &HwSchedInfo,
    cfg: &ConfigRegs,
    mh: &MhRegs,
    crc: &CrcRegs,
) -> (bool, u8) {
    let mut core_errors = 0u8;
    let inject = config.fault_inject.conf_err;

    let check_top = |io: &mut RegIo<P>, expected: u64, reg: u64| -> bool {
        let mut val = io.read64(reg);
        if inject {
            val = !val;
        }
        if val != expected {
            error!(reg, expected, actual = val, "confirmation writes mismatch, top register");
            return true;
        }
        false
    };

    if check_top(io, cfg.core_assignment, regs::CORE_ASSIGNMENT) {
        return (true, core_errors);
    }
    if mh.req_ctxt_override != 0 && check_top(io, mh.req_ctxt_override, regs::REQ_CTXT_OVERRIDE) {
        return (true, core_errors);
    }
    if mh.slc_control != 0 && check_top(io, mh.slc_control, regs::SLC_CTRL) {
        return (true, core_errors);
    }

    for core_id in mask_ids(info.core_mask) {
        io.write64(regs::CORE_CTRL_INDIRECT, u64::from(id_to_mask(core_id)));

        let mut check_core = |io: &mut RegIo<P>, expected: u64, reg: u64| {
            let mut val = io.read64(reg);
            if inject {
                val = !val;
            }
            if val != expected {
                error!(
                    core_id,
                    reg,
                    expected,
                    actual = val,
                    "confirmation writes mismatch, core register"
                );
                core_errors |= id_to_mask(core_id);
            }
        };

        check_core(io, cfg.cnn_control[core_id as usize], regs::OS0_CNN_CONTROL);
        check_core(
            io,
            cfg.cmd_base_addr[core_id as usize],
            regs::OS0_CNN_CMD_BASE_ADDRESS,
        );

        if cfg.socm_base_addr != u64::MAX {
            check_core(io, cfg.socm_circ_buff_size, regs::SOCM_CIRCULAR_BUFFER_SIZE);
            check_core(io, cfg.socm_base_addr, regs::SOCM_BASE_ADDR);
            check_core(io, cfg.socm_buf_assignment, regs::SOCM_BUF_ASSIGNMENT);
            if cfg.socm_b7_xor_bits != 0 {
                check_core(io, cfg.socm_b7_xor_bits, regs::SOCM_B7_XOR_BITS);
            }
            if cfg.socm_b8_xor_bits != 0 {
                check_core(io, cfg.socm_b8_xor_bits, regs::SOCM_B8_XOR_BITS);
            }
        }
        if cfg.locm_base_addr != u64::MAX {
            check_core(io, cfg.locm_base_addr, regs::OS0_LOCM_BASE_ADDR);
        }
        for i in 0..MAX_ALT_ADDRS {
            if cfg.cnn_alt_addr_used & (1 << i) != 0 {
                check_core(io, cfg.cnn_alt_addr[i], regs::os0_cnn_alt_address(i));
            }
        }
        if cfg.low_level_sync_base_addr != u64::MAX {
            check_core(io, cfg.low_level_sync_base_addr, regs::LOW_LEVEL_SYNC_BASE_ADDR);
        }
        check_core(io, cfg.cnn_alt_addr_used, regs::OS0_CNN_ALT_ADDRESS_USED);
        check_core(io, cfg.cnn_vcore_mapping, regs::OS0_CNN_VCORE_MAPPING);

        if crc.enabled {
            check_core(io, crc.crc_control, regs::OS0_CNN_CRC_CONTROL);
            check_core(
                io,
                crc.crc_combined_address[core_id as usize],
                regs::OS0_COMBINED_CNN_CRC_ADDRESS,
            );
        }
    }

    (false, core_errors)
}

/// Resets one WM and its assigned cores (error recovery).
///
/// The WM is held in reset while each core goes through the
/// assert/deassert + scrub sequence, then released.
pub fn wm_reset<P: Platform>(io: &mut RegIo<P>, info: &HwSchedInfo) -> Result<(), CoreError> {
    debug!(wm_id = info.wm_id, core_mask = info.core_mask, "WM reset");
    io.comment("-- WM level RESET sequence BEGIN");

    let mut wm_cores_mask = info.core_mask;

    io.comment(format!(
        "-- Force global clocks ON for all cores assigned to WM {} (others set to AUTO)",
        info.wm_id
    ));
    io.write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_reset(wm_cores_mask));

    io.comment(format!("-- Move WM{} into reset state", info.wm_id));
    let wm_reset_val = regs::set_field(
        u64::from(id_to_mask(info.wm_id)),
        regs::SYS_RESET_CTRL_WM_SHIFT,
        regs::SYS_RESET_CTRL_WM_MASK,
    );
    io.write64_pdump(regs::SYS_RESET_CTRL, wm_reset_val);
    let _ = io.read64_pdump(regs::SYS_RESET_CTRL);

    while wm_cores_mask != 0 {
        let id = wm_cores_mask.trailing_zeros() as u8;
        let core_mask = id_to_mask(id);
        wm_cores_mask &= !core_mask;

        // Reset assertion.
        io.comment(format!("-- Select core{id}"));
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(core_mask));
        io.comment(format!("-- Disable page fault interrupts for core{id}"));
        let mut val = io.read64(regs::SYS_EVENT_ENABLE);
        val &= !regs::set_field(
            u64::from(core_mask),
            regs::SYS_EVENT_MMU_PAGE_FAULT_SHIFT,
            regs::SYS_EVENT_MMU_PAGE_FAULT_MASK,
        );
        io.write64_pdump(regs::SYS_EVENT_ENABLE, val);
        io.comment(format!("-- Set all core{id} level clocks to AUTO"));
        io.write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_AUTO));
        io.comment(format!("-- Perform soft reset on core{id}"));
        io.write64_pdump(regs::CORE_SOFT_RESET, regs::CORE_SOFT_RESET_CORE_RESET_EN);
        let _ = io.read64_pdump(regs::CORE_SOFT_RESET);
        io.write64_pdump(regs::CORE_SOFT_RESET, 0);
        io.comment(format!("-- Wait until core{id} memory bus reset has completed"));
        io.poll64(
            regs::CORE_EVENT_HOST_STATUS,
            regs::CORE_EVENT_MEMBUS_RESET_DONE_EN,
            regs::CORE_EVENT_MEMBUS_RESET_DONE_EN,
            1000,
            1000,
        )?;
        io.comment(format!("-- Clear core{id} memory bus reset interrupt"));
        io.write64_pdump(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENT_MEMBUS_RESET_DONE_EN);
        io.comment(format!("-- Deselect core{id}"));
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, 0);
        io.comment("-- Ensure no resets are pending");
        io.write64_pdump(regs::SYS_RESET_CTRL, wm_reset_val);
        io.comment(format!("-- Move core{id} into full reset state"));
        let val = regs::set_field(
            u64::from(core_mask),
            regs::SYS_RESET_CTRL_CORE_SHIFT,
            regs::SYS_RESET_CTRL_CORE_MASK,
        ) | wm_reset_val;
        io.write64_pdump(regs::SYS_RESET_CTRL, val);
        let _ = io.read64_pdump(regs::SYS_RESET_CTRL);

        // Reset deassertion.
        io.comment(format!("-- Move core{id} out of reset state"));
        io.write64_pdump(regs::SYS_RESET_CTRL, wm_reset_val);
        let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
        io.comment(format!("-- Select core{id} again"));
        io.write64_pdump(regs::CORE_CTRL_INDIRECT, u64::from(core_mask));
        io.comment("-- Force core clocks ON for everything");
        io.write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_ON));
        io.comment(format!("-- Perform core{id} level RAM initialisation"));
        io.write64_pdump(regs::FUSA_CONTROL, regs::FUSA_CONTROL_ECC_INIT_KICK_EN);
        io.comment(format!("-- Perform core{id} LOCM scrubbing"));
        io.write64_pdump(regs::LOCM_SCRUB_CTRL, regs::SCRUB_KICK_EN);
        io.comment("-- Wait until the RAM initialisation sequence has completed");
        io.poll64(
            regs::CORE_EVENT_HOST_STATUS,
            regs::CORE_EVENT_RAM_INIT_DONE_EN,
            regs::CORE_EVENT_RAM_INIT_DONE_EN,
            100,
            1000,
        )?;
        io.comment(format!("-- Clear core{id} RAM reset interrupt"));
        io.write64_pdump(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENT_RAM_INIT_DONE_EN);
        io.comment(format!("-- Confirm that core{id} RAM reset interrupt is cleared"));
        io.poll64(
            regs::CORE_EVENT_HOST_STATUS,
            0,
            regs::CORE_EVENT_RAM_INIT_DONE_EN,
            10,
            10,
        )?;
        io.comment("-- Wait until the LOCM scrubbing sequence has completed.");
        io.poll64(
            regs::CORE_EVENT_HOST_STATUS,
            regs::CORE_EVENT_LOCM_SCRUB_DONE_EN,
            regs::CORE_EVENT_LOCM_SCRUB_DONE_EN,
            1000,
            1000,
        )?;
        io.comment(format!("-- Deassert core{id} LOCM scrubbing"));
        io.write64_pdump(regs::LOCM_SCRUB_CTRL, 0);
        io.comment(format!("-- Clear core{id} LOCM scrub interrupt"));
        io.write64_pdump(regs::CORE_EVENT_HOST_CLEAR, regs::CORE_EVENT_LOCM_SCRUB_DONE_EN);
        io.comment(format!("-- Confirm that core{id} LOCM scrub interrupt is cleared"));
        io.poll64(
            regs::CORE_EVENT_HOST_STATUS,
            0,
            regs::CORE_EVENT_LOCM_SCRUB_DONE_EN,
            10,
            10,
        )?;
        io.comment("-- Enable CORE events to WM");
        io.write64_pdump(regs::CORE_EVENT_WM_ENABLE, regs::CORE_EVENTS_DEFAULT);
        io.comment("-- Clear CORE events on WM");
        io.write64_pdump(
            regs::CORE_EVENT_WM_CLEAR,
            regs::CORE_EVENTS_DEFAULT
                | regs::CORE_EVENT_RAM_INIT_DONE_EN
                | regs::CORE_EVENT_LOCM_SCRUB_DONE_EN
                | regs::CORE_EVENT_MEMBUS_RESET_DONE_EN,
        );
        io.comment("-- Enable INTERCONNECT events to WM");
        io.write64_pdump(regs::INTERCONNECT_EVENT_WM_ENABLE, regs::IC_EVENTS_DEFAULT);
        io.comment("-- Disable CORE events on host");
        io.write64_pdump(regs::CORE_EVENT_HOST_ENABLE, 0);
        io.comment(format!("-- Set all core{id} level clocks back to AUTO"));
        io.write64_pdump(regs::CLK_CTRL0, regs::main_clocks_default(regs::CLK_MODE_AUTO));
        io.comment(format!(
            "-- Set core{id} global clock back to AUTO (others set to ON or AUTO)"
        ));
        if wm_cores_mask == 0 {
            io.write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_default(regs::CLK_MODE_AUTO));
        } else {
            io.write64_pdump(regs::SYS_CLK_CTRL0, regs::sys_clocks_reset(wm_cores_mask));
        }
    }

    io.comment(format!("-- Move WM{} out of reset state", info.wm_id));
    io.write64_pdump(regs::SYS_RESET_CTRL, 0);
    let _ = io.read64_pdump(regs::SYS_RESET_CTRL);
    io.comment("-- WM level RESET sequence END");
    Ok(())
}

/// Logs the state of a failed WM (watchdog diagnostics).
pub fn status_dump<P: Platform>(io: &mut RegIo<P>, wm_id: u8, core_mask: u8) {
    io.select_wm(wm_id);
    let status = io.read64(regs::WM_STATUS);
    let state = status & regs::WM_STATUS_STATE_MASK;
    error!(wm_id, core_mask, state, "WM failure status");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_round_trips_through_image() {
        let mut image = regs::ASSIGNMENT_ALL_UNALLOCATED;
        assign_cores(&mut image, 2, 0b0011);
        assert_eq!(get_cores(image, 2), 0b0011);
        assert_eq!(get_cores(image, 1), 0);
        assign_cores(&mut image, 1, 0b0100);
        assert_eq!(get_cores(image, 1), 0b0100);
        assert_eq!(get_cores(image, 2), 0b0011);
    }

    #[test]
    fn unallocated_image_maps_no_wm() {
        for wm in 0..MAX_CORES as u8 {
            assert_eq!(get_cores(regs::ASSIGNMENT_ALL_UNALLOCATED, wm), 0);
        }
    }

    #[test]
    fn wdt_budget_uses_estimate_when_configured() {
        let mut config = Config::default();
        config.wm_wl_wdt_cycles = 1000;
        config.core_wdt_cycles = 2000;
        assert_eq!(hwwdt_calculate(&config, 123), (1000, 2000));

        config.use_estimated_cycles_for_wm_wdt = true;
        config.wm_wdt_estimated_cycles_margin = 10;
        assert_eq!(hwwdt_calculate(&config, 123), (133, 2000));
    }
}
