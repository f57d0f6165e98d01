//! Transition planner
//!
//! Synthesizes the ordered list of register operations taking the hardware
//! from a current clock tree (or an unknown state) to a target tree. The
//! plan never passes through an illegal intermediate state:
//!
//! - the system clock mux is never pointed at a source that is not ready;
//! - a source is disabled only after the mux, and every domain it feeds,
//!   has moved away;
//! - flash wait states are raised before a frequency increase commits and
//!   lowered only after a decrease;
//! - bus prescalers are batched into one configuration-register write per
//!   direction: divisions that tighten land before the mux switch,
//!   divisions that relax land after it, so no bus ever runs over its
//!   ceiling;
//! - the PLL configuration is only written while the PLL is disabled,
//!   parking the system clock on the internal oscillator first when
//!   necessary.
//!
//! When the current state is unknown (cold start, externally modified
//! hardware) the plan begins with a defensive preamble that forces the
//! internal oscillator active and selected, then proceeds from that known
//! baseline with every inherited setting rewritten.
//!
//! Planning is pure: it only reads the two trees and the capability table,
//! and the whole target is validated before the first operation is
//! emitted.

use super::capability::CapabilityTable;
use super::field::{pack_prescalers, pack_pll_config, FieldId, SW_HSI};
use super::field::{PLLSRC_HSE, PLLSRC_HSI};
use super::tree::{ClockTree, NodeId};

#[cfg(feature = "log")]
use log::debug;

/// One atomic hardware operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    /// Read-modify-write the field to the given (field-relative) value
    Write {
        /// Field to program
        field: FieldId,
        /// New field-relative value
        value: u32,
    },
    /// Poll the field until it reads the given value
    WaitReady {
        /// Field to poll
        field: FieldId,
        /// Value the field must reach
        value: u32,
        /// Spin bound; `None` waits indefinitely
        max_spins: Option<u32>,
    },
}

/// Upper bound on the number of operations a single transition can need.
pub const MAX_OPERATIONS: usize = 32;

/// A totally ordered transition plan.
pub type Plan = heapless::Vec<Operation, MAX_OPERATIONS>;

/// Why a transition could not be planned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlanningError {
    /// The target tree violates the capability table or its own chain
    /// arithmetic. Resolver output never does; this is a programming
    /// error in the caller.
    UnsafeTransitionRequested,
    /// The fixed-capacity plan overflowed. Unreachable for well-formed
    /// targets.
    PlanOverflow,
}

fn write(ops: &mut Plan, field: FieldId, value: u32) -> Result<(), PlanningError> {
    ops.push(Operation::Write { field, value })
        .map_err(|_| PlanningError::PlanOverflow)
}

fn wait(
    ops: &mut Plan,
    field: FieldId,
    value: u32,
    max_spins: u32,
) -> Result<(), PlanningError> {
    ops.push(Operation::WaitReady {
        field,
        value,
        max_spins: Some(max_spins),
    })
    .map_err(|_| PlanningError::PlanOverflow)
}

/// The register-visible PLL setup of a tree, `None` when the PLL is off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PllSettings {
    source: u32,
    prescaler: u32,
    multiplier: u32,
    usb_prescaler: u32,
}

fn pll_settings(
    tree: &ClockTree,
    caps: &CapabilityTable,
) -> Option<PllSettings> {
    let pll = tree.node(NodeId::Pll);
    if !pll.used {
        return None;
    }
    let source = if pll.parent == NodeId::Hsi {
        PLLSRC_HSI
    } else {
        PLLSRC_HSE
    };
    let multiplier = caps
        .pll_multipliers
        .iter()
        .position(|&m| m == pll.reverse_divider)? as u32;
    let usb = tree.node(NodeId::Usb);
    Some(PllSettings {
        source,
        prescaler: pll.divider_code,
        multiplier,
        usb_prescaler: if usb.used { usb.divider_code } else { 0 },
    })
}

fn packed_pll(settings: &PllSettings) -> u32 {
    pack_pll_config(
        settings.source,
        settings.prescaler,
        settings.multiplier,
        settings.usb_prescaler,
    )
}

/// Per-domain prescaler divisors and codes, in pack order.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Prescalers {
    divisors: [u32; 4],
    codes: [u32; 4],
}

fn prescalers(tree: &ClockTree) -> Prescalers {
    let mut divisors = [1; 4];
    let mut codes = [0; 4];
    for (i, id) in [NodeId::Ahb, NodeId::Apb1, NodeId::Apb2, NodeId::Adc]
        .into_iter()
        .enumerate()
    {
        let node = tree.node(id);
        divisors[i] = node.divider;
        codes[i] = node.divider_code;
    }
    Prescalers { divisors, codes }
}

impl Prescalers {
    fn packed(&self) -> u32 {
        pack_prescalers(self.codes[0], self.codes[1], self.codes[2], self.codes[3])
    }

    /// Elementwise safer (more divided) combination of two settings.
    fn tighter(&self, other: &Prescalers) -> Prescalers {
        let mut result = *self;
        for i in 0..4 {
            if other.divisors[i] > result.divisors[i] {
                result.divisors[i] = other.divisors[i];
                result.codes[i] = other.codes[i];
            }
        }
        result
    }
}

/// The external oscillator mode a tree runs, if any.
fn hse_mode(tree: &ClockTree) -> Option<NodeId> {
    [NodeId::Hse, NodeId::HseBypass]
        .into_iter()
        .find(|&id| tree.node(id).used)
}

/// Validate a target tree against the capability table and its own chain
/// arithmetic before anything is emitted.
fn validate_target(
    target: &ClockTree,
    caps: &CapabilityTable,
) -> Result<(), PlanningError> {
    let fail = Err(PlanningError::UnsafeTransitionRequested);

    let sys = target.node(NodeId::Sys);
    if !sys.used || !target.node(sys.parent).used {
        return fail;
    }
    match sys.parent {
        NodeId::Pll | NodeId::Hsi | NodeId::Hse | NodeId::HseBypass => {}
        _ => return fail,
    }

    let pll = target.node(NodeId::Pll);
    if pll.used {
        if !pll.parent.is_oscillator() || !target.node(pll.parent).used {
            return fail;
        }
        if pll_settings(target, caps).is_none() {
            return fail;
        }
        let (lo, hi) = caps.pll_output_range;
        if pll.frequency < lo || pll.frequency > hi {
            return fail;
        }
    }

    for id in NodeId::ALL {
        let node = target.node(id);
        if !node.used {
            continue;
        }
        if node.frequency > caps.max_frequency(id) {
            return fail;
        }
        if id.is_oscillator() {
            let legal = match id {
                NodeId::Hsi => node.frequency == caps.hsi_frequency,
                _ => {
                    let (lo, hi) = caps.hse_frequency_range;
                    node.frequency >= lo && node.frequency <= hi
                }
            };
            if !legal {
                return fail;
            }
            continue;
        }
        let parent = target.node(node.parent);
        if !parent.used || node.divider == 0 {
            return fail;
        }
        let scaled =
            parent.frequency as u64 * node.reverse_divider as u64;
        if node.frequency as u64 != scaled / node.divider as u64 {
            return fail;
        }
    }

    if target.node(NodeId::Usb).used
        && (!caps.has_usb()
            || target.node(NodeId::Usb).frequency != caps.usb_frequency)
    {
        return fail;
    }

    Ok(())
}

/// Plan the transition from `current` (or an unknown state) to `target`.
///
/// With a known current state equal to the target, the plan is empty.
pub fn plan(
    current: Option<&ClockTree>,
    target: &ClockTree,
    caps: &CapabilityTable,
) -> Result<Plan, PlanningError> {
    caps.validate();
    validate_target(target, caps)?;

    let mut ops = Plan::new();
    let defensive = current.is_none();
    let baseline;
    let cur: &ClockTree = match current {
        Some(tree) => tree,
        None => {
            baseline = ClockTree::reset_state(caps.hsi_frequency);
            &baseline
        }
    };

    // Defensive preamble: force a known-good source active and selected,
    // then plan as if transitioning from the reset baseline.
    if defensive {
        write(&mut ops, FieldId::HsiOn, 1)?;
        wait(&mut ops, FieldId::HsiReady, 1, caps.hsi_startup_spins)?;
        write(&mut ops, FieldId::SysClockSwitch, SW_HSI)?;
        wait(&mut ops, FieldId::SysClockStatus, SW_HSI, caps.switch_spins)?;
        write(&mut ops, FieldId::PllOn, 0)?;
    }

    let cur_pll = if defensive { None } else { pll_settings(cur, caps) };
    let tgt_pll = pll_settings(target, caps);

    let cur_hse = if defensive { None } else { hse_mode(cur) };
    let tgt_hse = hse_mode(target);
    // Switching between crystal and bypass mode requires the oscillator,
    // and anything it feeds, to be cycled off first.
    let hse_cycle = match (cur_hse, tgt_hse) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    };

    let pll_reconfigure = match (cur_pll, tgt_pll) {
        (Some(a), Some(b)) => {
            a != b || (hse_cycle && a.source == PLLSRC_HSE)
        }
        (None, Some(_)) => true,
        _ => false,
    };

    let mut active_source = cur.sys_source();
    let mut hsi_on = defensive || cur.node(NodeId::Hsi).used;

    // Park the system clock on the internal oscillator while the PLL or
    // the external oscillator it depends on is reworked underneath it.
    let park = (pll_reconfigure
        && cur_pll.is_some()
        && active_source == NodeId::Pll)
        || (hse_cycle
            && matches!(active_source, NodeId::Hse | NodeId::HseBypass));
    if park {
        if !hsi_on {
            write(&mut ops, FieldId::HsiOn, 1)?;
            wait(&mut ops, FieldId::HsiReady, 1, caps.hsi_startup_spins)?;
            hsi_on = true;
        }
        write(&mut ops, FieldId::SysClockSwitch, SW_HSI)?;
        wait(&mut ops, FieldId::SysClockStatus, SW_HSI, caps.switch_spins)?;
        active_source = NodeId::Hsi;
    }

    // Drain satisfied: the mux no longer points at the PLL.
    if cur_pll.is_some() && pll_reconfigure {
        write(&mut ops, FieldId::PllOn, 0)?;
    }

    // Oscillators the target needs, started and awaited before anything
    // selects them.
    if let Some(mode) = tgt_hse {
        if hse_cycle {
            write(&mut ops, FieldId::HseOn, 0)?;
        }
        if cur_hse != Some(mode) {
            let bypass = (mode == NodeId::HseBypass) as u32;
            write(&mut ops, FieldId::HseBypass, bypass)?;
            write(&mut ops, FieldId::HseOn, 1)?;
            wait(&mut ops, FieldId::HseReady, 1, caps.hse_startup_spins)?;
        }
    }
    if target.node(NodeId::Hsi).used && !hsi_on {
        write(&mut ops, FieldId::HsiOn, 1)?;
        wait(&mut ops, FieldId::HsiReady, 1, caps.hsi_startup_spins)?;
        hsi_on = true;
    }

    // PLL reprogram and start. The configuration is only written while
    // the PLL is off.
    if let Some(settings) = tgt_pll {
        if pll_reconfigure {
            write(&mut ops, FieldId::PllConfiguration, packed_pll(&settings))?;
            write(&mut ops, FieldId::PllOn, 1)?;
            wait(&mut ops, FieldId::PllReady, 1, caps.pll_startup_spins)?;
        }
    }

    // Prescalers, phase one: the elementwise safer combination, valid at
    // both the current and the target system clock. With an unknown
    // current state the inherited values cannot be trusted, so the target
    // values are always written (the baseline runs at the slow internal
    // clock where every division is safe).
    let cur_pre = prescalers(cur);
    let tgt_pre = prescalers(target);
    let phase_one = if defensive {
        tgt_pre
    } else {
        cur_pre.tighter(&tgt_pre)
    };
    if defensive || phase_one.packed() != cur_pre.packed() {
        write(&mut ops, FieldId::BusPrescalers, phase_one.packed())?;
    }

    // Flash latency: raise before the frequency goes up.
    let cur_latency = caps.flash_latency_for(cur.hclk().raw());
    let tgt_latency = caps.flash_latency_for(target.hclk().raw());
    if defensive || tgt_latency > cur_latency {
        write(&mut ops, FieldId::FlashLatency, tgt_latency)?;
    }

    // Switch the system clock mux.
    let tgt_source_code = target.node(NodeId::Sys).divider_code;
    if active_source != target.sys_source() {
        write(&mut ops, FieldId::SysClockSwitch, tgt_source_code)?;
        wait(
            &mut ops,
            FieldId::SysClockStatus,
            tgt_source_code,
            caps.switch_spins,
        )?;
    }

    // Flash latency: lower only after the frequency came down.
    if !defensive && tgt_latency < cur_latency {
        write(&mut ops, FieldId::FlashLatency, tgt_latency)?;
    }

    // Prescalers, phase two: relax the divisions phase one kept tight.
    if phase_one != tgt_pre {
        write(&mut ops, FieldId::BusPrescalers, tgt_pre.packed())?;
    }

    // Drain before disable: the mux has moved, now-unused sources go off.
    if cur_pll.is_some() && !pll_reconfigure && tgt_pll.is_none() {
        write(&mut ops, FieldId::PllOn, 0)?;
    }
    if hsi_on && !target.node(NodeId::Hsi).used {
        write(&mut ops, FieldId::HsiOn, 0)?;
    }
    let hse_was_on = defensive || cur_hse.is_some();
    if hse_was_on && tgt_hse.is_none() {
        write(&mut ops, FieldId::HseOn, 0)?;
    }

    #[cfg(feature = "log")]
    debug!(
        "{}: planned {} operations ({} -> {} Hz{})",
        caps.name,
        ops.len(),
        cur.sys_ck().raw(),
        target.sys_ck().raw(),
        if defensive { ", defensive" } else { "" },
    );

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcc::capability::{CapabilityTable, STM32F103};
    use crate::rcc::field::{Register, SW_HSE, SW_PLL};
    use crate::rcc::tree::NodeId;
    use crate::rcc::Config;
    use crate::time::Hertz;

    fn mhz(f: u32) -> Hertz {
        Hertz::from_raw(f * 1_000_000)
    }

    /// Virtual register model. Replays a plan while checking, after every
    /// single operation, that no safety invariant is violated.
    struct VirtualRcc<'a> {
        caps: &'a CapabilityTable,
        hse_hz: u32,
        hsi_on: bool,
        hse_on: bool,
        hse_bypass: bool,
        pll_on: bool,
        sw: u32,
        pll_cfg: u32,
        prescalers: u32,
        latency: u32,
    }

    impl<'a> VirtualRcc<'a> {
        /// The model starts in hardware reset state.
        fn new(caps: &'a CapabilityTable, hse_hz: u32) -> Self {
            VirtualRcc {
                caps,
                hse_hz,
                hsi_on: true,
                hse_on: false,
                hse_bypass: false,
                pll_on: false,
                sw: SW_HSI,
                pll_cfg: 0,
                prescalers: 0,
                latency: 0,
            }
        }

        fn source_ready(&self, sw: u32) -> bool {
            match sw {
                SW_HSI => self.hsi_on,
                SW_HSE => self.hse_on,
                SW_PLL => self.pll_on,
                _ => false,
            }
        }

        fn pll_output(&self) -> u32 {
            let src = self.pll_cfg & 1;
            let xtpre = (self.pll_cfg >> 1) & 1;
            let mul_code = ((self.pll_cfg >> 2) & 0xf) as usize;
            let mul = self.caps.pll_multipliers[mul_code];
            let input = if src == super::PLLSRC_HSI {
                self.caps.hsi_frequency / self.caps.pll_hsi_prescaler
            } else {
                self.hse_hz / (xtpre + 1)
            };
            input * mul
        }

        fn sys_clock(&self) -> u32 {
            match self.sw {
                SW_HSI => self.caps.hsi_frequency,
                SW_HSE => self.hse_hz,
                _ => self.pll_output(),
            }
        }

        fn divisor(&self, domain: NodeId, code: u32) -> u32 {
            self.caps
                .legal_dividers(domain)
                .iter()
                .find(|d| d.code == code)
                .map(|d| d.divisor)
                .unwrap_or(1)
        }

        /// The invariants every intermediate state must satisfy.
        fn check_state(&self) {
            assert!(
                self.source_ready(self.sw),
                "system clock mux points at a source that is not ready"
            );

            let hclk = self.sys_clock()
                / self.divisor(NodeId::Ahb, self.prescalers & 0xf);
            let legal_for_latency = self
                .caps
                .flash_latency
                .iter()
                .find(|entry| entry.wait_states == self.latency)
                .expect("latency set to an unknown value")
                .max_hclk;
            assert!(
                hclk <= legal_for_latency,
                "core at {} Hz exceeds flash latency {} (max {} Hz)",
                hclk,
                self.latency,
                legal_for_latency
            );

            let pclk1 =
                hclk / self.divisor(NodeId::Apb1, (self.prescalers >> 4) & 0x7);
            let pclk2 =
                hclk / self.divisor(NodeId::Apb2, (self.prescalers >> 7) & 0x7);
            assert!(hclk <= self.caps.ahb_max, "AHB over ceiling");
            assert!(pclk1 <= self.caps.apb1_max, "APB1 over ceiling");
            assert!(pclk2 <= self.caps.apb2_max, "APB2 over ceiling");
            let adc = pclk2
                / self.divisor(NodeId::Adc, (self.prescalers >> 10) & 0x3);
            assert!(adc <= self.caps.adc_max, "ADC over ceiling");
        }

        fn apply_write(&mut self, field: FieldId, value: u32) {
            match field {
                FieldId::HsiOn => {
                    if value == 0 {
                        assert_ne!(self.sw, SW_HSI, "disabling the active source");
                        assert!(
                            !(self.pll_on
                                && self.sw == SW_PLL
                                && self.pll_cfg & 1 == super::PLLSRC_HSI),
                            "disabling the oscillator behind the active PLL"
                        );
                    }
                    self.hsi_on = value != 0;
                }
                FieldId::HseOn => {
                    if value == 0 {
                        assert_ne!(self.sw, SW_HSE, "disabling the active source");
                        assert!(
                            !(self.pll_on
                                && self.sw == SW_PLL
                                && self.pll_cfg & 1 == super::PLLSRC_HSE),
                            "disabling the oscillator behind the active PLL"
                        );
                    }
                    self.hse_on = value != 0;
                }
                FieldId::HseBypass => {
                    assert!(
                        !self.hse_on,
                        "bypass changed while the oscillator is on"
                    );
                    self.hse_bypass = value != 0;
                }
                FieldId::PllOn => {
                    if value == 0 {
                        assert_ne!(self.sw, SW_PLL, "disabling the active source");
                    }
                    self.pll_on = value != 0;
                }
                FieldId::PllConfiguration => {
                    assert!(!self.pll_on, "PLL configured while enabled");
                    self.pll_cfg = value;
                }
                FieldId::SysClockSwitch => {
                    assert!(
                        self.source_ready(value),
                        "mux switched to a source that is not ready"
                    );
                    self.sw = value;
                }
                FieldId::BusPrescalers => self.prescalers = value,
                FieldId::FlashLatency => self.latency = value,
                other => panic!("unexpected write to {:?}", other),
            }
            self.check_state();
        }

        fn read(&self, field: FieldId) -> u32 {
            match field {
                FieldId::HsiReady => self.hsi_on as u32,
                FieldId::HseReady => self.hse_on as u32,
                FieldId::PllReady => self.pll_on as u32,
                FieldId::SysClockStatus => self.sw,
                other => panic!("unexpected poll of {:?}", other),
            }
        }

        fn run(&mut self, plan: &Plan) {
            self.check_state();
            for op in plan {
                match *op {
                    Operation::Write { field, value } => {
                        self.apply_write(field, value)
                    }
                    Operation::WaitReady { field, value, .. } => {
                        // The model is always instantly ready; a mismatch
                        // means the plan waits on something it never set up
                        assert_eq!(
                            self.read(field),
                            value,
                            "wait on {:?} would never complete",
                            field
                        );
                    }
                }
            }
        }

        fn assert_matches(&self, target: &ClockTree) {
            assert_eq!(self.sw, target.node(NodeId::Sys).divider_code);
            assert_eq!(self.sys_clock(), target.sys_ck().raw());
            assert_eq!(self.prescalers, prescalers(target).packed());
            assert_eq!(
                self.latency,
                self.caps.flash_latency_for(target.hclk().raw())
            );
            assert_eq!(self.hsi_on, target.node(NodeId::Hsi).used);
            assert_eq!(self.hse_on, hse_mode(target).is_some());
            assert_eq!(self.pll_on, target.node(NodeId::Pll).used);
        }
    }

    #[test]
    fn planning_to_the_current_state_is_empty() {
        let tree = Config::new().resolve(&STM32F103).unwrap();
        let ops = plan(Some(&tree), &tree, &STM32F103).unwrap();
        assert!(ops.is_empty());

        let reset = ClockTree::reset_state(STM32F103.hsi_frequency);
        let ops = plan(Some(&reset), &reset, &STM32F103).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn reset_to_internal_pll_is_safe_and_lands_on_target() {
        let target = Config::new().resolve(&STM32F103).unwrap();
        let reset = ClockTree::reset_state(STM32F103.hsi_frequency);
        let ops = plan(Some(&reset), &target, &STM32F103).unwrap();

        let mut rcc = VirtualRcc::new(&STM32F103, 0);
        rcc.run(&ops);
        rcc.assert_matches(&target);
    }

    #[test]
    fn unknown_state_gets_a_defensive_preamble() {
        let target = Config::new().resolve(&STM32F103).unwrap();
        let ops = plan(None, &target, &STM32F103).unwrap();

        assert_eq!(
            &ops[..5],
            &[
                Operation::Write { field: FieldId::HsiOn, value: 1 },
                Operation::WaitReady {
                    field: FieldId::HsiReady,
                    value: 1,
                    max_spins: Some(STM32F103.hsi_startup_spins),
                },
                Operation::Write {
                    field: FieldId::SysClockSwitch,
                    value: SW_HSI
                },
                Operation::WaitReady {
                    field: FieldId::SysClockStatus,
                    value: SW_HSI,
                    max_spins: Some(STM32F103.switch_spins),
                },
                Operation::Write { field: FieldId::PllOn, value: 0 },
            ]
        );

        // The preamble must also replay cleanly from actual reset state
        let mut rcc = VirtualRcc::new(&STM32F103, 0);
        rcc.run(&ops);
        rcc.assert_matches(&target);
    }

    #[test]
    fn internal_to_external_pll_follows_the_safe_ordering() {
        // Running from the internal oscillator, moving to a 72 MHz
        // external-PLL configuration with USB
        let current = Config::new()
            .force_skip_pll()
            .resolve(&STM32F103)
            .unwrap();
        let target = Config::new()
            .use_hse(mhz(16))
            .provide_usb()
            .resolve(&STM32F103)
            .unwrap();
        let ops = plan(Some(&current), &target, &STM32F103).unwrap();

        let mut rcc = VirtualRcc::new(&STM32F103, 16_000_000);
        rcc.run(&ops);
        rcc.assert_matches(&target);

        // Spot the required ordering: HSE ready before the PLL starts,
        // PLL ready and latency raised before the mux switches, the
        // internal oscillator disabled last
        let position = |op: &Operation| {
            ops.iter().position(|o| o == op).expect("operation missing")
        };
        let hse_ready = position(&Operation::WaitReady {
            field: FieldId::HseReady,
            value: 1,
            max_spins: Some(STM32F103.hse_startup_spins),
        });
        let pll_on = position(&Operation::Write {
            field: FieldId::PllOn,
            value: 1,
        });
        let latency = position(&Operation::Write {
            field: FieldId::FlashLatency,
            value: 2,
        });
        let switch = position(&Operation::Write {
            field: FieldId::SysClockSwitch,
            value: SW_PLL,
        });
        let hsi_off = position(&Operation::Write {
            field: FieldId::HsiOn,
            value: 0,
        });
        assert!(hse_ready < pll_on);
        assert!(pll_on < switch);
        assert!(latency < switch);
        assert!(switch < hsi_off);
        assert_eq!(hsi_off, ops.len() - 1);
    }

    #[test]
    fn reprogramming_the_driving_pll_parks_on_the_internal_oscillator() {
        // 64 MHz internal PLL -> 72 MHz external PLL: the multiplier
        // changes while the PLL drives the system clock
        let current = Config::new().resolve(&STM32F103).unwrap();
        assert_eq!(current.sys_source(), NodeId::Pll);
        let target = Config::new()
            .use_hse(mhz(8))
            .resolve(&STM32F103)
            .unwrap();
        assert_eq!(target.sys_ck().raw(), 72_000_000);
        let ops = plan(Some(&current), &target, &STM32F103).unwrap();

        // Park first, then disable, then reprogram
        let park = ops
            .iter()
            .position(|op| {
                *op == Operation::Write {
                    field: FieldId::SysClockSwitch,
                    value: SW_HSI,
                }
            })
            .expect("no park");
        let pll_off = ops
            .iter()
            .position(|op| {
                *op == Operation::Write { field: FieldId::PllOn, value: 0 }
            })
            .expect("no PLL disable");
        let pll_cfg = ops
            .iter()
            .position(|op| {
                matches!(
                    op,
                    Operation::Write { field: FieldId::PllConfiguration, .. }
                )
            })
            .expect("no PLL reprogram");
        assert!(park < pll_off);
        assert!(pll_off < pll_cfg);

        let mut rcc = VirtualRcc::new(&STM32F103, 8_000_000);
        // Bring the model to the current state first
        let warmup = plan(None, &current, &STM32F103).unwrap();
        rcc.run(&warmup);
        rcc.assert_matches(&current);

        rcc.run(&ops);
        rcc.assert_matches(&target);
    }

    #[test]
    fn downshift_lowers_latency_and_relaxes_prescalers_after_the_switch() {
        let current = Config::new()
            .use_hse(mhz(16))
            .provide_usb()
            .resolve(&STM32F103)
            .unwrap();
        assert_eq!(current.sys_ck().raw(), 72_000_000);
        let target = Config::new()
            .use_hse(mhz(16))
            .force_skip_pll()
            .resolve(&STM32F103)
            .unwrap();
        assert_eq!(target.sys_ck().raw(), 16_000_000);
        let ops = plan(Some(&current), &target, &STM32F103).unwrap();

        let switch = ops
            .iter()
            .position(|op| {
                *op == Operation::Write {
                    field: FieldId::SysClockSwitch,
                    value: SW_HSE,
                }
            })
            .expect("no switch");
        let latency_drop = ops
            .iter()
            .position(|op| {
                *op == Operation::Write { field: FieldId::FlashLatency, value: 0 }
            })
            .expect("no latency drop");
        let relax = ops
            .iter()
            .position(|op| {
                *op == Operation::Write {
                    field: FieldId::BusPrescalers,
                    value: prescalers(&target).packed(),
                }
            })
            .expect("no prescaler relax");
        assert!(switch < latency_drop);
        assert!(switch < relax);

        let mut rcc = VirtualRcc::new(&STM32F103, 16_000_000);
        let warmup = plan(None, &current, &STM32F103).unwrap();
        rcc.run(&warmup);
        rcc.run(&ops);
        rcc.assert_matches(&target);
    }

    #[test]
    fn crystal_to_bypass_cycles_the_oscillator() {
        let current = Config::new()
            .use_hse(mhz(16))
            .force_skip_pll()
            .resolve(&STM32F103)
            .unwrap();
        let target = Config::new()
            .use_hse(mhz(16))
            .bypass_hse()
            .force_skip_pll()
            .resolve(&STM32F103)
            .unwrap();
        let ops = plan(Some(&current), &target, &STM32F103).unwrap();

        let mut rcc = VirtualRcc::new(&STM32F103, 16_000_000);
        let warmup = plan(None, &current, &STM32F103).unwrap();
        rcc.run(&warmup);
        rcc.run(&ops);
        rcc.assert_matches(&target);
        assert!(rcc.hse_bypass);
    }

    #[test]
    fn an_out_of_spec_target_is_rejected_before_any_operation() {
        let mut target = Config::new().resolve(&STM32F103).unwrap();
        target.node_mut(NodeId::Ahb).frequency = 80_000_000;
        assert_eq!(
            plan(None, &target, &STM32F103),
            Err(PlanningError::UnsafeTransitionRequested)
        );

        let mut target = Config::new().resolve(&STM32F103).unwrap();
        target.node_mut(NodeId::Sys).parent = NodeId::Ahb;
        assert_eq!(
            plan(None, &target, &STM32F103),
            Err(PlanningError::UnsafeTransitionRequested)
        );
    }

    #[test]
    fn defensive_plans_disable_possibly_active_leftovers() {
        // Target does not use the external oscillator: a defensive plan
        // must force it off, since it may be running
        let target = Config::new().resolve(&STM32F103).unwrap();
        let ops = plan(None, &target, &STM32F103).unwrap();
        assert!(ops
            .iter()
            .any(|op| *op
                == Operation::Write { field: FieldId::HseOn, value: 0 }));
        // And it always rewrites prescalers and latency
        assert!(ops.iter().any(|op| matches!(
            op,
            Operation::Write { field: FieldId::BusPrescalers, .. }
        )));
        assert!(ops.iter().any(|op| matches!(
            op,
            Operation::Write { field: FieldId::FlashLatency, .. }
        )));
    }

    #[test]
    fn every_wait_carries_a_bound_from_the_capability_table() {
        let target = Config::new()
            .use_hse(mhz(16))
            .provide_usb()
            .resolve(&STM32F103)
            .unwrap();
        let ops = plan(None, &target, &STM32F103).unwrap();
        for op in &ops {
            if let Operation::WaitReady { field, max_spins, .. } = op {
                let bound = max_spins.expect("unbounded wait in plan");
                assert!(bound > 0, "zero bound for {:?}", field);
                assert_eq!(
                    field.register(),
                    match field {
                        FieldId::SysClockStatus => Register::Cfgr,
                        _ => Register::Cr,
                    }
                );
            }
        }
    }
}
