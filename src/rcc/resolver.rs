//! Clock tree resolver
//!
//! Depth-first enumeration over the discrete configuration space:
//! oscillator choice (when not pinned), PLL on/off, PLL input prescaler and
//! multiplier, and per-domain divider. The space is small (tens of system
//! clock candidates, a handful of dividers each) so the search is a plain
//! pruned scan in preference order rather than anything clever.
//!
//! Preference ordering: exact `required` frequencies are hard constraints;
//! among the remaining candidates the highest system clock wins; among
//! candidates with an equal system clock and a declared base configuration,
//! the one changing the fewest dividers wins.
//!
//! The resolver is a pure function of its inputs: identical constraints
//! against an identical capability table always produce an identical tree
//! or an identical error.

use super::capability::{CapabilityTable, RatioEntry};
use super::field::{SW_HSE, SW_HSI, SW_PLL};
use super::tree::{ClockTree, NodeId};
use super::{Config, DomainConstraint};

#[cfg(feature = "log")]
use log::debug;

/// Why no clock tree satisfies the constraint set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResolutionError {
    /// The requested oscillator cannot run at the requested frequency
    NoFeasibleOscillator,
    /// No PLL multiplier / prescaler combination reaches a legal system
    /// clock satisfying the constraints
    NoFeasiblePllMultiplier,
    /// A domain's constraints cannot be met at any legal system clock
    DomainConstraintUnsatisfiable(NodeId),
    /// The constraint set contradicts itself
    ConflictingConstraints,
}

#[derive(Clone, Copy, Debug)]
struct PllChoice {
    prescaler: u32,
    prescaler_code: u32,
    multiplier: u32,
    output: u32,
}

#[derive(Clone, Copy, Debug)]
struct SysCandidate {
    source: NodeId,
    sys: u32,
    pll: Option<PllChoice>,
}

// osc direct + every (prescaler, multiplier) pair
const MAX_CANDIDATES: usize = 64;

/// Resolve a constraint set against a capability table.
pub fn resolve(
    config: &Config,
    caps: &CapabilityTable,
) -> Result<ClockTree, ResolutionError> {
    caps.validate();
    config.check_conflicts()?;

    let (osc_id, osc_freq) = select_oscillator(config, caps)?;

    let mut candidates: heapless::Vec<SysCandidate, MAX_CANDIDATES> =
        heapless::Vec::new();
    collect_candidates(config, caps, osc_id, osc_freq, &mut candidates);

    if candidates.is_empty() {
        return Err(if config.force_skip_pll {
            ResolutionError::DomainConstraintUnsatisfiable(NodeId::Sys)
        } else {
            ResolutionError::NoFeasiblePllMultiplier
        });
    }

    // Candidates are in preference order, so the first success wins unless
    // a base configuration asks for the fewest-changes tie-break among
    // candidates with the same system clock.
    let mut best: Option<(ClockTree, u32)> = None;
    let mut first_failure: Option<NodeId> = None;

    for candidate in &candidates {
        if let Some((ref tree, _)) = best {
            if candidate.sys < tree.sys_ck().raw() {
                break;
            }
        }
        match try_candidate(config, caps, osc_id, osc_freq, candidate) {
            Ok(tree) => {
                let changes = match config.base {
                    Some(ref base) => divider_changes(&tree, base),
                    None => 0,
                };
                let better = match best {
                    Some((_, best_changes)) => changes < best_changes,
                    None => true,
                };
                if better {
                    best = Some((tree, changes));
                }
                if config.base.is_none() {
                    break;
                }
            }
            Err(domain) => {
                first_failure.get_or_insert(domain);
            }
        }
    }

    match best {
        Some((tree, _)) => {
            #[cfg(feature = "log")]
            debug!(
                "{}: resolved sys_ck {} Hz from {:?}, hclk {} Hz, pclk1 {} Hz, pclk2 {} Hz",
                caps.name,
                tree.sys_ck().raw(),
                tree.sys_source(),
                tree.hclk().raw(),
                tree.pclk1().raw(),
                tree.pclk2().raw(),
            );
            Ok(tree)
        }
        None => Err(ResolutionError::DomainConstraintUnsatisfiable(
            first_failure.unwrap_or(NodeId::Sys),
        )),
    }
}

fn select_oscillator(
    config: &Config,
    caps: &CapabilityTable,
) -> Result<(NodeId, u32), ResolutionError> {
    match config.hse {
        Some(freq) => {
            let (lo, hi) = caps.hse_frequency_range;
            if freq < lo || freq > hi {
                return Err(ResolutionError::NoFeasibleOscillator);
            }
            let id = if config.bypass_hse {
                NodeId::HseBypass
            } else {
                NodeId::Hse
            };
            Ok((id, freq))
        }
        None => Ok((NodeId::Hsi, caps.hsi_frequency)),
    }
}

fn collect_candidates(
    config: &Config,
    caps: &CapabilityTable,
    osc_id: NodeId,
    osc_freq: u32,
    out: &mut heapless::Vec<SysCandidate, MAX_CANDIDATES>,
) {
    let accepts = |sys: u32| {
        sys <= caps.sys_max && config.sys.satisfies(sys, true)
    };

    if !config.force_use_pll && accepts(osc_freq) {
        let _ = out.push(SysCandidate {
            source: osc_id,
            sys: osc_freq,
            pll: None,
        });
    }

    if !config.force_skip_pll {
        for_each_pll_choice(caps, osc_id, osc_freq, &mut |choice| {
            if accepts(choice.output) {
                let _ = out.push(SysCandidate {
                    source: NodeId::Pll,
                    sys: choice.output,
                    pll: Some(choice),
                });
            }
        });
    }

    // Highest system clock first; smallest prescaler, then smallest
    // multiplier among equals, for a deterministic order.
    out.sort_unstable_by(|a, b| {
        b.sys.cmp(&a.sys).then_with(|| {
            let key = |c: &SysCandidate| match c.pll {
                Some(p) => (p.prescaler, p.multiplier),
                None => (0, 0),
            };
            key(a).cmp(&key(b))
        })
    });
}

/// Visit every legal (input prescaler, multiplier) product for this
/// oscillator, restricted to exact input division and the PLL output window.
fn for_each_pll_choice(
    caps: &CapabilityTable,
    osc_id: NodeId,
    osc_freq: u32,
    f: &mut dyn FnMut(PllChoice),
) {
    let (out_lo, out_hi) = caps.pll_output_range;
    let mut emit = |prescaler: u32, prescaler_code: u32| {
        if osc_freq % prescaler != 0 {
            return;
        }
        let input = osc_freq / prescaler;
        for &multiplier in caps.legal_pll_multipliers() {
            if let Some(output) = input.checked_mul(multiplier) {
                if output >= out_lo && output <= out_hi {
                    f(PllChoice {
                        prescaler,
                        prescaler_code,
                        multiplier,
                        output,
                    });
                }
            }
        }
    };

    if osc_id == NodeId::Hsi {
        emit(caps.pll_hsi_prescaler, 0);
    } else {
        for entry in caps.pll_hse_prescalers {
            emit(entry.divisor, entry.code);
        }
    }
}

/// Try to satisfy every domain at one system clock candidate. Returns the
/// failing domain on the first constraint that cannot be met.
fn try_candidate(
    config: &Config,
    caps: &CapabilityTable,
    osc_id: NodeId,
    osc_freq: u32,
    candidate: &SysCandidate,
) -> Result<ClockTree, NodeId> {
    let mut tree = ClockTree::empty();

    {
        let osc = tree.node_mut(osc_id);
        osc.used = true;
        osc.frequency = osc_freq;
    }

    let mut pll = candidate.pll;
    if pll.is_none() && config.provide_usb && !config.force_skip_pll {
        // The system clock runs straight off the oscillator but USB still
        // needs the PLL: pick the first multiplier whose output scales to
        // the exact USB frequency.
        let mut aux = None;
        for_each_pll_choice(caps, osc_id, osc_freq, &mut |choice| {
            if aux.is_none() && usb_scaling(caps, choice.output).is_some() {
                aux = Some(choice);
            }
        });
        pll = aux;
    }

    if let Some(choice) = pll {
        let node = tree.node_mut(NodeId::Pll);
        node.used = true;
        node.parent = osc_id;
        node.divider = choice.prescaler;
        node.divider_code = choice.prescaler_code;
        node.reverse_divider = choice.multiplier;
        node.frequency = choice.output;
    }

    {
        let sys = tree.node_mut(NodeId::Sys);
        sys.used = true;
        sys.parent = candidate.source;
        sys.frequency = candidate.sys;
        sys.divider_code = match candidate.source {
            NodeId::Pll => SW_PLL,
            NodeId::Hsi => SW_HSI,
            _ => SW_HSE,
        };
    }

    assign_bus(&mut tree, caps, NodeId::Ahb, &config.ahb)?;
    assign_bus(&mut tree, caps, NodeId::Apb1, &config.apb1)?;
    assign_bus(&mut tree, caps, NodeId::Apb2, &config.apb2)?;
    assign_bus(&mut tree, caps, NodeId::Adc, &config.adc)?;

    assign_timer(&mut tree, caps, NodeId::TimApb1);
    assign_timer(&mut tree, caps, NodeId::TimApb2);

    if config.provide_usb {
        let pll_out = match pll {
            Some(choice) if caps.has_usb() => choice.output,
            _ => return Err(NodeId::Usb),
        };
        let ratio =
            usb_scaling(caps, pll_out).ok_or(NodeId::Usb)?;
        let node = tree.node_mut(NodeId::Usb);
        node.used = true;
        node.divider = ratio.denominator;
        node.divider_code = ratio.code;
        node.reverse_divider = ratio.numerator;
        node.frequency = caps.usb_frequency;
    }

    if config.spi1.is_constrained() {
        assign_bus(&mut tree, caps, NodeId::Spi1, &config.spi1)?;
    }
    if config.spi2.is_constrained() {
        assign_bus(&mut tree, caps, NodeId::Spi2, &config.spi2)?;
    }

    Ok(tree)
}

/// First legal divider ascending from the smallest, i.e. the highest
/// surviving frequency that honors the domain's window and ceiling.
fn assign_bus(
    tree: &mut ClockTree,
    caps: &CapabilityTable,
    id: NodeId,
    constraint: &DomainConstraint,
) -> Result<(), NodeId> {
    let parent = tree.node(id.default_parent()).frequency;
    let ceiling = caps.max_frequency(id);

    for entry in caps.legal_dividers(id) {
        let freq = parent / entry.divisor;
        let exact = parent % entry.divisor == 0;
        if freq > ceiling || !constraint.satisfies(freq, exact) {
            continue;
        }
        let node = tree.node_mut(id);
        node.used = true;
        node.parent = id.default_parent();
        node.frequency = freq;
        node.divider = entry.divisor;
        node.divider_code = entry.code;
        node.exact = exact;
        return Ok(());
    }
    Err(id)
}

fn assign_timer(tree: &mut ClockTree, caps: &CapabilityTable, id: NodeId) {
    let apb = tree.node(id.default_parent());
    let doubled = caps.timer_doubler && apb.divider != 1;
    let (frequency, reverse) = if doubled {
        (apb.frequency * 2, 2)
    } else {
        (apb.frequency, 1)
    };
    let node = tree.node_mut(id);
    node.used = true;
    node.frequency = frequency;
    node.reverse_divider = reverse;
}

fn usb_scaling(caps: &CapabilityTable, pll_out: u32) -> Option<RatioEntry> {
    caps.usb_dividers.iter().copied().find(|ratio| {
        let scaled = pll_out as u64 * ratio.numerator as u64;
        scaled % ratio.denominator as u64 == 0
            && scaled / ratio.denominator as u64 == caps.usb_frequency as u64
    })
}

/// Number of domains whose divider setting differs between two trees.
fn divider_changes(a: &ClockTree, b: &ClockTree) -> u32 {
    let mut changes = 0;
    for id in [
        NodeId::Pll,
        NodeId::Sys,
        NodeId::Ahb,
        NodeId::Apb1,
        NodeId::Apb2,
        NodeId::Adc,
        NodeId::Usb,
        NodeId::Spi1,
        NodeId::Spi2,
    ] {
        let (na, nb) = (a.node(id), b.node(id));
        if na.used != nb.used
            || (na.used
                && (na.divider != nb.divider
                    || na.reverse_divider != nb.reverse_divider
                    || na.parent != nb.parent))
        {
            changes += 1;
        }
    }
    changes
}
