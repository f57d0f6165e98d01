//! Reset and Clock Control
//!
//! This module resolves a declarative set of frequency constraints into a
//! fully populated clock tree for an STM32F1 class device, and plans the
//! ordered sequence of register operations that takes the hardware from its
//! current state (or from an unknown state) to that tree without ever
//! passing through an illegal intermediate configuration.
//!
//! See Figure 8 "Clock tree" in Reference Manual RM0008 for the hardware
//! this models (p 93).
//!
//! # Usage
//!
//! A builder pattern is used to specify the constraints on the clock tree.
//! The [`Config::resolve`] method searches the configuration space against
//! a [device capability table](capability) in a best-effort attempt to
//! maximize the resulting frequencies. The exact clocks chosen are returned
//! in the resolved [`ClockTree`].
//!
//! No constraint overrides another: contradictory constraints are reported
//! as [`ResolutionError::ConflictingConstraints`] rather than silently
//! relaxed, and a constraint set that no legal configuration satisfies is a
//! typed error, never an out-of-spec clock.
//!
//! ```rust
//! use stm32f1xx_rcc::prelude::*;
//! use stm32f1xx_rcc::rcc::{self, capability::STM32F103};
//!
//! # fn main() -> Result<(), rcc::ResolutionError> {
//! let target = rcc::Config::new()
//!     .use_hse(16.MHz())
//!     .sys_ck(72.MHz())
//!     .pclk1_max(36.MHz())
//!     .provide_usb()
//!     .resolve(&STM32F103)?;
//!
//! assert_eq!(target.sys_ck().raw(), 72_000_000);
//! assert_eq!(target.usb_ck().unwrap().raw(), 48_000_000);
//! # Ok(())
//! # }
//! ```
//!
//! The resolved tree is a plain value. Handing it to [`plan`] together with
//! the currently active tree (or `None` when the hardware state is unknown)
//! yields an ordered operation list for the [`executor`]:
//!
//! ```rust,ignore
//!     let plan = rcc::plan(None, &target, &STM32F103)?;
//!     rcc::executor::apply(&plan, &mut regs)?;
//! ```
//!
//! `regs` is any implementation of [`ClockRegisters`], the collaborator
//! that owns the actual memory-mapped register access. The resolver and
//! planner are pure functions and may run ahead of time, at boot, or
//! repeatedly at run time; only [`executor::apply`] touches hardware.
#![deny(missing_docs)]

use crate::time::Hertz;

pub mod capability;
pub mod executor;
mod field;
mod planner;
pub mod rec;
mod resolver;
mod tree;

pub use executor::{
    ClockInterrupt, ClockRegisters, ExecutionError, InterruptControl,
};
pub use field::{FieldId, Register};
pub use planner::{plan, Operation, Plan, PlanningError};
pub use resolver::ResolutionError;
pub use tree::{ClockTree, NodeId, NodeInfo};

use capability::CapabilityTable;

/// One domain's frequency window: an exact requirement, a lower bound and
/// an upper bound, all optional.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DomainConstraint {
    pub required: Option<u32>,
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl DomainConstraint {
    /// Whether a candidate frequency honors this window. An exact
    /// requirement additionally insists on a remainder-free divider chain.
    pub fn satisfies(&self, freq: u32, exact: bool) -> bool {
        if let Some(required) = self.required {
            if !exact || freq != required {
                return false;
            }
        }
        if let Some(min) = self.min {
            if freq < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if freq > max {
                return false;
            }
        }
        true
    }

    pub fn is_constrained(&self) -> bool {
        self.required.is_some() || self.min.is_some() || self.max.is_some()
    }

    fn coherent(&self) -> bool {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return false;
            }
        }
        if let Some(required) = self.required {
            if self.min.is_some_and(|min| required < min)
                || self.max.is_some_and(|max| required > max)
            {
                return false;
            }
        }
        true
    }
}

/// Record a requirement, flagging the set as contradictory when the same
/// requirement is recorded twice with different values.
fn merge(slot: &mut Option<u32>, value: u32, conflict: &mut bool) {
    match *slot {
        Some(existing) if existing != value => *conflict = true,
        _ => *slot = Some(value),
    }
}

/// Constraint set for the clock tree resolver.
///
/// Created per configuration request, consumed by [`Config::resolve`]. Owns
/// no hardware state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    pub(crate) hse: Option<u32>,
    pub(crate) bypass_hse: bool,
    pub(crate) force_use_pll: bool,
    pub(crate) force_skip_pll: bool,
    pub(crate) provide_usb: bool,
    pub(crate) base: Option<ClockTree>,
    pub(crate) sys: DomainConstraint,
    pub(crate) ahb: DomainConstraint,
    pub(crate) apb1: DomainConstraint,
    pub(crate) apb2: DomainConstraint,
    pub(crate) adc: DomainConstraint,
    pub(crate) spi1: DomainConstraint,
    pub(crate) spi2: DomainConstraint,
    conflict: bool,
}

/// Setter definition for the per-domain frequency windows
macro_rules! domain_setters {
    ($($field:ident => $setter:ident: $doc:literal,)+) => {
        paste::item! {
            $(
                #[doc = concat!("Require ", $doc, " to run at exactly this frequency.")]
                #[must_use]
                pub fn $setter(mut self, freq: Hertz) -> Self {
                    merge(&mut self.$field.required, freq.raw(), &mut self.conflict);
                    self
                }

                #[doc = concat!("Lowest acceptable frequency for ", $doc, ".")]
                #[must_use]
                pub fn [<$setter _min>](mut self, freq: Hertz) -> Self {
                    merge(&mut self.$field.min, freq.raw(), &mut self.conflict);
                    self
                }

                #[doc = concat!("Highest acceptable frequency for ", $doc, ".")]
                #[must_use]
                pub fn [<$setter _max>](mut self, freq: Hertz) -> Self {
                    merge(&mut self.$field.max, freq.raw(), &mut self.conflict);
                    self
                }
            )+
        }
    };
}

impl Config {
    /// An empty constraint set: internal oscillator, every domain free to
    /// run as fast as its ceiling allows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the external crystal oscillator at the given frequency instead
    /// of the internal RC oscillator.
    #[must_use]
    pub fn use_hse(mut self, freq: Hertz) -> Self {
        merge(&mut self.hse, freq.raw(), &mut self.conflict);
        self
    }

    /// Use an external clock signal rather than a crystal oscillator,
    /// bypassing the XTAL driver. Only meaningful together with
    /// [`use_hse`](Config::use_hse).
    #[must_use]
    pub fn bypass_hse(mut self) -> Self {
        self.bypass_hse = true;
        self
    }

    /// Derive the system clock through the PLL even when an oscillator
    /// could feed it directly.
    #[must_use]
    pub fn force_use_pll(mut self) -> Self {
        self.force_use_pll = true;
        self
    }

    /// Never start the PLL; the system clock comes straight from the
    /// selected oscillator.
    #[must_use]
    pub fn force_skip_pll(mut self) -> Self {
        self.force_skip_pll = true;
        self
    }

    /// Provide a USB kernel clock. The resolver then only accepts PLL
    /// settings whose output scales exactly to the USB frequency.
    #[must_use]
    pub fn provide_usb(mut self) -> Self {
        self.provide_usb = true;
        self
    }

    /// Declare that the given configuration is currently present on the
    /// hardware (already initialized, not fresh from reset). Among
    /// otherwise equally good resolutions the one changing the fewest
    /// dividers relative to this snapshot is preferred.
    #[must_use]
    pub fn base_configuration(mut self, current: &ClockTree) -> Self {
        self.base = Some(*current);
        self
    }

    domain_setters! {
        sys => sys_ck: "the system clock",
        ahb => hclk: "the AHB (core) clock",
        apb1 => pclk1: "the APB1 peripheral clock",
        apb2 => pclk2: "the APB2 peripheral clock",
        adc => adc_ck: "the ADC kernel clock",
        spi1 => spi1_ck: "the SPI1 kernel clock",
        spi2 => spi2_ck: "the SPI2 kernel clock",
    }

    /// Require the system clock to run at exactly this frequency - ALIAS
    #[must_use]
    pub fn sysclk(self, freq: Hertz) -> Self {
        self.sys_ck(freq)
    }

    /// Resolve this constraint set against a device capability table.
    pub fn resolve(
        &self,
        caps: &CapabilityTable,
    ) -> Result<ClockTree, ResolutionError> {
        resolver::resolve(self, caps)
    }

    pub(crate) fn check_conflicts(&self) -> Result<(), ResolutionError> {
        let windows = [
            &self.sys,
            &self.ahb,
            &self.apb1,
            &self.apb2,
            &self.adc,
            &self.spi1,
            &self.spi2,
        ];
        if self.conflict
            || windows.iter().any(|w| !w.coherent())
            || (self.force_use_pll && self.force_skip_pll)
            || (self.bypass_hse && self.hse.is_none())
        {
            return Err(ResolutionError::ConflictingConstraints);
        }
        Ok(())
    }
}
