//! Clock tree resolver and safe clock transition planner for STM32F1
//! series microcontrollers.
//!
//! The crate is split along the data flow: a [`rcc::Config`] constraint set
//! goes into the resolver, which produces a [`rcc::ClockTree`]; the tree
//! goes into the [planner](rcc::plan) together with the current hardware
//! state (or `None` for an unknown state), which produces an ordered
//! operation list; the [executor](rcc::executor) replays that list through
//! the register access collaborator.
//!
//! Resolution and planning are pure functions over explicit state and can
//! run ahead of time, once at boot, or repeatedly at run time. Nothing here
//! dereferences memory: the hardware register layout is owned by the
//! [`rcc::ClockRegisters`] implementation supplied by the board or HAL
//! layer. Device variants are selected by choosing a
//! [capability table](rcc::capability), not a different code path.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod prelude;
pub mod rcc;
pub mod time;
