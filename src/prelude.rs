//! Prelude

pub use crate::rcc::executor::ClockRegisters as _stm32f1xx_rcc_ClockRegisters;
pub use crate::rcc::executor::InterruptControl as _stm32f1xx_rcc_InterruptControl;

pub use crate::rcc::{Config, NodeId};

pub use fugit::RateExtU32 as _;
