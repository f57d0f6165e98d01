//! Plan executor
//!
//! Thin layer that replays a [`Plan`] against the register access
//! collaborator. This is the only part of the crate that touches hardware
//! state, and the only part that can block: readiness waits poll a field
//! until it reads the expected value.
//!
//! The executor is intended to run on the boot thread, or with interrupts
//! masked for the critical switch window
//! ([`apply_with_masked_interrupts`]), because the clock mux and PLL are
//! global, non-reentrant resources.
//!
//! A wait that exhausts its spin bound reports
//! [`ExecutionError::HardwareTimeout`] naming the field, distinct from any
//! logic error, so a caller can fall back to a documented recovery clock
//! path. A stuck unbounded wait is treated as a fatal hardware condition
//! and simply never returns.

use super::field::FieldId;
use super::planner::{Operation, Plan};

/// Register access collaborator.
///
/// Owns the actual memory-mapped register layout; the core only names
/// fields. Values are field-relative: implementations shift by
/// [`FieldId::offset`] and mask with [`FieldId::mask`].
pub trait ClockRegisters {
    /// Read the field's current value.
    fn read_field(&mut self, field: FieldId) -> u32;

    /// Program the field, leaving the other bits of its register
    /// untouched.
    fn write_field(&mut self, field: FieldId, value: u32);

    /// Read-modify-write a subset of the field's bits. `mask` and `value`
    /// are field-relative.
    fn read_modify_write(&mut self, field: FieldId, mask: u32, value: u32) {
        let current = self.read_field(field);
        self.write_field(field, (current & !mask) | (value & mask));
    }
}

/// Interrupt controller collaborator, used only for the optional
/// clock-ready interrupt path. The default path polls.
pub trait InterruptControl {
    /// Enable the interrupt line at the given priority.
    fn enable(&mut self, interrupt: ClockInterrupt, priority: u8);

    /// Disable the interrupt line.
    fn disable(&mut self, interrupt: ClockInterrupt);
}

/// Clock readiness interrupts the hardware can raise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockInterrupt {
    /// Internal oscillator became ready
    HsiReady,
    /// External oscillator became ready
    HseReady,
    /// PLL locked
    PllReady,
}

impl ClockInterrupt {
    /// The hardware enable field of this interrupt.
    pub const fn enable_field(self) -> FieldId {
        match self {
            ClockInterrupt::HsiReady => FieldId::HsiReadyInterruptEnable,
            ClockInterrupt::HseReady => FieldId::HseReadyInterruptEnable,
            ClockInterrupt::PllReady => FieldId::PllReadyInterruptEnable,
        }
    }
}

/// Hardware-level execution failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExecutionError {
    /// A readiness wait exhausted its spin bound. Fatal for a boot-time
    /// clock switch; recoverable only through a caller-provided fallback
    /// clock path.
    HardwareTimeout {
        /// The field that never became ready
        field: FieldId,
    },
}

/// Replay a plan against the hardware.
pub fn apply(
    plan: &Plan,
    regs: &mut impl ClockRegisters,
) -> Result<(), ExecutionError> {
    for op in plan {
        match *op {
            Operation::Write { field, value } => {
                regs.write_field(field, value);
            }
            Operation::WaitReady { field, value, max_spins } => {
                match max_spins {
                    None => while regs.read_field(field) != value {},
                    Some(bound) => {
                        let mut spins = 0;
                        while regs.read_field(field) != value {
                            spins += 1;
                            if spins >= bound {
                                return Err(ExecutionError::HardwareTimeout {
                                    field,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Replay a plan with interrupts globally masked, so no handler can
/// observe or disturb an intermediate clock state.
pub fn apply_with_masked_interrupts(
    plan: &Plan,
    regs: &mut impl ClockRegisters,
) -> Result<(), ExecutionError> {
    cortex_m::interrupt::free(|_| apply(plan, regs))
}

/// Arm a clock-ready interrupt: enable it in the clock unit, then at the
/// interrupt controller.
pub fn listen_ready(
    regs: &mut impl ClockRegisters,
    intc: &mut impl InterruptControl,
    interrupt: ClockInterrupt,
    priority: u8,
) {
    regs.write_field(interrupt.enable_field(), 1);
    intc.enable(interrupt, priority);
}

/// Disarm a clock-ready interrupt, controller first.
pub fn unlisten_ready(
    regs: &mut impl ClockRegisters,
    intc: &mut impl InterruptControl,
    interrupt: ClockInterrupt,
) {
    intc.disable(interrupt);
    regs.write_field(interrupt.enable_field(), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockRegisters {
        writes: Vec<(FieldId, u32)>,
        /// Fields that read 1; everything else reads 0
        high: Vec<FieldId>,
        /// Reads before a `high` field actually reports 1
        ready_delay: u32,
        reads: u32,
    }

    impl ClockRegisters for MockRegisters {
        fn read_field(&mut self, field: FieldId) -> u32 {
            self.reads += 1;
            let high = self.high.contains(&field);
            (high && self.reads > self.ready_delay) as u32
        }

        fn write_field(&mut self, field: FieldId, value: u32) {
            self.writes.push((field, value));
        }
    }

    fn plan_of(ops: &[Operation]) -> Plan {
        let mut plan = Plan::new();
        for op in ops {
            plan.push(*op).unwrap();
        }
        plan
    }

    #[test]
    fn writes_are_applied_in_plan_order() {
        let plan = plan_of(&[
            Operation::Write { field: FieldId::HseOn, value: 1 },
            Operation::WaitReady {
                field: FieldId::HseReady,
                value: 1,
                max_spins: Some(8),
            },
            Operation::Write { field: FieldId::FlashLatency, value: 2 },
        ]);
        let mut regs = MockRegisters {
            high: vec![FieldId::HseReady],
            ..Default::default()
        };
        apply(&plan, &mut regs).unwrap();
        assert_eq!(
            regs.writes,
            vec![(FieldId::HseOn, 1), (FieldId::FlashLatency, 2)]
        );
    }

    #[test]
    fn bounded_wait_surfaces_a_timeout_naming_the_field() {
        let plan = plan_of(&[
            Operation::Write { field: FieldId::HseOn, value: 1 },
            Operation::WaitReady {
                field: FieldId::HseReady,
                value: 1,
                max_spins: Some(16),
            },
            // Must never be reached
            Operation::Write { field: FieldId::SysClockSwitch, value: 1 },
        ]);
        let mut regs = MockRegisters::default(); // HseReady stays low
        assert_eq!(
            apply(&plan, &mut regs),
            Err(ExecutionError::HardwareTimeout {
                field: FieldId::HseReady
            })
        );
        assert_eq!(regs.writes, vec![(FieldId::HseOn, 1)]);
        // Spun exactly as far as the bound allows
        assert_eq!(regs.reads, 16);
    }

    #[test]
    fn waits_poll_until_the_flag_comes_up() {
        let plan = plan_of(&[Operation::WaitReady {
            field: FieldId::PllReady,
            value: 1,
            max_spins: Some(64),
        }]);
        let mut regs = MockRegisters {
            high: vec![FieldId::PllReady],
            ready_delay: 10,
            ..Default::default()
        };
        apply(&plan, &mut regs).unwrap();
        assert_eq!(regs.reads, 11);
    }

    #[test]
    fn default_read_modify_write_touches_only_the_masked_bits() {
        struct OneField {
            value: u32,
        }
        impl ClockRegisters for OneField {
            fn read_field(&mut self, _field: FieldId) -> u32 {
                self.value
            }
            fn write_field(&mut self, _field: FieldId, value: u32) {
                self.value = value;
            }
        }
        let mut regs = OneField { value: 0b1010 };
        regs.read_modify_write(FieldId::Apb1Enable, 0b0110, 0b0010);
        assert_eq!(regs.value, 0b1010);
        regs.read_modify_write(FieldId::Apb1Enable, 0b0001, 0b1111);
        assert_eq!(regs.value, 0b1011);
    }

    #[test]
    fn ready_interrupts_arm_the_clock_unit_and_the_controller() {
        #[derive(Default)]
        struct MockIntc {
            calls: Vec<(ClockInterrupt, Option<u8>)>,
        }
        impl InterruptControl for MockIntc {
            fn enable(&mut self, interrupt: ClockInterrupt, priority: u8) {
                self.calls.push((interrupt, Some(priority)));
            }
            fn disable(&mut self, interrupt: ClockInterrupt) {
                self.calls.push((interrupt, None));
            }
        }

        let mut regs = MockRegisters::default();
        let mut intc = MockIntc::default();
        listen_ready(&mut regs, &mut intc, ClockInterrupt::HseReady, 3);
        unlisten_ready(&mut regs, &mut intc, ClockInterrupt::HseReady);

        assert_eq!(
            regs.writes,
            vec![
                (FieldId::HseReadyInterruptEnable, 1),
                (FieldId::HseReadyInterruptEnable, 0),
            ]
        );
        assert_eq!(
            intc.calls,
            vec![
                (ClockInterrupt::HseReady, Some(3)),
                (ClockInterrupt::HseReady, None),
            ]
        );
    }
}
