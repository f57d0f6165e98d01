//! Clock tree model
//!
//! A fixed directed acyclic graph of named clock nodes. The topology is
//! static per device; the two hardware muxes (PLL source and system clock
//! switch) record their selected parent per resolved instance. A resolved
//! [`ClockTree`] is a plain value: freely copyable, comparable and free of
//! any hardware ownership.

use crate::time::Hertz;

/// Identity of a node in the clock tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeId {
    /// Internal RC oscillator (fixed frequency)
    Hsi,
    /// External crystal oscillator
    Hse,
    /// External clock signal, XTAL driver bypassed
    HseBypass,
    /// Phase locked loop
    Pll,
    /// System clock mux output
    Sys,
    /// AHB bus (core, memory, DMA)
    Ahb,
    /// APB1 low-speed peripheral bus
    Apb1,
    /// APB2 high-speed peripheral bus
    Apb2,
    /// Kernel clock of the timers on APB1
    TimApb1,
    /// Kernel clock of the timers on APB2
    TimApb2,
    /// ADC kernel clock
    Adc,
    /// USB kernel clock
    Usb,
    /// SPI1 kernel clock (APB2)
    Spi1,
    /// SPI2 kernel clock (APB1)
    Spi2,
}

impl NodeId {
    /// Number of nodes in the tree.
    pub const COUNT: usize = 14;

    /// All nodes, in tree order (parents before children).
    pub const ALL: [NodeId; Self::COUNT] = [
        NodeId::Hsi,
        NodeId::Hse,
        NodeId::HseBypass,
        NodeId::Pll,
        NodeId::Sys,
        NodeId::Ahb,
        NodeId::Apb1,
        NodeId::Apb2,
        NodeId::TimApb1,
        NodeId::TimApb2,
        NodeId::Adc,
        NodeId::Usb,
        NodeId::Spi1,
        NodeId::Spi2,
    ];

    pub(crate) const fn index(self) -> usize {
        self as usize
    }

    /// Static default parent. Roots report themselves; the muxes (`Pll`,
    /// `Sys`) default to the internal oscillator, as from reset.
    pub const fn default_parent(self) -> NodeId {
        match self {
            NodeId::Hsi | NodeId::Hse | NodeId::HseBypass => self,
            NodeId::Pll | NodeId::Sys => NodeId::Hsi,
            NodeId::Ahb => NodeId::Sys,
            NodeId::Apb1 | NodeId::Apb2 => NodeId::Ahb,
            NodeId::TimApb1 | NodeId::Spi2 => NodeId::Apb1,
            NodeId::TimApb2 | NodeId::Adc | NodeId::Spi1 => NodeId::Apb2,
            NodeId::Usb => NodeId::Pll,
        }
    }

    /// True for the oscillator roots.
    pub const fn is_oscillator(self) -> bool {
        matches!(self, NodeId::Hsi | NodeId::Hse | NodeId::HseBypass)
    }
}

/// One node of a resolved clock tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct ClockNode {
    /// Selected by a live requirement or a chained descendant.
    pub used: bool,
    /// Exact frequency in Hz; 0 when unused.
    pub frequency: u32,
    /// Integer divisor applied to the parent frequency.
    pub divider: u32,
    /// Register-encoded divider selector.
    pub divider_code: u32,
    /// Multiplier for nodes that scale up (PLL, timer kernels, USB 2/3).
    pub reverse_divider: u32,
    /// `frequency * divider == parent * reverse_divider` holds exactly.
    pub exact: bool,
    /// Resolved parent (differs from the default only for the muxes).
    pub parent: NodeId,
}

impl ClockNode {
    const fn unused(id: NodeId) -> Self {
        ClockNode {
            used: false,
            frequency: 0,
            divider: 1,
            divider_code: 0,
            reverse_divider: 1,
            exact: true,
            parent: id.default_parent(),
        }
    }
}

/// Public per-node query result.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeInfo {
    /// Selected by a live requirement or a chained descendant
    pub used: bool,
    /// Exact frequency; 0 Hz when unused
    pub exact_frequency: Hertz,
    /// Integer divisor applied to the parent frequency
    pub divider_value: u32,
    /// Register-encoded divider selector
    pub divider_code: u32,
    /// Multiplier for nodes that scale up
    pub reverse_divider: u32,
    /// False when the divider chain does not divide evenly and the
    /// frequency is the floor of the exact ratio
    pub exact: bool,
}

/// A fully resolved clock tree instance.
///
/// Produced by the resolver, consumed by the planner. Carries no hardware
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockTree {
    nodes: [ClockNode; NodeId::COUNT],
}

/// Getters for always-on bus clocks
macro_rules! ck_getter {
    ($($(#[$meta:meta])* $name:ident: $node:ident,)+) => {
        $(
            $(#[$meta])*
            pub fn $name(&self) -> Hertz {
                Hertz::from_raw(self.node(NodeId::$node).frequency)
            }
        )+
    };
}

/// Getters for clocks that only run when selected
macro_rules! optional_ck_getter {
    ($($(#[$meta:meta])* $name:ident: $node:ident,)+) => {
        $(
            $(#[$meta])*
            pub fn $name(&self) -> Option<Hertz> {
                let node = self.node(NodeId::$node);
                node.used.then(|| Hertz::from_raw(node.frequency))
            }
        )+
    };
}

impl ClockTree {
    /// An entirely unused tree with the default topology.
    pub(crate) const fn empty() -> Self {
        let mut nodes = [ClockNode::unused(NodeId::Hsi); NodeId::COUNT];
        let mut i = 0;
        while i < NodeId::COUNT {
            nodes[i] = ClockNode::unused(NodeId::ALL[i]);
            i += 1;
        }
        ClockTree { nodes }
    }

    /// The tree as hardware presents it after reset: system clock on the
    /// internal oscillator, every prescaler at its reset value.
    pub fn reset_state(hsi_frequency: u32) -> Self {
        let mut tree = Self::empty();
        for id in [NodeId::Hsi, NodeId::Sys, NodeId::Ahb, NodeId::Apb1,
                   NodeId::Apb2, NodeId::TimApb1, NodeId::TimApb2]
        {
            let node = tree.node_mut(id);
            node.used = true;
            node.frequency = hsi_frequency;
        }
        // ADCPRE resets to /2 but nothing consumes it yet
        tree.node_mut(NodeId::Adc).divider = 2;
        tree
    }

    pub(crate) fn node(&self, id: NodeId) -> &ClockNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut ClockNode {
        &mut self.nodes[id.index()]
    }

    /// Full configuration of one node.
    pub fn get_config_by_id(&self, id: NodeId) -> NodeInfo {
        let node = self.node(id);
        NodeInfo {
            used: node.used,
            exact_frequency: Hertz::from_raw(node.frequency),
            divider_value: node.divider,
            divider_code: node.divider_code,
            reverse_divider: node.reverse_divider,
            exact: node.exact,
        }
    }

    /// Resolved parent of a node. Oscillator roots report themselves.
    pub fn get_node_parent(&self, id: NodeId) -> NodeId {
        self.node(id).parent
    }

    ck_getter! {
        /// System clock frequency
        sys_ck: Sys,
        /// AHB (core) clock frequency
        hclk: Ahb,
        /// APB1 peripheral clock frequency
        pclk1: Apb1,
        /// APB2 peripheral clock frequency
        pclk2: Apb2,
        /// Kernel clock of timers on APB1
        timx_ker_ck: TimApb1,
        /// Kernel clock of timers on APB2
        timy_ker_ck: TimApb2,
    }

    optional_ck_getter! {
        /// Internal oscillator, if running
        hsi_ck: Hsi,
        /// PLL output, if running
        pll_ck: Pll,
        /// ADC kernel clock, if resolved
        adc_ck: Adc,
        /// USB kernel clock, if provided
        usb_ck: Usb,
        /// SPI1 kernel clock, if constrained
        spi1_ck: Spi1,
        /// SPI2 kernel clock, if constrained
        spi2_ck: Spi2,
    }

    /// External oscillator frequency, if one is running (crystal or bypass).
    pub fn hse_ck(&self) -> Option<Hertz> {
        for id in [NodeId::Hse, NodeId::HseBypass] {
            let node = self.node(id);
            if node.used {
                return Some(Hertz::from_raw(node.frequency));
            }
        }
        None
    }

    /// The oscillator or PLL the system clock mux selects.
    pub fn sys_source(&self) -> NodeId {
        self.node(NodeId::Sys).parent
    }

    /// The oscillator feeding the PLL (meaningful when the PLL is used).
    pub fn pll_source(&self) -> NodeId {
        self.node(NodeId::Pll).parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_match_tree_order() {
        for (i, id) in NodeId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn parents_precede_children() {
        // Guarantees a single forward pass can compute all frequencies
        for id in NodeId::ALL {
            assert!(id.default_parent().index() <= id.index());
        }
    }

    #[test]
    fn reset_state_runs_from_hsi() {
        let tree = ClockTree::reset_state(8_000_000);
        assert_eq!(tree.sys_source(), NodeId::Hsi);
        assert_eq!(tree.sys_ck().raw(), 8_000_000);
        assert_eq!(tree.hclk().raw(), 8_000_000);
        assert_eq!(tree.pclk1().raw(), 8_000_000);
        assert_eq!(tree.usb_ck(), None);
        assert_eq!(tree.adc_ck(), None);
        assert_eq!(tree.hse_ck(), None);
    }

    #[test]
    fn unused_nodes_carry_zero() {
        let tree = ClockTree::empty();
        for id in NodeId::ALL {
            let info = tree.get_config_by_id(id);
            assert!(!info.used);
            assert_eq!(info.exact_frequency.raw(), 0);
        }
    }
}
