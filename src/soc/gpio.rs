//! GPIO banks and the board-level pin net.
//!
//! A [`GpioBank`] is one 16-pin MMIO bank with direction, polarity and
//! edge/level interrupt configuration. Anything with pins (banks, I²C GPIO
//! expanders, the accelerometer's interrupt outputs, logic gates) is a
//! [`GpioPeripheral`] node in the [`GpioNet`] arena, and pin-to-pin wires
//! are entries in the net's central wire list. Nodes address each other by
//! [`NodeId`] only; propagation is a work-queue walk that pulls each changed
//! output level and pushes it into the wired peers.

use std::collections::VecDeque;

use tracing::warn;

use super::regs::{Access, FieldId, RegisterFile, RegisterOps};
use super::twi::I2cSlave;
use crate::peripheral::adxl345::Adxl345;
use crate::peripheral::mcp230xx::Mcp230xx;

/// Arena index of a peripheral in the net.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn from_bool(high: bool) -> Self {
        if high {
            PinLevel::High
        } else {
            PinLevel::Low
        }
    }

    pub fn is_high(self) -> bool {
        self == PinLevel::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

/// Uniform pin interface every wired peripheral implements.
pub trait GpioPeripheral {
    fn pin_count(&self) -> usize;
    fn direction(&self, pin: usize) -> PinDirection;

    /// Level currently presented on `pin`. Output pins report their driven
    /// level; input pins report their active-state bit.
    fn output_level(&self, pin: usize) -> PinLevel;

    /// Present `level` on input `pin`. Returns false if the pin is not an
    /// enabled input.
    fn set_input(&mut self, pin: usize, level: PinLevel) -> bool;

    /// Drain the bitmask of output pins whose level changed since the last
    /// drain. Implementations must only mark pins on a real change, so that
    /// wire propagation over cyclic nets converges.
    fn take_output_changes(&mut self) -> u32;
}

mod fid {
    pub const DATA: u16 = 0;
    pub const CLEAR: u16 = 1;
    pub const SET: u16 = 2;
    pub const TOGGLE: u16 = 3;
    pub const MASKA: u16 = 4;
    pub const MASKA_CLEAR: u16 = 5;
    pub const MASKA_SET: u16 = 6;
    pub const MASKA_TOGGLE: u16 = 7;
    pub const MASKB: u16 = 8;
    pub const MASKB_CLEAR: u16 = 9;
    pub const MASKB_SET: u16 = 10;
    pub const MASKB_TOGGLE: u16 = 11;
    pub const DIR: u16 = 12;
    pub const POLAR: u16 = 13;
    pub const EDGE: u16 = 14;
    pub const BOTH: u16 = 15;
    pub const INEN: u16 = 16;
}

const BANK_PINS: usize = 16;

#[derive(Debug, Default)]
struct BankState {
    data: u16,
    mask_a: u16,
    mask_b: u16,
    /// 1 = output.
    dir: u16,
    /// 1 = active low.
    polar: u16,
    /// 1 = edge triggered.
    edge: u16,
    both: u16,
    inen: u16,
    /// Pending-interrupt bitmap.
    pending: u16,
    dirty_out: u32,
}

impl BankState {
    fn set_data(&mut self, new: u16) {
        let flipped = self.data ^ new;
        self.data = new;
        self.dirty_out |= flipped as u32;
    }
}

impl RegisterOps for BankState {
    fn field_read(&mut self, field: FieldId) -> u32 {
        match field {
            fid::DATA | fid::CLEAR | fid::SET | fid::TOGGLE => self.data as u32,
            fid::MASKA | fid::MASKA_CLEAR | fid::MASKA_SET | fid::MASKA_TOGGLE => {
                self.mask_a as u32
            }
            fid::MASKB | fid::MASKB_CLEAR | fid::MASKB_SET | fid::MASKB_TOGGLE => {
                self.mask_b as u32
            }
            fid::DIR => self.dir as u32,
            fid::POLAR => self.polar as u32,
            fid::EDGE => self.edge as u32,
            fid::BOTH => self.both as u32,
            fid::INEN => self.inen as u32,
            _ => 0,
        }
    }

    fn field_write(&mut self, field: FieldId, value: u32) {
        let v = value as u16;
        match field {
            fid::DATA => self.set_data(v),
            fid::CLEAR => {
                self.set_data(self.data & !v);
                // W1 also clears latched edge interrupts for those bits.
                self.pending &= !(v & self.edge);
            }
            fid::SET => self.set_data(self.data | v),
            fid::TOGGLE => self.set_data(self.data ^ v),
            fid::MASKA => self.mask_a = v,
            fid::MASKA_CLEAR => self.mask_a &= !v,
            fid::MASKA_SET => self.mask_a |= v,
            fid::MASKA_TOGGLE => self.mask_a ^= v,
            fid::MASKB => self.mask_b = v,
            fid::MASKB_CLEAR => self.mask_b &= !v,
            fid::MASKB_SET => self.mask_b |= v,
            fid::MASKB_TOGGLE => self.mask_b ^= v,
            fid::DIR => {
                self.dir = v;
                self.dirty_out = 0xFFFF;
            }
            fid::POLAR => {
                self.polar = v;
                self.dirty_out = 0xFFFF;
            }
            fid::EDGE => self.edge = v,
            fid::BOTH => self.both = v,
            fid::INEN => self.inen = v,
            _ => {}
        }
    }
}

/// One 16-pin GPIO port (F, G or H on the simulated part).
pub struct GpioBank {
    pub name: &'static str,
    rf: RegisterFile,
    s: BankState,
}

impl GpioBank {
    pub const MMIO_SIZE: u32 = 0x44;

    pub fn new(name: &'static str) -> Self {
        let mut rf = RegisterFile::new();
        rf.register(0x00, "GPIO_DATA").field(0, 16, Access::ReadWrite(fid::DATA));
        rf.register(0x04, "GPIO_CLEAR").field(0, 16, Access::ReadWrite(fid::CLEAR));
        rf.register(0x08, "GPIO_SET").field(0, 16, Access::ReadWrite(fid::SET));
        rf.register(0x0C, "GPIO_TOGGLE").field(0, 16, Access::ReadWrite(fid::TOGGLE));
        rf.register(0x10, "GPIO_MASKA").field(0, 16, Access::ReadWrite(fid::MASKA));
        rf.register(0x14, "GPIO_MASKA_CLEAR")
            .field(0, 16, Access::ReadWrite(fid::MASKA_CLEAR));
        rf.register(0x18, "GPIO_MASKA_SET").field(0, 16, Access::ReadWrite(fid::MASKA_SET));
        rf.register(0x1C, "GPIO_MASKA_TOGGLE")
            .field(0, 16, Access::ReadWrite(fid::MASKA_TOGGLE));
        rf.register(0x20, "GPIO_MASKB").field(0, 16, Access::ReadWrite(fid::MASKB));
        rf.register(0x24, "GPIO_MASKB_CLEAR")
            .field(0, 16, Access::ReadWrite(fid::MASKB_CLEAR));
        rf.register(0x28, "GPIO_MASKB_SET").field(0, 16, Access::ReadWrite(fid::MASKB_SET));
        rf.register(0x2C, "GPIO_MASKB_TOGGLE")
            .field(0, 16, Access::ReadWrite(fid::MASKB_TOGGLE));
        rf.register(0x30, "GPIO_DIR").field(0, 16, Access::ReadWrite(fid::DIR));
        rf.register(0x34, "GPIO_POLAR").field(0, 16, Access::ReadWrite(fid::POLAR));
        rf.register(0x38, "GPIO_EDGE").field(0, 16, Access::ReadWrite(fid::EDGE));
        rf.register(0x3C, "GPIO_BOTH").field(0, 16, Access::ReadWrite(fid::BOTH));
        rf.register(0x40, "GPIO_INEN").field(0, 16, Access::ReadWrite(fid::INEN));
        Self { name, rf, s: BankState::default() }
    }

    pub fn read32(&mut self, offset: u32) -> u32 {
        self.rf.read32(&mut self.s, offset)
    }

    pub fn write32(&mut self, offset: u32, value: u32) {
        self.rf.write32(&mut self.s, offset, value);
    }

    /// `(irq A, irq B)` request levels: pending gated by the two masks.
    pub fn irq_levels(&self) -> (bool, bool) {
        (self.s.pending & self.s.mask_a != 0, self.s.pending & self.s.mask_b != 0)
    }
}

impl GpioPeripheral for GpioBank {
    fn pin_count(&self) -> usize {
        BANK_PINS
    }

    fn direction(&self, pin: usize) -> PinDirection {
        if pin < BANK_PINS && self.s.dir & (1 << pin) != 0 {
            PinDirection::Output
        } else {
            PinDirection::Input
        }
    }

    fn output_level(&self, pin: usize) -> PinLevel {
        if pin >= BANK_PINS {
            return PinLevel::Low;
        }
        let bit = 1u16 << pin;
        let data = self.s.data & bit != 0;
        match self.direction(pin) {
            // Driven level is DATA xor POLAR.
            PinDirection::Output => PinLevel::from_bool(data ^ (self.s.polar & bit != 0)),
            // Input pins present their active-state bit.
            PinDirection::Input => PinLevel::from_bool(data),
        }
    }

    fn set_input(&mut self, pin: usize, level: PinLevel) -> bool {
        if pin >= BANK_PINS {
            return false;
        }
        let bit = 1u16 << pin;
        if self.s.dir & bit != 0 || self.s.inen & bit == 0 {
            return false;
        }
        let was_active = self.s.data & bit != 0;
        let active = level.is_high() ^ (self.s.polar & bit != 0);
        if active {
            self.s.data |= bit;
        } else {
            self.s.data &= !bit;
        }
        if self.s.edge & bit != 0 {
            let qualifies = if self.s.both & bit != 0 {
                active != was_active
            } else {
                // Single-edge mode latches on the activation edge: rising
                // for active-high pins, falling for active-low ones.
                active && !was_active
            };
            if qualifies {
                self.s.pending |= bit;
            }
        } else if active {
            self.s.pending |= bit;
        } else {
            self.s.pending &= !bit;
        }
        true
    }

    fn take_output_changes(&mut self) -> u32 {
        std::mem::take(&mut self.s.dirty_out)
    }
}

/// Two-input OR gate used to join expander interrupt nets onto a bank pin.
pub struct OrGate {
    inputs: [PinLevel; 2],
    active_low: bool,
    dirty_out: u32,
}

impl OrGate {
    pub const OUTPUT_PIN: usize = 2;

    pub fn new(active_low: bool) -> Self {
        Self { inputs: [PinLevel::Low; 2], active_low, dirty_out: 0 }
    }
}

impl GpioPeripheral for OrGate {
    fn pin_count(&self) -> usize {
        3
    }

    fn direction(&self, pin: usize) -> PinDirection {
        if pin == Self::OUTPUT_PIN {
            PinDirection::Output
        } else {
            PinDirection::Input
        }
    }

    fn output_level(&self, pin: usize) -> PinLevel {
        if pin != Self::OUTPUT_PIN {
            return self.inputs.get(pin).copied().unwrap_or(PinLevel::Low);
        }
        let any = self.inputs.iter().any(|l| l.is_high());
        PinLevel::from_bool(any ^ self.active_low)
    }

    fn set_input(&mut self, pin: usize, level: PinLevel) -> bool {
        if pin >= 2 {
            return false;
        }
        if self.inputs[pin] != level {
            let before = self.output_level(Self::OUTPUT_PIN);
            self.inputs[pin] = level;
            if self.output_level(Self::OUTPUT_PIN) != before {
                self.dirty_out |= 1 << Self::OUTPUT_PIN;
            }
        }
        true
    }

    fn take_output_changes(&mut self) -> u32 {
        std::mem::take(&mut self.dirty_out)
    }
}

/// A peripheral with pins, as stored in the net arena.
pub enum GpioNode {
    Bank(GpioBank),
    Expander(Mcp230xx),
    Accel(Adxl345),
    OrGate(OrGate),
}

impl GpioNode {
    fn peer(&self) -> &dyn GpioPeripheral {
        match self {
            GpioNode::Bank(n) => n,
            GpioNode::Expander(n) => n,
            GpioNode::Accel(n) => n,
            GpioNode::OrGate(n) => n,
        }
    }

    fn peer_mut(&mut self) -> &mut dyn GpioPeripheral {
        match self {
            GpioNode::Bank(n) => n,
            GpioNode::Expander(n) => n,
            GpioNode::Accel(n) => n,
            GpioNode::OrGate(n) => n,
        }
    }

    /// The node's I²C-slave face, for nodes that sit on the TWI bus too.
    pub fn i2c_slave(&mut self) -> Option<&mut dyn I2cSlave> {
        match self {
            GpioNode::Expander(n) => Some(n),
            GpioNode::Accel(n) => Some(n),
            _ => None,
        }
    }
}

/// A symmetric pin-to-pin wire between two arena nodes.
#[derive(Debug, Clone, Copy)]
pub struct Wire {
    pub a: (NodeId, usize),
    pub b: (NodeId, usize),
}

/// Arena of pin peripherals plus the wire map connecting them.
pub struct GpioNet {
    nodes: Vec<GpioNode>,
    wires: Vec<Wire>,
}

impl GpioNet {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), wires: Vec::new() }
    }

    pub fn add_node(&mut self, node: GpioNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> &GpioNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GpioNode {
        &mut self.nodes[id]
    }

    /// Wire `a`'s pin to `b`'s pin. Wires are symmetric; whichever end is an
    /// output drives the other.
    pub fn connect(&mut self, a: NodeId, a_pin: usize, b: NodeId, b_pin: usize) {
        self.wires.push(Wire { a: (a, a_pin), b: (b, b_pin) });
    }

    fn peers_of(&self, id: NodeId, pin: usize) -> Vec<(NodeId, usize)> {
        let mut peers = Vec::new();
        for w in &self.wires {
            if w.a == (id, pin) {
                peers.push(w.b);
            }
            if w.b == (id, pin) {
                peers.push(w.a);
            }
        }
        peers
    }

    /// Drain `start`'s changed outputs and propagate levels across the wire
    /// map until the net settles.
    pub fn flush(&mut self, start: NodeId) {
        let mut queue = VecDeque::new();
        Self::enqueue_changes(&mut queue, start, self.nodes[start].peer_mut().take_output_changes());
        let mut budget = 10_000usize;
        while let Some((id, pin)) = queue.pop_front() {
            if budget == 0 {
                warn!("gpio net did not settle, dropping remaining propagation");
                return;
            }
            budget -= 1;
            if self.nodes[id].peer().direction(pin) != PinDirection::Output {
                continue;
            }
            let level = self.nodes[id].peer().output_level(pin);
            for (peer, peer_pin) in self.peers_of(id, pin) {
                let node = self.nodes[peer].peer_mut();
                node.set_input(peer_pin, level);
                Self::enqueue_changes(&mut queue, peer, node.take_output_changes());
            }
        }
    }

    fn enqueue_changes(queue: &mut VecDeque<(NodeId, usize)>, id: NodeId, mask: u32) {
        for pin in 0..32 {
            if mask & (1 << pin) != 0 {
                queue.push_back((id, pin as usize));
            }
        }
    }

    /// Drive an input pin from outside the net (host keyboard, display sync).
    pub fn set_node_input(&mut self, id: NodeId, pin: usize, level: PinLevel) -> bool {
        let accepted = self.nodes[id].peer_mut().set_input(pin, level);
        self.flush(id);
        accepted
    }

    pub fn output_of(&self, id: NodeId, pin: usize) -> PinLevel {
        self.nodes[id].peer().output_level(pin)
    }

    // Bank MMIO entry points; wire effects are flushed before returning.

    pub fn bank_read32(&mut self, id: NodeId, offset: u32) -> u32 {
        match &mut self.nodes[id] {
            GpioNode::Bank(bank) => bank.read32(offset),
            _ => 0,
        }
    }

    pub fn bank_write32(&mut self, id: NodeId, offset: u32, value: u32) {
        if let GpioNode::Bank(bank) = &mut self.nodes[id] {
            bank.write32(offset, value);
        }
        self.flush(id);
    }

    pub fn bank_irq_levels(&self, id: NodeId) -> (bool, bool) {
        match &self.nodes[id] {
            GpioNode::Bank(bank) => bank.irq_levels(),
            _ => (false, false),
        }
    }

    // I²C entry points for slaves living in the arena.

    pub fn slave_read(&mut self, id: NodeId, buf: &mut [u8]) -> bool {
        let ok = self.nodes[id].i2c_slave().map(|s| s.read(buf)).unwrap_or(false);
        self.flush(id);
        ok
    }

    pub fn slave_write(&mut self, id: NodeId, buf: &[u8]) -> bool {
        let ok = self.nodes[id].i2c_slave().map(|s| s.write(buf)).unwrap_or(false);
        self.flush(id);
        ok
    }

    pub fn slave_stop(&mut self, id: NodeId) {
        if let Some(s) = self.nodes[id].i2c_slave() {
            s.stop();
        }
        self.flush(id);
    }
}

impl Default for GpioNet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_net() -> (GpioNet, NodeId, NodeId) {
        let mut net = GpioNet::new();
        let a = net.add_node(GpioNode::Bank(GpioBank::new("A")));
        let b = net.add_node(GpioNode::Bank(GpioBank::new("B")));
        net.connect(a, 2, b, 5);
        (net, a, b)
    }

    #[test]
    fn wired_banks_see_each_others_levels() {
        let (mut net, a, b) = bank_net();
        net.bank_write32(a, 0x30, 1 << 2); // A.2 output
        net.bank_write32(b, 0x40, 1 << 5); // B.5 input enable
        net.bank_write32(a, 0x08, 1 << 2); // drive high via SET
        assert_eq!(net.output_of(b, 5), PinLevel::High);
        net.bank_write32(a, 0x04, 1 << 2); // CLEAR
        assert_eq!(net.output_of(b, 5), PinLevel::Low);
    }

    #[test]
    fn peer_observes_level_xor_polarity() {
        let (mut net, a, b) = bank_net();
        net.bank_write32(a, 0x30, 1 << 2);
        net.bank_write32(b, 0x40, 1 << 5);
        net.bank_write32(b, 0x34, 1 << 5); // B.5 active low
        net.bank_write32(a, 0x08, 1 << 2); // raw level High
        assert_eq!(net.output_of(b, 5), PinLevel::Low, "High xor active-low");
        net.bank_write32(a, 0x04, 1 << 2); // raw level Low
        assert_eq!(net.output_of(b, 5), PinLevel::High);
    }

    #[test]
    fn edge_interrupt_latches_until_cleared() {
        let mut net = GpioNet::new();
        let f = net.add_node(GpioNode::Bank(GpioBank::new("F")));
        net.bank_write32(f, 0x40, 1 << 3); // INEN
        net.bank_write32(f, 0x38, 1 << 3); // EDGE
        net.bank_write32(f, 0x10, 1 << 3); // MASKA
        net.set_node_input(f, 3, PinLevel::High);
        assert_eq!(net.bank_irq_levels(f), (true, false));
        net.set_node_input(f, 3, PinLevel::Low);
        assert_eq!(net.bank_irq_levels(f), (true, false), "edge latch survives deassert");
        net.bank_write32(f, 0x04, 1 << 3); // CLEAR also clears the latch
        assert_eq!(net.bank_irq_levels(f), (false, false));
    }

    #[test]
    fn level_interrupt_follows_active_level() {
        let mut net = GpioNet::new();
        let f = net.add_node(GpioNode::Bank(GpioBank::new("F")));
        net.bank_write32(f, 0x40, 1 << 1);
        net.bank_write32(f, 0x20, 1 << 1); // MASKB
        net.set_node_input(f, 1, PinLevel::High);
        assert_eq!(net.bank_irq_levels(f), (false, true));
        net.set_node_input(f, 1, PinLevel::Low);
        assert_eq!(net.bank_irq_levels(f), (false, false));
    }

    #[test]
    fn input_ignored_without_input_enable() {
        let mut net = GpioNet::new();
        let f = net.add_node(GpioNode::Bank(GpioBank::new("F")));
        assert!(!net.set_node_input(f, 4, PinLevel::High));
        assert_eq!(net.output_of(f, 4), PinLevel::Low);
    }

    #[test]
    fn or_gate_joins_two_sources() {
        let mut net = GpioNet::new();
        let f = net.add_node(GpioNode::Bank(GpioBank::new("F")));
        let gate = net.add_node(GpioNode::OrGate(OrGate::new(true)));
        net.connect(gate, OrGate::OUTPUT_PIN, f, 0);
        net.bank_write32(f, 0x40, 1);
        // Active-low output: asserting either input pulls the bank pin low.
        net.set_node_input(gate, 1, PinLevel::High);
        assert_eq!(net.output_of(f, 0), PinLevel::Low);
        net.set_node_input(gate, 0, PinLevel::High);
        net.set_node_input(gate, 1, PinLevel::Low);
        assert_eq!(net.output_of(f, 0), PinLevel::Low, "other input still asserted");
        net.set_node_input(gate, 0, PinLevel::Low);
        assert_eq!(net.output_of(f, 0), PinLevel::High);
    }
}
