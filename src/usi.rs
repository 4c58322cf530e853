//! The interrupt-free TWI slave engine.
//!
//! Reproduces a USI-style hardware peripheral in software: two procedures,
//! [`UsiEngine::on_start`] and [`UsiEngine::on_overflow`], are the only
//! entry points, invoked by the main loop whenever it observes the
//! matching hardware flag asserted (see [`crate::bootloader::Bootloader`]).
//! The engine never polls the hardware STOP flag to find end-of-transaction
//! — only START/overflow drive its transitions, because a stale STOP flag
//! from a prior transaction cannot be trusted.

use crate::platform::UsiHardware;
use crate::ring::Ring;

/// The engine's single state variable. Entered at `CheckReceivedAddress`
/// after every recognized START.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for an address byte to shift in.
    CheckReceivedAddress,
    /// About to shift a reply byte out.
    SendDataByte,
    /// A reply byte has been shifted out; waiting to shift in the master's
    /// ACK/NACK bit.
    ReceiveAckAfterSendingData,
    /// The ACK/NACK bit has shifted in; decide whether to keep sending.
    CheckReceivedAck,
    /// Waiting for a data byte to shift in.
    ReceiveDataByte,
    /// A data byte has shifted in; stash it and ACK.
    PutByteInRxBufferAndSendAck,
}

/// The polled TWI engine: current state plus the RX/TX byte rings that
/// connect it to the command dispatcher.
pub struct UsiEngine<const RX_CAP: usize, const TX_CAP: usize> {
    state: EngineState,
    own_address: u8,
    rx: Ring<RX_CAP>,
    tx: Ring<TX_CAP>,
}

impl<const RX_CAP: usize, const TX_CAP: usize> UsiEngine<RX_CAP, TX_CAP> {
    /// Builds a fresh engine armed for `own_address` (a 7-bit TWI address).
    pub const fn new(own_address: u8) -> Self {
        Self {
            state: EngineState::CheckReceivedAddress,
            own_address,
            rx: Ring::new(),
            tx: Ring::new(),
        }
    }

    /// The RX ring, read by the command dispatcher.
    pub fn rx(&mut self) -> &mut Ring<RX_CAP> {
        &mut self.rx
    }

    /// The TX ring, written by command handlers.
    pub fn tx(&mut self) -> &mut Ring<TX_CAP> {
        &mut self.tx
    }

    /// Current engine state, mostly useful for tests and tracing.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Invoked when the hardware START flag is observed asserted.
    ///
    /// Releases SDA, busy-waits while SCL is high and SDA is low (START
    /// still in progress), aborting the wait the moment a STOP appears
    /// (SDA goes high while SCL is high) so the wait always terminates.
    /// Arms RESTART detection unless a STOP was seen, clears every
    /// hardware flag, and re-enters `CheckReceivedAddress`.
    pub fn on_start<H: UsiHardware>(&mut self, hw: &mut H) {
        hw.sda_release();

        // START is still in progress while SCL is high and SDA is low; a
        // STOP breaks that condition by driving SDA high while SCL stays
        // high, which also guarantees this loop terminates.
        while hw.scl_level() && !hw.sda_level() {}
        let stop_seen = hw.scl_level() && hw.sda_level();

        if !stop_seen {
            hw.arm_detect_restart();
        } else {
            hw.arm_detect_start();
        }

        hw.clear_flags_and_load_counter(8);
        self.state = EngineState::CheckReceivedAddress;
    }

    /// Invoked when the hardware overflow flag is observed asserted (a
    /// full byte or ACK bit has shifted). Returns `true` exactly when the
    /// master's command has just been fully acknowledged and a deferred
    /// slow operation (flash erase/write) is now safe to run.
    pub fn on_overflow<H: UsiHardware>(&mut self, hw: &mut H, dispatch: impl FnOnce(&mut Ring<RX_CAP>, &mut Ring<TX_CAP>)) -> bool {
        let slow_ops_allowed = match self.state {
            EngineState::CheckReceivedAddress => {
                let data = hw.data_read();
                let matches = data == 0x00 || (data >> 1) == self.own_address;
                if matches {
                    hw.data_write(0x00);
                    hw.clear_flags_and_load_counter(1);
                    if data & 0x01 == 1 {
                        dispatch(&mut self.rx, &mut self.tx);
                        self.state = EngineState::SendDataByte;
                    } else {
                        self.state = EngineState::ReceiveDataByte;
                    }
                    hw.sda_drive();
                } else {
                    hw.arm_detect_start();
                    self.state = EngineState::CheckReceivedAddress;
                }
                false
            }
            EngineState::CheckReceivedAck => {
                let ack = hw.data_read() == 0x00;
                if ack {
                    self.send_next_byte(hw);
                    false
                } else {
                    hw.sda_release();
                    hw.arm_detect_start();
                    self.state = EngineState::CheckReceivedAddress;
                    true
                }
            }
            EngineState::SendDataByte => {
                self.send_next_byte(hw);
                false
            }
            EngineState::ReceiveAckAfterSendingData => {
                hw.sda_release();
                hw.clear_flags_and_load_counter(1);
                self.state = EngineState::CheckReceivedAck;
                false
            }
            EngineState::ReceiveDataByte => {
                hw.sda_drive();
                hw.clear_flags_and_load_counter(8);
                self.state = EngineState::PutByteInRxBufferAndSendAck;
                false
            }
            EngineState::PutByteInRxBufferAndSendAck => {
                let byte = hw.data_read();
                self.rx.push(byte);
                hw.data_write(0x00);
                hw.sda_drive();
                hw.clear_flags_and_load_counter(1);
                self.state = EngineState::ReceiveDataByte;
                false
            }
        };
        slow_ops_allowed
    }

    fn send_next_byte<H: UsiHardware>(&mut self, hw: &mut H) {
        match self.tx.pop() {
            Some(byte) => {
                hw.data_write(byte);
                hw.sda_drive();
                hw.clear_flags_and_load_counter(8);
                self.state = EngineState::ReceiveAckAfterSendingData;
            }
            None => {
                hw.sda_release();
                hw.clear_flags_and_load_counter(1);
                hw.arm_detect_start();
                self.state = EngineState::CheckReceivedAddress;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockUsiHardware;

    #[test]
    fn address_mismatch_re_arms_without_touching_rings() {
        let mut engine = UsiEngine::<16, 16>::new(11);
        let mut hw = MockUsiHardware::new();
        hw.set_data(0x05 << 1);
        let allowed = engine.on_overflow(&mut hw, |_, _| panic!("dispatch must not run"));
        assert!(!allowed);
        assert_eq!(engine.state(), EngineState::CheckReceivedAddress);
        assert!(engine.rx().is_empty());
        assert!(engine.tx().is_empty());
        assert!(hw.start_armed);
    }

    #[test]
    fn general_call_address_is_accepted_like_own_address() {
        let mut engine = UsiEngine::<16, 16>::new(11);
        let mut hw = MockUsiHardware::new();
        hw.set_data(0x00);
        let mut dispatched = false;
        engine.on_overflow(&mut hw, |_, _| dispatched = true);
        assert!(dispatched);
        assert_eq!(engine.state(), EngineState::SendDataByte);
    }

    #[test]
    fn write_transaction_collects_bytes_into_rx_in_order() {
        let mut engine = UsiEngine::<16, 16>::new(11);
        let mut hw = MockUsiHardware::new();
        hw.set_data(11 << 1);
        engine.on_overflow(&mut hw, |_, _| {});
        assert_eq!(engine.state(), EngineState::ReceiveDataByte);

        for byte in [0xAAu8, 0xBB, 0xCC] {
            engine.on_overflow(&mut hw, |_, _| {});
            assert_eq!(engine.state(), EngineState::PutByteInRxBufferAndSendAck);
            hw.set_data(byte);
            engine.on_overflow(&mut hw, |_, _| {});
            assert_eq!(engine.state(), EngineState::ReceiveDataByte);
        }

        assert_eq!(engine.rx().pop(), Some(0xAA));
        assert_eq!(engine.rx().pop(), Some(0xBB));
        assert_eq!(engine.rx().pop(), Some(0xCC));
    }

    #[test]
    fn read_transaction_drains_tx_and_reports_slow_ops_allowed_on_nack() {
        let mut engine = UsiEngine::<16, 16>::new(11);
        let mut hw = MockUsiHardware::new();
        engine.tx().push(0x01);
        engine.tx().push(0x02);

        hw.set_data((11 << 1) | 1);
        engine.on_overflow(&mut hw, |_, _| {});
        assert_eq!(engine.state(), EngineState::SendDataByte);

        let allowed = engine.on_overflow(&mut hw, |_, _| {});
        assert!(!allowed);
        assert_eq!(hw.data_read(), 0x01);
        assert_eq!(engine.state(), EngineState::ReceiveAckAfterSendingData);

        engine.on_overflow(&mut hw, |_, _| {});
        assert_eq!(engine.state(), EngineState::CheckReceivedAck);

        hw.set_data(0x00);
        let allowed = engine.on_overflow(&mut hw, |_, _| {});
        assert!(!allowed);
        assert_eq!(hw.data_read(), 0x02);

        engine.on_overflow(&mut hw, |_, _| {});
        hw.set_data(0xFF);
        let allowed = engine.on_overflow(&mut hw, |_, _| {});
        assert!(allowed);
        assert_eq!(engine.state(), EngineState::CheckReceivedAddress);
    }
}
