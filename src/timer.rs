//! The glue block's general purpose timer
//!
//! The controller uses the timer as its recovery tick: each time the timer
//! elapses, the interrupt handler looks for OUT transfers that stopped
//! making progress. See [`Config::recovery_period_us`](crate::Config::recovery_period_us).
//!
//! The timer has a 1us resolution, and a 24 bit counter.

use crate::{ral, udc};

/// The largest load value, in microseconds
pub const MAX_LOAD: u32 = 0xFF_FFFF;

/// Timer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
#[repr(u32)]
pub enum Mode {
    /// In one shot mode, the timer will count down to zero, generate an interrupt,
    /// and stop until the counter is reset by software.
    OneShot = 0,
    /// In repeat mode, the timer will count down to zero, generate an interrupt and
    /// automatically reload the counter value to start again.
    Repeat = 1,
}

/// General purpose timer.
pub struct Timer<'a> {
    glue: &'a udc::GlueRegisterBlock,
}

impl<'a> Timer<'a> {
    pub(crate) fn new(glue: &'a udc::GlueRegisterBlock) -> Self {
        Self { glue }
    }

    /// Run the timer.
    ///
    /// Run will start counting down the timer. Use `stop()` to cancel a running timer.
    pub fn run(&mut self) {
        ral::modify_reg!(udc, self.glue, TIMERCTRL, RUN: 1);
    }

    /// Indicates if the timer is running (`true`) or stopped (`false`).
    pub fn is_running(&self) -> bool {
        ral::read_reg!(udc, self.glue, TIMERCTRL, RUN == 1)
    }

    /// Stop the timer.
    pub fn stop(&mut self) {
        ral::modify_reg!(udc, self.glue, TIMERCTRL, RUN: 0);
    }

    /// Reset the timer.
    ///
    /// `reset` loads the counter value. It does not stop a running counter.
    pub fn reset(&mut self) {
        ral::modify_reg!(udc, self.glue, TIMERCTRL, RST: 1);
    }

    pub fn set_mode(&mut self, mode: Mode) {
        ral::modify_reg!(udc, self.glue, TIMERCTRL, MODE: mode as u32);
    }

    pub fn mode(&self) -> Mode {
        if ral::read_reg!(udc, self.glue, TIMERCTRL, MODE == 1) {
            Mode::Repeat
        } else {
            Mode::OneShot
        }
    }

    /// Set the counter load value.
    ///
    /// `us` is the number of microseconds to count. `us` saturates at
    /// [`MAX_LOAD`]. A value of `0` will result in a 1us delay.
    ///
    /// The load value takes effect on the next `reset()`, or after the timer
    /// elapses in repeat mode.
    pub fn set_load(&mut self, us: u32) {
        let count = us.clamp(1, MAX_LOAD) - 1;
        ral::write_reg!(udc, self.glue, TIMERLD, LOAD: count);
    }

    /// Returns the counter load value.
    pub fn load(&self) -> u32 {
        ral::read_reg!(udc, self.glue, TIMERLD, LOAD)
    }

    /// Indicates if the timer has elapsed.
    pub fn is_elapsed(&self) -> bool {
        ral::read_reg!(udc, self.glue, GLUEINT, TIMER == 1)
    }

    /// Clear the flag that indicates the timer has elapsed.
    pub fn clear_elapsed(&mut self) {
        ral::write_reg!(udc, self.glue, GLUEINT, TIMER: 1);
    }

    /// Enable or disable interrupt generation when the timer elapses.
    pub fn set_interrupt_enabled(&mut self, enable: bool) {
        ral::modify_reg!(udc, self.glue, GLUEINTEN, TIMER: enable as u32);
    }

    /// Indicates if interrupt generation is enabled.
    pub fn is_interrupt_enabled(&self) -> bool {
        ral::read_reg!(udc, self.glue, GLUEINTEN, TIMER == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::{Mode, Timer, MAX_LOAD};
    use crate::udc::GlueRegisterBlock;

    #[test]
    fn load() {
        let glue = GlueRegisterBlock::new();
        let mut timer = Timer::new(&glue);
        timer.set_load(2000);
        assert_eq!(timer.load(), 1999);
        timer.set_load(0);
        assert_eq!(timer.load(), 0);
        timer.set_load(u32::MAX);
        assert_eq!(timer.load(), MAX_LOAD - 1);
    }

    #[test]
    fn control() {
        let glue = GlueRegisterBlock::new();
        let mut timer = Timer::new(&glue);
        timer.set_mode(Mode::Repeat);
        assert_eq!(timer.mode(), Mode::Repeat);
        assert!(!timer.is_running());
        timer.run();
        assert!(timer.is_running());
        timer.stop();
        assert!(!timer.is_running());
        assert_eq!(timer.mode(), Mode::Repeat);

        timer.set_interrupt_enabled(true);
        assert!(timer.is_interrupt_enabled());
        assert_eq!(glue.GLUEINTEN.read(), 1 << 1);
    }

    #[test]
    fn elapsed() {
        let glue = GlueRegisterBlock::new();
        let timer = Timer::new(&glue);
        assert!(!timer.is_elapsed());
        glue.GLUEINT.write(1 << 1);
        assert!(timer.is_elapsed());
    }
}
